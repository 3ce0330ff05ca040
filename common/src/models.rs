use crate::errors::TriggerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

// ============================================================================
// Trigger Models
// ============================================================================

/// TriggerSource represents what started a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSource {
    Push { git_ref: String },
    Schedule,
    Manual { text_to_print: String },
}

impl TriggerSource {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSource::Push { .. } => TriggerKind::Push,
            TriggerSource::Schedule => TriggerKind::Schedule,
            TriggerSource::Manual { .. } => TriggerKind::Manual,
        }
    }

    /// The operator-supplied parameter, present only for manual runs
    pub fn manual_param(&self) -> Option<&str> {
        match self {
            TriggerSource::Manual { text_to_print } => Some(text_to_print),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind().fmt(f)
    }
}

/// TriggerKind is the bare discriminant of a TriggerSource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    Schedule,
    Manual,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::Schedule => write!(f, "schedule"),
            TriggerKind::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for TriggerKind {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(TriggerKind::Push),
            "schedule" => Ok(TriggerKind::Schedule),
            "manual" => Ok(TriggerKind::Manual),
            _ => Err(TriggerError::UnknownKind(s.to_string())),
        }
    }
}

// ============================================================================
// Run Models
// ============================================================================

/// Stage names a step of the pipeline that can fail
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Provision,
    Produce,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Provision => write!(f, "provision"),
            Stage::Produce => write!(f, "produce"),
            Stage::Publish => write!(f, "publish"),
        }
    }
}

/// RunState is the position of a run in its lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Triggered,
    Provisioned,
    Produced,
    Published,
    NoChange,
    Terminated,
    Failed,
}

impl RunState {
    /// Terminated and Failed accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Terminated | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Triggered => write!(f, "triggered"),
            RunState::Provisioned => write!(f, "provisioned"),
            RunState::Produced => write!(f, "produced"),
            RunState::Published => write!(f, "published"),
            RunState::NoChange => write!(f, "no_change"),
            RunState::Terminated => write!(f, "terminated"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// RunOutcome is the final result of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { commit: Option<CommitId> },
    Failed { stage: Stage, error: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }
}

/// Run is one execution of the pipeline; it is never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub state: RunState,
    pub transitions: Vec<StateTransition>,
    pub outcome: Option<RunOutcome>,
}

impl Run {
    pub fn new(trigger: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            started_at: Utc::now(),
            state: RunState::Triggered,
            transitions: Vec::new(),
            outcome: None,
        }
    }
}

// ============================================================================
// Version Control Models
// ============================================================================

/// Commit author, passed explicitly to every commit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorIdentity {
    pub name: String,
    pub email: String,
}

/// Full hash of a commit created by the publisher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a commit attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitId),
    NoChange,
}

// ============================================================================
// Environment Models
// ============================================================================

/// Environment is what the provisioner prepared for the producer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    /// Package specifiers installed, in manifest order
    pub packages: Vec<String>,
    /// Interpreter the producer should run under, if any
    pub interpreter: Option<PathBuf>,
    /// Directory prepended to PATH for the producer
    pub bin_dir: Option<PathBuf>,
    /// Root of the isolated environment, exported as VIRTUAL_ENV
    pub root: Option<PathBuf>,
    /// Run-scoped directory holding the environment; removed on last drop
    #[serde(skip)]
    pub scratch: Option<Arc<TempDir>>,
}
