// Error handling framework
// One enum per pipeline concern; binaries wrap these with anyhow at the edge.

use crate::models::Stage;
use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No next fire time available for cron expression '{0}'")]
    NoNextExecution(String),
}

/// Trigger resolution errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TriggerError {
    #[error("Unknown trigger kind: {0}")]
    UnknownKind(String),

    #[error("Unsupported host event: {0}")]
    UnsupportedEvent(String),
}

/// Run state machine errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Environment provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to read dependency manifest {path}: {reason}")]
    ManifestUnreadable { path: String, reason: String },

    #[error("Interpreter '{interpreter}' is not runnable: {reason}")]
    InterpreterUnavailable { interpreter: String, reason: String },

    #[error("Interpreter version mismatch: declared {declared}, found {found}")]
    VersionMismatch { declared: String, found: String },

    #[error("Failed to create isolated environment: {0}")]
    EnvironmentCreationFailed(String),

    #[error("Dependency installation failed: {0}")]
    InstallFailed(String),
}

/// Producer task errors
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Failed to start producer '{entry_point}': {reason}")]
    Spawn { entry_point: String, reason: String },

    #[error("Producer exited with status {0}")]
    NonZeroExit(i32),

    #[error("Producer was terminated by a signal")]
    Terminated,
}

/// Change publisher errors
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("git is not available: {0}")]
    GitUnavailable(String),

    #[error("Failed to stage changes: {0}")]
    StageFailed(String),

    #[error("Failed to compare working tree with HEAD: {0}")]
    DiffFailed(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Push rejected by remote: {0}")]
    PushRejected(String),

    #[error("Push failed: {0}")]
    PushFailed(String),
}

/// Producer-side scraping errors
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        ScrapeError::Http(err.to_string())
    }
}

/// A fatal error raised by one stage of a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Run state error after {stage}: {source}")]
    State {
        stage: Stage,
        #[source]
        source: StateError,
    },
}

impl PipelineError {
    /// The stage that raised this error
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Provision(_) => Stage::Provision,
            PipelineError::Producer(_) => Stage::Produce,
            PipelineError::Publish(_) => Stage::Publish,
            PipelineError::State { stage, .. } => *stage,
        }
    }
}
