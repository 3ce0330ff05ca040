// Trigger source resolution
//
// Turns an explicit operator choice, or the event the host platform reports,
// into the TriggerSource that starts a run. Pushes outside the configured
// branch do not start a run at all.

use crate::config::TriggerConfig;
use crate::errors::TriggerError;
use crate::models::{TriggerKind, TriggerSource};
use tracing::{debug, warn};

/// What the operator asked for on the command line
#[derive(Debug, Clone, Default)]
pub struct TriggerInput {
    pub kind: Option<TriggerKind>,
    pub git_ref: Option<String>,
    pub text_to_print: Option<String>,
}

/// The event the host platform reports through its environment
#[derive(Debug, Clone, Default)]
pub struct HostEvent {
    pub event_name: Option<String>,
    pub git_ref: Option<String>,
}

impl HostEvent {
    /// Read `GITHUB_EVENT_NAME` and `GITHUB_REF`
    pub fn from_env() -> Self {
        Self {
            event_name: std::env::var("GITHUB_EVENT_NAME")
                .ok()
                .filter(|v| !v.is_empty()),
            git_ref: std::env::var("GITHUB_REF").ok().filter(|v| !v.is_empty()),
        }
    }
}

/// Map a host event name onto a trigger kind
pub fn kind_from_event_name(event_name: &str) -> Result<TriggerKind, TriggerError> {
    match event_name {
        "push" => Ok(TriggerKind::Push),
        "schedule" => Ok(TriggerKind::Schedule),
        "workflow_dispatch" => Ok(TriggerKind::Manual),
        other => Err(TriggerError::UnsupportedEvent(other.to_string())),
    }
}

/// True if `git_ref` names `branch`, either bare or as `refs/heads/<branch>`
pub fn branch_matches(branch: &str, git_ref: &str) -> bool {
    git_ref == branch || git_ref.strip_prefix("refs/heads/") == Some(branch)
}

#[derive(Debug, Clone)]
pub struct TriggerResolver {
    push_branch: String,
    manual_default: String,
}

impl TriggerResolver {
    pub fn new(config: &TriggerConfig) -> Self {
        Self {
            push_branch: config.push_branch.clone(),
            manual_default: config.manual_default.clone(),
        }
    }

    /// Resolve the trigger for this invocation.
    ///
    /// Returns `Ok(None)` when the event is filtered out and no run should start.
    pub fn resolve(
        &self,
        input: TriggerInput,
        host: &HostEvent,
    ) -> Result<Option<TriggerSource>, TriggerError> {
        let kind = match (input.kind, host.event_name.as_deref()) {
            (Some(kind), _) => kind,
            (None, Some(event)) => kind_from_event_name(event)?,
            (None, None) => TriggerKind::Manual,
        };

        // A cleared dispatch input arrives as an empty string
        let text_to_print = input.text_to_print.filter(|text| !text.is_empty());
        if kind != TriggerKind::Manual && text_to_print.is_some() {
            warn!(trigger = %kind, "Ignoring text_to_print for non-manual trigger");
        }

        let source = match kind {
            TriggerKind::Push => {
                let git_ref = input
                    .git_ref
                    .or_else(|| host.git_ref.clone())
                    .unwrap_or_else(|| format!("refs/heads/{}", self.push_branch));

                if !branch_matches(&self.push_branch, &git_ref) {
                    debug!(
                        git_ref = %git_ref,
                        push_branch = %self.push_branch,
                        "Push outside the watched branch, not triggering"
                    );
                    return Ok(None);
                }
                TriggerSource::Push { git_ref }
            }
            TriggerKind::Schedule => TriggerSource::Schedule,
            TriggerKind::Manual => TriggerSource::Manual {
                text_to_print: text_to_print.unwrap_or_else(|| self.manual_default.clone()),
            },
        };

        Ok(Some(source))
    }
}
