use crate::errors::StateError;
use crate::models::{Run, RunState, StateTransition};
use chrono::Utc;

// ── Valid transitions ──

const VALID_TRANSITIONS: &[(RunState, &[RunState])] = &[
    (
        RunState::Triggered,
        &[RunState::Provisioned, RunState::Failed],
    ),
    (RunState::Provisioned, &[RunState::Produced, RunState::Failed]),
    (
        RunState::Produced,
        &[RunState::Published, RunState::NoChange, RunState::Failed],
    ),
    (RunState::Published, &[RunState::Terminated, RunState::Failed]),
    (RunState::NoChange, &[RunState::Terminated, RunState::Failed]),
    // Terminated and Failed are absorbing
];

pub fn is_valid_transition(from: RunState, to: RunState) -> bool {
    VALID_TRANSITIONS
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

impl Run {
    /// Move the run to `to`, recording the transition
    pub fn transition(&mut self, to: RunState) -> Result<(), StateError> {
        if !is_valid_transition(self.state, to) {
            return Err(StateError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.transitions.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }

    /// States visited so far, starting with Triggered
    pub fn path(&self) -> Vec<RunState> {
        let mut path = vec![RunState::Triggered];
        path.extend(self.transitions.iter().map(|t| t.to));
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerSource;

    #[test]
    fn test_happy_path_with_publish() {
        let mut run = Run::new(TriggerSource::Schedule);
        for state in [
            RunState::Provisioned,
            RunState::Produced,
            RunState::Published,
            RunState::Terminated,
        ] {
            run.transition(state).unwrap();
        }
        assert_eq!(run.state, RunState::Terminated);
        assert_eq!(run.transitions.len(), 4);
    }

    #[test]
    fn test_no_change_path() {
        let mut run = Run::new(TriggerSource::Schedule);
        run.transition(RunState::Provisioned).unwrap();
        run.transition(RunState::Produced).unwrap();
        run.transition(RunState::NoChange).unwrap();
        run.transition(RunState::Terminated).unwrap();
        assert_eq!(
            run.path(),
            vec![
                RunState::Triggered,
                RunState::Provisioned,
                RunState::Produced,
                RunState::NoChange,
                RunState::Terminated,
            ]
        );
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_state() {
        for state in [
            RunState::Triggered,
            RunState::Provisioned,
            RunState::Produced,
            RunState::Published,
            RunState::NoChange,
        ] {
            assert!(is_valid_transition(state, RunState::Failed), "{state}");
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let all = [
            RunState::Triggered,
            RunState::Provisioned,
            RunState::Produced,
            RunState::Published,
            RunState::NoChange,
            RunState::Terminated,
            RunState::Failed,
        ];
        for to in all {
            assert!(!is_valid_transition(RunState::Terminated, to));
            assert!(!is_valid_transition(RunState::Failed, to));
        }
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut run = Run::new(TriggerSource::Schedule);
        let err = run.transition(RunState::Published).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                from: "triggered".to_string(),
                to: "published".to_string(),
            }
        );
        assert_eq!(run.state, RunState::Triggered);
        assert!(run.transitions.is_empty());
    }
}
