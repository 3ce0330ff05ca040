// Pipeline engine
//
// Drives one run through provision → produce → publish. Stages run strictly
// in sequence and the first fatal error ends the run; nothing is published
// after a failed stage.

use crate::config::Settings;
use crate::errors::PipelineError;
use crate::models::{CommitId, Run, RunOutcome, RunState, Stage, TriggerSource};
use crate::producer::{CommandProducer, Producer};
use crate::provision::{self, Provisioner};
use crate::publisher::{ChangePublisher, GitPublisher, PublishOutcome};
use crate::telemetry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

pub struct PipelineEngine {
    workdir: PathBuf,
    provisioner: Arc<dyn Provisioner>,
    producer: Arc<dyn Producer>,
    publisher: Arc<dyn ChangePublisher>,
}

impl PipelineEngine {
    pub fn new(
        workdir: impl Into<PathBuf>,
        provisioner: Arc<dyn Provisioner>,
        producer: Arc<dyn Producer>,
        publisher: Arc<dyn ChangePublisher>,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            provisioner,
            producer,
            publisher,
        }
    }

    /// Wire the stages described by `settings` against the repository at `workdir`
    pub fn from_settings(settings: &Settings, workdir: impl Into<PathBuf>) -> Self {
        Self::new(
            workdir,
            Arc::from(provision::from_config(&settings.provision)),
            Arc::new(CommandProducer::new(
                &settings.producer,
                settings.provision.interpreter.clone(),
            )),
            Arc::new(GitPublisher::from_env(&settings.publish)),
        )
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Execute one run to a terminal state
    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn execute(&self, trigger: TriggerSource) -> Run {
        let mut run = Run::new(trigger);
        let started = Instant::now();
        let kind = run.trigger.kind();

        info!(
            run_id = %run.id,
            trigger = %kind,
            text_to_print = run.trigger.manual_param(),
            "Run started"
        );
        if let Some(text) = run.trigger.manual_param() {
            println!("{}", text);
        }

        let outcome = match self.run_stages(&mut run).await {
            Ok(commit) => {
                telemetry::record_run_success(kind, commit.is_some());
                info!(
                    run_id = %run.id,
                    commit = commit.as_ref().map(|c| c.to_string()),
                    "Run succeeded"
                );
                RunOutcome::Success { commit }
            }
            Err(err) => {
                let stage = err.stage();
                if let Err(state_err) = run.transition(RunState::Failed) {
                    error!(run_id = %run.id, error = %state_err, "Run already terminal");
                }
                telemetry::record_run_failure(kind, stage);
                error!(run_id = %run.id, stage = %stage, error = %err, "Run failed");
                RunOutcome::Failed {
                    stage,
                    error: err.to_string(),
                }
            }
        };

        telemetry::record_run_duration(kind, started.elapsed().as_secs_f64());
        run.outcome = Some(outcome);
        run
    }

    async fn run_stages(&self, run: &mut Run) -> Result<Option<CommitId>, PipelineError> {
        // Held until publish returns; a run-scoped environment is removed on drop
        let environment = self.provisioner.provision(&self.workdir).await?;
        advance(run, RunState::Provisioned, Stage::Provision)?;
        info!(run_id = %run.id, packages = environment.packages.len(), "Environment provisioned");

        self.producer.produce(&self.workdir, &environment).await?;
        advance(run, RunState::Produced, Stage::Produce)?;

        let commit = match self.publisher.publish(&self.workdir).await? {
            PublishOutcome::Published(commit) => {
                advance(run, RunState::Published, Stage::Publish)?;
                Some(commit)
            }
            PublishOutcome::NoChange => {
                advance(run, RunState::NoChange, Stage::Publish)?;
                None
            }
        };
        advance(run, RunState::Terminated, Stage::Publish)?;

        Ok(commit)
    }
}

fn advance(run: &mut Run, to: RunState, stage: Stage) -> Result<(), PipelineError> {
    run.transition(to)
        .map_err(|source| PipelineError::State { stage, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProducerError, ProvisionError, PublishError};
    use crate::models::Environment;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvisioner {
        fail: bool,
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn provision(&self, _workdir: &Path) -> Result<Environment, ProvisionError> {
            if self.fail {
                Err(ProvisionError::InstallFailed("no such package".to_string()))
            } else {
                Ok(Environment::default())
            }
        }
    }

    #[derive(Default)]
    struct FakeProducer {
        exit_code: i32,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Producer for FakeProducer {
        async fn produce(
            &self,
            _workdir: &Path,
            _environment: &Environment,
        ) -> Result<(), ProducerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.exit_code {
                0 => Ok(()),
                code => Err(ProducerError::NonZeroExit(code)),
            }
        }
    }

    enum PublishBehaviour {
        Commit,
        NoChange,
        Reject,
    }

    struct FakePublisher {
        behaviour: PublishBehaviour,
        calls: AtomicUsize,
    }

    impl FakePublisher {
        fn new(behaviour: PublishBehaviour) -> Self {
            Self {
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChangePublisher for FakePublisher {
        async fn publish(&self, _workdir: &Path) -> Result<PublishOutcome, PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                PublishBehaviour::Commit => {
                    Ok(PublishOutcome::Published(CommitId("abc1234def".to_string())))
                }
                PublishBehaviour::NoChange => Ok(PublishOutcome::NoChange),
                PublishBehaviour::Reject => {
                    Err(PublishError::PushRejected("non-fast-forward".to_string()))
                }
            }
        }
    }

    fn engine(
        provision_fails: bool,
        producer: Arc<FakeProducer>,
        publisher: Arc<FakePublisher>,
    ) -> PipelineEngine {
        PipelineEngine::new(
            ".",
            Arc::new(FakeProvisioner {
                fail: provision_fails,
            }),
            producer,
            publisher,
        )
    }

    #[tokio::test]
    async fn test_published_run() {
        let producer = Arc::new(FakeProducer::default());
        let publisher = Arc::new(FakePublisher::new(PublishBehaviour::Commit));
        let run = engine(false, producer, publisher)
            .execute(TriggerSource::Schedule)
            .await;

        assert_eq!(run.state, RunState::Terminated);
        assert_eq!(
            run.outcome,
            Some(RunOutcome::Success {
                commit: Some(CommitId("abc1234def".to_string()))
            })
        );
        assert!(run.path().contains(&RunState::Published));
    }

    #[tokio::test]
    async fn test_no_change_run_succeeds() {
        let producer = Arc::new(FakeProducer::default());
        let publisher = Arc::new(FakePublisher::new(PublishBehaviour::NoChange));
        let run = engine(false, producer, publisher)
            .execute(TriggerSource::Schedule)
            .await;

        assert_eq!(run.state, RunState::Terminated);
        assert_eq!(run.outcome, Some(RunOutcome::Success { commit: None }));
        assert!(run.path().contains(&RunState::NoChange));
    }

    #[tokio::test]
    async fn test_provision_failure_skips_producer_and_publisher() {
        let producer = Arc::new(FakeProducer::default());
        let publisher = Arc::new(FakePublisher::new(PublishBehaviour::Commit));
        let run = engine(true, producer.clone(), publisher.clone())
            .execute(TriggerSource::Schedule)
            .await;

        assert_eq!(run.state, RunState::Failed);
        assert!(matches!(
            run.outcome,
            Some(RunOutcome::Failed {
                stage: Stage::Provision,
                ..
            })
        ));
        assert_eq!(producer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_producer_failure_skips_publisher() {
        let producer = Arc::new(FakeProducer {
            exit_code: 2,
            ..Default::default()
        });
        let publisher = Arc::new(FakePublisher::new(PublishBehaviour::Commit));
        let run = engine(false, producer.clone(), publisher.clone())
            .execute(TriggerSource::Manual {
                text_to_print: "Running".to_string(),
            })
            .await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(
            run.path(),
            vec![RunState::Triggered, RunState::Provisioned, RunState::Failed]
        );
        assert!(matches!(
            run.outcome,
            Some(RunOutcome::Failed {
                stage: Stage::Produce,
                ..
            })
        ));
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_push_rejection_fails_run() {
        let producer = Arc::new(FakeProducer::default());
        let publisher = Arc::new(FakePublisher::new(PublishBehaviour::Reject));
        let run = engine(false, producer, publisher)
            .execute(TriggerSource::Push {
                git_ref: "refs/heads/main".to_string(),
            })
            .await;

        assert_eq!(run.state, RunState::Failed);
        match run.outcome {
            Some(RunOutcome::Failed { stage, error }) => {
                assert_eq!(stage, Stage::Publish);
                assert!(error.contains("rejected"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
