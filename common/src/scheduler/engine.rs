// Scheduler engine implementation
//
// Fires scheduled runs from a cron trigger. Runs execute inline in the loop,
// so the daemon never overlaps its own runs; the next fire time is computed
// after a run finishes, which coalesces fires missed while it was running.

use crate::errors::ScheduleError;
use crate::models::{Run, TriggerSource};
use crate::pipeline::PipelineEngine;
use crate::schedule::ScheduleTrigger;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

/// Scheduler trait for the daemon loop
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the fire loop until `stop` is called
    async fn start(&self) -> Result<(), ScheduleError>;

    /// Signal the fire loop to exit after any in-flight run
    async fn stop(&self);

    /// Execute one scheduled run immediately
    async fn run_once(&self) -> Run;
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    trigger: Arc<dyn ScheduleTrigger>,
    pipeline: Arc<PipelineEngine>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SchedulerEngine {
    pub fn new(trigger: Arc<dyn ScheduleTrigger>, pipeline: Arc<PipelineEngine>) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            trigger,
            pipeline,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), ScheduleError> {
        info!(workdir = %self.pipeline.workdir().display(), "Starting scheduler engine");

        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            let now = Utc::now();
            let next = match self.trigger.next_execution_time(now) {
                Ok(next) => next,
                Err(e) => {
                    error!(error = %e, "Failed to compute next fire time");
                    return Err(e);
                }
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_fire = %next, wait_seconds = wait.as_secs(), "Waiting for next scheduled run");

            tokio::select! {
                _ = sleep(wait) => {
                    debug!(fire_time = %next, "Schedule fired");
                    self.run_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) {
        info!("Stopping scheduler engine");
        // No receivers just means the loop is not running
        let _ = self.shutdown_tx.send(());
    }

    async fn run_once(&self) -> Run {
        let run = self.pipeline.execute(TriggerSource::Schedule).await;
        match &run.outcome {
            Some(outcome) if outcome.is_success() => {
                info!(run_id = %run.id, "Scheduled run finished")
            }
            _ => error!(run_id = %run.id, "Scheduled run failed"),
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProducerError, PublishError};
    use crate::models::{Environment, RunOutcome, RunState};
    use crate::producer::Producer;
    use crate::provision::NoopProvisioner;
    use crate::publisher::{ChangePublisher, PublishOutcome};
    use crate::schedule::CronSchedule;
    use chrono::DateTime;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fires at a fixed interval after the reference time
    struct EveryInterval(chrono::Duration);

    impl ScheduleTrigger for EveryInterval {
        fn next_execution_time(
            &self,
            reference: DateTime<Utc>,
        ) -> Result<DateTime<Utc>, ScheduleError> {
            Ok(reference + self.0)
        }
    }

    #[derive(Default)]
    struct CountingProducer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Producer for CountingProducer {
        async fn produce(
            &self,
            _workdir: &Path,
            _environment: &Environment,
        ) -> Result<(), ProducerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct UnchangedPublisher;

    #[async_trait]
    impl ChangePublisher for UnchangedPublisher {
        async fn publish(&self, _workdir: &Path) -> Result<PublishOutcome, PublishError> {
            Ok(PublishOutcome::NoChange)
        }
    }

    fn scheduler(
        trigger: Arc<dyn ScheduleTrigger>,
        producer: Arc<CountingProducer>,
    ) -> Arc<SchedulerEngine> {
        let pipeline = PipelineEngine::new(
            ".",
            Arc::new(NoopProvisioner),
            producer,
            Arc::new(UnchangedPublisher),
        );
        Arc::new(SchedulerEngine::new(trigger, Arc::new(pipeline)))
    }

    #[tokio::test]
    async fn test_run_once_uses_schedule_trigger() {
        let producer = Arc::new(CountingProducer::default());
        let engine = scheduler(
            Arc::new(EveryInterval(chrono::Duration::hours(1))),
            producer.clone(),
        );

        let run = engine.run_once().await;

        assert_eq!(run.trigger, TriggerSource::Schedule);
        assert_eq!(run.state, RunState::Terminated);
        assert_eq!(run.outcome, Some(RunOutcome::Success { commit: None }));
        assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loop_fires_until_stopped() {
        let producer = Arc::new(CountingProducer::default());
        let engine = scheduler(
            Arc::new(EveryInterval(chrono::Duration::milliseconds(10))),
            producer.clone(),
        );

        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start().await })
        };

        for _ in 0..200 {
            if producer.calls.load(Ordering::SeqCst) >= 2 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        engine.stop().await;

        let result = handle.await.unwrap();
        assert!(result.is_ok());
        assert!(producer.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_stop_before_first_fire() {
        let producer = Arc::new(CountingProducer::default());
        let schedule = CronSchedule::new("0 12 1 1 *", "UTC").unwrap();
        let engine = scheduler(Arc::new(schedule), producer.clone());

        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start().await })
        };
        sleep(Duration::from_millis(50)).await;
        engine.stop().await;

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(producer.calls.load(Ordering::SeqCst), 0);
    }
}
