use crate::features::async_jobs::repo::JobResultSource;
use crate::shared::config::EngineConfig;
use crate::shared::types::JobHandle;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use unifai_core::{AsyncEnvelope, CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobObservation {
    pub at: DateTime<Utc>,
    pub provider_job_id: String,
    pub terminal: bool,
}

/// Records the states seen for one job and rejects a return to pending
/// once a terminal state was observed. Callers that keep polling a job after
/// `poll_until_terminal` returned pass the same tracker to `poll_tracked`.
#[derive(Debug, Clone)]
pub struct JobTracker {
    provider: String,
    provider_job_id: String,
    observations: Vec<JobObservation>,
}

impl JobTracker {
    pub fn new(job: &JobHandle) -> Self {
        Self {
            provider: job.provider.clone(),
            provider_job_id: job.provider_job_id.clone(),
            observations: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.observations.iter().any(|o| o.terminal)
    }

    pub fn record(&mut self, envelope: &AsyncEnvelope) -> Result<()> {
        let terminal = envelope.is_terminal();
        if self.is_terminal() && !terminal {
            return Err(CoreError::upstream(
                &self.provider,
                format!(
                    "job {} reported pending after reaching a terminal state",
                    self.provider_job_id
                ),
            ));
        }
        self.observations.push(JobObservation {
            at: Utc::now(),
            provider_job_id: envelope.provider_job_id().to_string(),
            terminal,
        });
        Ok(())
    }

    pub fn observations(&self) -> &[JobObservation] {
        &self.observations
    }

    pub fn into_observations(self) -> Vec<JobObservation> {
        self.observations
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub envelope: AsyncEnvelope,
    pub observations: Vec<JobObservation>,
}

/// Polls a job at a fixed interval until it is terminal or `max_wait` runs out.
#[derive(Clone)]
pub struct JobPoller {
    source: Arc<dyn JobResultSource>,
    interval: Duration,
    max_wait: Duration,
}

impl JobPoller {
    pub fn new(source: Arc<dyn JobResultSource>, interval: Duration, max_wait: Duration) -> Self {
        Self {
            source,
            interval,
            max_wait,
        }
    }

    pub fn from_config(source: Arc<dyn JobResultSource>, config: &EngineConfig) -> Self {
        Self::new(source, config.poll_interval, config.poll_max_wait)
    }

    /// Polls once and records the state, failing if the job went back to pending.
    pub async fn poll_tracked(
        &self,
        job: &JobHandle,
        tracker: &mut JobTracker,
    ) -> Result<AsyncEnvelope> {
        let envelope = self.source.poll_once(job).await?;
        tracker.record(&envelope)?;
        Ok(envelope)
    }

    pub async fn poll_until_terminal(&self, job: &JobHandle) -> Result<PollOutcome> {
        let mut tracker = JobTracker::new(job);

        let polling = async {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let envelope = self.poll_tracked(job, &mut tracker).await?;
                if envelope.is_terminal() {
                    return Ok::<_, CoreError>(envelope);
                }
                debug!(provider = %job.provider, job_id = %job.provider_job_id, "Job still pending");
            }
        };
        let outcome = time::timeout(self.max_wait, polling).await;

        match outcome {
            Ok(Ok(envelope)) => {
                info!(
                    provider = %job.provider,
                    job_id = %job.provider_job_id,
                    polls = tracker.observations().len(),
                    "Job reached a terminal state"
                );
                Ok(PollOutcome {
                    envelope,
                    observations: tracker.into_observations(),
                })
            }
            Ok(Err(error)) => Err(error),
            Err(_) => {
                warn!(provider = %job.provider, job_id = %job.provider_job_id, "Gave up waiting for job");
                Err(CoreError::PollTimeout(format!(
                    "job {} of {} still pending after {:?}",
                    job.provider_job_id, job.provider, self.max_wait
                )))
            }
        }
    }

    pub fn spawn_poll(self: Arc<Self>, job: JobHandle) -> JoinHandle<Result<PollOutcome>> {
        tokio::spawn(async move { self.poll_until_terminal(&job).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::async_jobs::repo::MockJobResultSource;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use unifai_core::{CapabilityPath, ProviderResponse, StandardizedEnvelope};

    fn job() -> JobHandle {
        JobHandle::new("p", CapabilityPath::new("audio", "speech_to_text_async"), "job-1")
    }

    fn pending() -> AsyncEnvelope {
        AsyncEnvelope::Pending {
            provider_job_id: "job-1".to_string(),
        }
    }

    fn terminal() -> AsyncEnvelope {
        AsyncEnvelope::Terminal {
            provider_job_id: "job-1".to_string(),
            envelope: StandardizedEnvelope::success(
                "p",
                ProviderResponse::new(json!({}), json!({"text": "done"})),
            ),
        }
    }

    fn pending_then_terminal(pending_polls: usize) -> MockJobResultSource {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut source = MockJobResultSource::new();
        source.expect_poll_once().returning(move |_| {
            if polls.fetch_add(1, Ordering::SeqCst) < pending_polls {
                Ok(pending())
            } else {
                Ok(terminal())
            }
        });
        source
    }

    fn poller(source: MockJobResultSource, max_wait: Duration) -> JobPoller {
        JobPoller::new(Arc::new(source), Duration::from_secs(1), max_wait)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_terminal() {
        let outcome = poller(pending_then_terminal(3), Duration::from_secs(60))
            .poll_until_terminal(&job())
            .await
            .unwrap();

        assert!(outcome.envelope.is_terminal());
        assert_eq!(outcome.observations.len(), 4);
        assert!(outcome.observations[..3].iter().all(|o| !o.terminal));
        assert!(outcome.observations[3].terminal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_while_pending() {
        let err = poller(pending_then_terminal(usize::MAX), Duration::from_secs(5))
            .poll_until_terminal(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PollTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_errors_end_polling() {
        let mut source = MockJobResultSource::new();
        source
            .expect_poll_once()
            .times(1)
            .returning(|_| Err(CoreError::DeprecatedJobId("job-1".to_string())));

        let err = poller(source, Duration::from_secs(60))
            .poll_until_terminal(&job())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeprecatedJobId(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_poll() {
        let poller = Arc::new(poller(pending_then_terminal(1), Duration::from_secs(60)));
        let outcome = poller.spawn_poll(job()).await.unwrap().unwrap();
        assert_eq!(outcome.envelope.provider_job_id(), "job-1");
    }

    #[test]
    fn test_tracker_rejects_pending_after_terminal() {
        let mut tracker = JobTracker::new(&job());
        tracker.record(&pending()).unwrap();
        tracker.record(&terminal()).unwrap();
        tracker.record(&terminal()).unwrap();

        let err = tracker.record(&pending()).unwrap_err();
        assert!(matches!(err, CoreError::Upstream { .. }));
        assert_eq!(tracker.observations().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repoll_after_terminal_rejects_pending() {
        let polls = Arc::new(AtomicUsize::new(0));
        let mut source = MockJobResultSource::new();
        source.expect_poll_once().returning(move |_| {
            match polls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(terminal()),
                _ => Ok(pending()),
            }
        });
        let poller = poller(source, Duration::from_secs(60));

        let mut tracker = JobTracker::new(&job());
        let first = poller.poll_tracked(&job(), &mut tracker).await.unwrap();
        assert!(first.is_terminal());

        let err = poller.poll_tracked(&job(), &mut tracker).await.unwrap_err();
        assert!(matches!(err, CoreError::Upstream { .. }));
        assert_eq!(tracker.observations().len(), 1);
        assert!(tracker.is_terminal());
    }

    #[test]
    fn test_from_config_uses_poll_settings() {
        let config = EngineConfig {
            poll_interval: Duration::from_millis(250),
            poll_max_wait: Duration::from_secs(3),
            ..EngineConfig::default()
        };
        let poller = JobPoller::from_config(Arc::new(MockJobResultSource::new()), &config);
        assert_eq!(poller.interval, Duration::from_millis(250));
        assert_eq!(poller.max_wait, Duration::from_secs(3));
    }
}
