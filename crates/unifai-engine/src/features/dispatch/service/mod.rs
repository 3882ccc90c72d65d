use crate::features::conformance::ConformanceService;
use crate::features::dispatch::repo::AdapterRepository;
use crate::features::fake_samples::SampleRepository;
use crate::shared::types::{InvokeRequest, JobHandle};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use unifai_core::adapter::{ChunkStream, Operation};
use unifai_core::capability::CapabilityRegistry;
use unifai_core::constraints::ConstraintStore;
use unifai_core::{
    AsyncEnvelope, AsyncJobResponse, AsyncJobState, AsyncLaunchJob, CapabilityPath, CoreError,
    Result, StandardizedEnvelope,
};
use uuid::Uuid;

/// Chunks buffered between the blocking reader and the consumer of a stream.
const STREAM_BUFFER: usize = 16;

fn join_error(provider: &str, err: JoinError) -> CoreError {
    CoreError::upstream(provider, format!("adapter task failed: {err}"))
}

/// Resolves, validates and invokes capabilities, wrapping results in envelopes.
#[derive(Clone)]
pub struct DispatchService {
    registry: Arc<CapabilityRegistry>,
    adapters: Arc<dyn AdapterRepository>,
    constraints: Arc<ConstraintStore>,
    samples: Arc<dyn SampleRepository>,
    response_checks: Option<Arc<ConformanceService>>,
    fake_delay_ms: u64,
}

impl DispatchService {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        adapters: Arc<dyn AdapterRepository>,
        constraints: Arc<ConstraintStore>,
        samples: Arc<dyn SampleRepository>,
    ) -> Self {
        Self {
            registry,
            adapters,
            constraints,
            samples,
            response_checks: None,
            fake_delay_ms: 0,
        }
    }

    pub fn with_fake_delay_ms(mut self, fake_delay_ms: u64) -> Self {
        self.fake_delay_ms = fake_delay_ms;
        self
    }

    /// Checks live envelopes against their contract and logs mismatches.
    pub fn with_response_checks(mut self, conformance: Arc<ConformanceService>) -> Self {
        self.response_checks = Some(conformance);
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    fn resolve(&self, provider: &str, path: &CapabilityPath, operation: Operation) -> Result<()> {
        let entry = self.registry.provider(provider)?;
        let is_job = matches!(operation, Operation::LaunchJob | Operation::GetJobResult);

        if path.is_async() && !is_job {
            return Err(CoreError::Validation(format!(
                "{path} is asynchronous, launch it as a job"
            )));
        }
        if !path.is_async() && is_job {
            return Err(CoreError::Validation(format!(
                "{path} is synchronous and cannot be launched as a job"
            )));
        }
        if !entry.implements(path, operation) {
            return Err(CoreError::Configuration(format!(
                "provider '{provider}' does not implement {path} ({operation:?})"
            )));
        }
        Ok(())
    }

    /// Resolution and input validation. Rewrites the request's arguments.
    fn prepare(&self, mut request: InvokeRequest, operation: Operation) -> Result<InvokeRequest> {
        self.resolve(&request.provider, &request.path, operation)?;
        self.constraints
            .validate(&request.provider, &request.path, &mut request.args)?;
        info!(
            provider = %request.provider,
            capability = %request.path,
            operation = ?operation,
            fake = request.fake,
            "Dispatching"
        );
        Ok(request)
    }

    fn fake_delay(&self) -> Duration {
        if self.fake_delay_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.fake_delay_ms))
    }

    fn fake_envelope(&self, provider: &str, path: &CapabilityPath) -> Result<StandardizedEnvelope> {
        let sample = self.samples.sample(provider, path)?;
        Ok(StandardizedEnvelope::success(provider, sample))
    }

    fn advise(&self, path: &CapabilityPath, envelope: &StandardizedEnvelope) {
        if let Some(conformance) = &self.response_checks {
            conformance.advise(path, envelope);
        }
    }

    /// Adapter part of a call, blocking on the provider.
    fn call_prepared(&self, request: InvokeRequest) -> Result<StandardizedEnvelope> {
        let adapter = self
            .adapters
            .adapter(&request.provider, request.credentials.as_ref())?;
        let response = adapter.call(&request.path, request.args)?;
        let envelope = StandardizedEnvelope::success(request.provider, response);
        self.advise(&request.path, &envelope);
        Ok(envelope)
    }

    pub fn invoke(&self, request: InvokeRequest) -> Result<StandardizedEnvelope> {
        let request = self.prepare(request, Operation::Call)?;
        if request.fake {
            std::thread::sleep(self.fake_delay());
            return self.fake_envelope(&request.provider, &request.path);
        }
        self.call_prepared(request)
    }

    /// Same as [`invoke`](Self::invoke), with the provider call on the blocking pool.
    pub async fn invoke_async(&self, request: InvokeRequest) -> Result<StandardizedEnvelope> {
        let request = self.prepare(request, Operation::Call)?;
        if request.fake {
            tokio::time::sleep(self.fake_delay()).await;
            return self.fake_envelope(&request.provider, &request.path);
        }

        let provider = request.provider.clone();
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.call_prepared(request))
            .await
            .map_err(|e| join_error(&provider, e))?
    }

    /// Streams chunks in arrival order. Dropping the stream stops the reader.
    pub async fn stream(&self, request: InvokeRequest) -> Result<ChunkStream> {
        if request.fake {
            return Err(CoreError::Validation(
                "fake mode cannot be combined with streaming".to_string(),
            ));
        }
        let request = self.prepare(request, Operation::Stream)?;
        let provider = request.provider.clone();

        let adapters = Arc::clone(&self.adapters);
        let chunks = tokio::task::spawn_blocking(move || {
            let adapter = adapters.adapter(&request.provider, request.credentials.as_ref())?;
            adapter.stream(&request.path, request.args)
        })
        .await
        .map_err(|e| join_error(&provider, e))??;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::task::spawn_blocking(move || {
            for chunk in futures::executor::block_on_stream(chunks) {
                if tx.blocking_send(chunk).is_err() {
                    debug!(provider = %provider, "Stream consumer went away");
                    break;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    pub fn launch_job(&self, request: InvokeRequest) -> Result<AsyncLaunchJob> {
        let request = self.prepare(request, Operation::LaunchJob)?;
        if request.fake {
            std::thread::sleep(self.fake_delay());
            return Ok(AsyncLaunchJob::new(Uuid::new_v4().to_string()));
        }

        let adapter = self
            .adapters
            .adapter(&request.provider, request.credentials.as_ref())?;
        let job = adapter.launch_job(&request.path, request.args)?;
        info!(provider = %request.provider, capability = %request.path, job_id = %job.provider_job_id, "Launched job");
        Ok(job)
    }

    pub async fn launch_job_async(&self, request: InvokeRequest) -> Result<AsyncLaunchJob> {
        let provider = request.provider.clone();
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.launch_job(request))
            .await
            .map_err(|e| join_error(&provider, e))?
    }

    /// Reads the job's current state from the provider. Nothing is cached between calls.
    pub fn get_job_result(&self, job: &JobHandle) -> Result<AsyncEnvelope> {
        self.resolve(&job.provider, &job.path, Operation::GetJobResult)?;

        if job.fake {
            if Uuid::parse_str(&job.provider_job_id).is_err() {
                return Err(CoreError::DeprecatedJobId(format!(
                    "{}: '{}' is not a job id issued in fake mode",
                    job.provider, job.provider_job_id
                )));
            }
            std::thread::sleep(self.fake_delay());
            let envelope = self.fake_envelope(&job.provider, &job.path)?;
            return Ok(AsyncEnvelope::Terminal {
                provider_job_id: job.provider_job_id.clone(),
                envelope,
            });
        }

        let adapter = self.adapters.adapter(&job.provider, job.credentials.as_ref())?;
        let response = adapter.get_job_result(&job.path, &job.provider_job_id)?;
        debug!(provider = %job.provider, job_id = %job.provider_job_id, state = ?response.state, "Polled job");
        self.job_envelope(job, response)
    }

    pub async fn get_job_result_async(&self, job: JobHandle) -> Result<AsyncEnvelope> {
        let provider = job.provider.clone();
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.get_job_result(&job))
            .await
            .map_err(|e| join_error(&provider, e))?
    }

    fn job_envelope(&self, job: &JobHandle, response: AsyncJobResponse) -> Result<AsyncEnvelope> {
        let provider_job_id = job.provider_job_id.clone();
        match response.state {
            AsyncJobState::Pending => Ok(AsyncEnvelope::Pending { provider_job_id }),
            AsyncJobState::Success => {
                let standardized_response = response.standardized_response.ok_or_else(|| {
                    CoreError::upstream(
                        &job.provider,
                        format!("job {provider_job_id} succeeded without a result"),
                    )
                })?;
                let envelope = StandardizedEnvelope::success(
                    job.provider.clone(),
                    unifai_core::ProviderResponse::new(
                        response.original_response,
                        standardized_response,
                    ),
                );
                self.advise(&job.path, &envelope);
                Ok(AsyncEnvelope::Terminal {
                    provider_job_id,
                    envelope,
                })
            }
            AsyncJobState::Failed => Err(CoreError::upstream(
                &job.provider,
                format!(
                    "job {provider_job_id} failed: {}",
                    response.error.as_deref().unwrap_or("no reason given")
                ),
            )),
            AsyncJobState::DeprecatedId => Err(CoreError::DeprecatedJobId(format!(
                "{}: job {provider_job_id} is unknown or expired",
                job.provider
            ))),
        }
    }
}
