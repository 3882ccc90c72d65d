pub mod features;
pub mod shared;

use features::async_jobs::JobPoller;
use features::conformance::{ConformanceReport, ConformanceService};
use features::dispatch::{CachedAdapterRepository, DispatchService};
use features::fake_samples::{FsSampleRepository, SampleRepository};
use shared::config::EngineConfig;
use shared::types::{InvokeRequest, JobHandle};
use std::sync::Arc;
use tracing::info;
use unifai_core::adapter::ChunkStream;
use unifai_core::capability::{
    CapabilityFilter, CapabilityMap, CapabilityRegistry, GLOBAL_REGISTRY,
};
use unifai_core::constraints::ConstraintStore;
use unifai_core::standardization::ContractStore;
use unifai_core::{
    AsyncEnvelope, AsyncLaunchJob, Capability, CapabilityPath, Result, StandardizedEnvelope,
};

/// Entry point tying the registry, validation data, dispatch and conformance together.
pub struct Engine {
    config: EngineConfig,
    dispatch: DispatchService,
    conformance: Arc<ConformanceService>,
    samples: Arc<dyn SampleRepository>,
}

impl Engine {
    pub fn from_env() -> Result<Self> {
        Self::from_config(EngineConfig::from_env()?)
    }

    /// Builds the engine over the built-in providers and the configured data directory.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let registry = GLOBAL_REGISTRY.get_or_build(|| {
            CapabilityRegistry::from_entries(unifai_providers::builtin_entries()?)
        })?;

        let mut constraints = ConstraintStore::new();
        constraints.load_dir(&config.constraints_dir())?;
        let mut contracts = ContractStore::new();
        contracts.load_dir(&config.contracts_dir())?;
        let samples = Arc::new(FsSampleRepository::new(config.samples_dir()));

        info!(
            data_dir = %config.data_dir.display(),
            providers = registry.len(),
            constraints = constraints.len(),
            contracts = contracts.len(),
            "Engine initialized"
        );
        Ok(Self::from_parts(config, registry, constraints, contracts, samples))
    }

    pub fn from_parts(
        config: EngineConfig,
        registry: Arc<CapabilityRegistry>,
        constraints: ConstraintStore,
        contracts: ContractStore,
        samples: Arc<dyn SampleRepository>,
    ) -> Self {
        let conformance = Arc::new(ConformanceService::new(Arc::new(contracts)));
        let adapters = Arc::new(CachedAdapterRepository::new(Arc::clone(&registry)));

        let mut dispatch = DispatchService::new(
            registry,
            adapters,
            Arc::new(constraints),
            Arc::clone(&samples),
        )
        .with_fake_delay_ms(config.fake_delay_ms);
        if config.check_responses {
            dispatch = dispatch.with_response_checks(Arc::clone(&conformance));
        }

        Self {
            config,
            dispatch,
            conformance,
            samples,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &DispatchService {
        &self.dispatch
    }

    pub fn invoke(&self, request: InvokeRequest) -> Result<StandardizedEnvelope> {
        self.dispatch.invoke(request)
    }

    pub async fn invoke_async(&self, request: InvokeRequest) -> Result<StandardizedEnvelope> {
        self.dispatch.invoke_async(request).await
    }

    pub async fn stream(&self, request: InvokeRequest) -> Result<ChunkStream> {
        self.dispatch.stream(request).await
    }

    pub fn launch_job(&self, request: InvokeRequest) -> Result<AsyncLaunchJob> {
        self.dispatch.launch_job(request)
    }

    pub fn get_job_result(&self, job: &JobHandle) -> Result<AsyncEnvelope> {
        self.dispatch.get_job_result(job)
    }

    /// Poller using the configured interval and wait budget.
    pub fn poller(&self) -> JobPoller {
        JobPoller::from_config(Arc::new(self.dispatch.clone()), &self.config)
    }

    pub fn list_capabilities(&self, filter: &CapabilityFilter) -> Vec<Capability> {
        self.dispatch.registry().list_capabilities(filter)
    }

    pub fn list_providers(&self, path: &CapabilityPath) -> Vec<String> {
        self.dispatch.registry().list_providers(path)
    }

    pub fn as_dict(&self, filter: &CapabilityFilter) -> CapabilityMap {
        self.dispatch.registry().as_dict(filter)
    }

    /// Checks every recorded sample against its contract.
    pub fn verify(&self) -> Result<ConformanceReport> {
        self.conformance.verify_samples(self.samples.as_ref())
    }
}
