pub use unifai_core::{
    AsyncEnvelope, AsyncLaunchJob, CallArgs, CapabilityPath, Credentials, StandardizedEnvelope,
};

/// One call of a capability: `invoke`, `stream` or `launch_job`.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub provider: String,
    pub path: CapabilityPath,
    pub args: CallArgs,
    pub credentials: Option<Credentials>,
    pub fake: bool,
}

impl InvokeRequest {
    pub fn new(provider: impl Into<String>, path: CapabilityPath, args: CallArgs) -> Self {
        Self {
            provider: provider.into(),
            path,
            args,
            credentials: None,
            fake: false,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn fake(mut self, fake: bool) -> Self {
        self.fake = fake;
        self
    }
}

/// A launched remote job, enough to query its result again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub provider: String,
    pub path: CapabilityPath,
    pub provider_job_id: String,
    pub credentials: Option<Credentials>,
    pub fake: bool,
}

impl JobHandle {
    pub fn new(
        provider: impl Into<String>,
        path: CapabilityPath,
        provider_job_id: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            path,
            provider_job_id: provider_job_id.into(),
            credentials: None,
            fake: false,
        }
    }

    /// Handle for the job a launch request just started.
    pub fn launched(request: &InvokeRequest, job: &AsyncLaunchJob) -> Self {
        Self {
            provider: request.provider.clone(),
            path: request.path.clone(),
            provider_job_id: job.provider_job_id.clone(),
            credentials: request.credentials.clone(),
            fake: request.fake,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn fake(mut self, fake: bool) -> Self {
        self.fake = fake;
        self
    }
}
