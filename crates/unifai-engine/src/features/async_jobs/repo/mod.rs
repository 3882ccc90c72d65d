use crate::features::dispatch::DispatchService;
use crate::shared::types::JobHandle;
use async_trait::async_trait;
use unifai_core::{AsyncEnvelope, Result};

/// One status read of a launched job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobResultSource: Send + Sync {
    async fn poll_once(&self, job: &JobHandle) -> Result<AsyncEnvelope>;
}

#[async_trait]
impl JobResultSource for DispatchService {
    async fn poll_once(&self, job: &JobHandle) -> Result<AsyncEnvelope> {
        self.get_job_result_async(job.clone()).await
    }
}
