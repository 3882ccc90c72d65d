//! Blocking HTTP plumbing shared by the network-backed adapters.

pub mod repo;
pub mod service;

pub use repo::{HttpRequest, HttpResponse, HttpTransportRepository, ReqwestHttpTransport};
pub use service::JsonHttpService;

use std::sync::Arc;
use unifai_core::{CoreError, Result};

/// Default transport for adapters connected without an injected one.
pub fn default_transport() -> Result<Arc<dyn HttpTransportRepository>> {
    let transport = ReqwestHttpTransport::new()
        .map_err(|e| CoreError::Configuration(e.to_string()))?;
    Ok(Arc::new(transport))
}

