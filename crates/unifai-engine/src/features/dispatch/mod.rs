pub mod repo;
pub mod service;

pub use repo::{AdapterRepository, CachedAdapterRepository};
pub use service::DispatchService;
