pub mod repo;
pub mod service;

pub use repo::JobResultSource;
pub use service::{JobObservation, JobPoller, JobTracker, PollOutcome};
