pub mod async_jobs;
pub mod conformance;
pub mod dispatch;
pub mod fake_samples;
