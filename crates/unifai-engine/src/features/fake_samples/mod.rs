pub mod repo;

pub use repo::{FsSampleRepository, InMemorySampleRepository, SampleRepository};
