pub mod service;

pub use service::{ConformancePolicy, ConformanceReport, ConformanceService, SampleCheck};
