use std::path::PathBuf;
use unifai_core::capability::CapabilityFilter;
use unifai_engine::features::conformance::ConformancePolicy;
use unifai_engine::shared::config::EngineConfig;
use unifai_engine::Engine;

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data")
}

fn engine() -> Engine {
    Engine::from_config(EngineConfig::default().with_data_dir(data_dir())).unwrap()
}

#[test]
fn test_every_recorded_sample_matches_its_contract() {
    let report = engine().verify().unwrap();

    for failure in report.failures() {
        eprintln!("{} {}: {:?}", failure.provider, failure.path, failure.failure);
    }
    assert_eq!(report.policy, ConformancePolicy::Strict);
    assert!(report.passed());
    assert_eq!(report.checks.len(), 7);
}

#[test]
fn test_every_builtin_capability_has_contract_and_sample() {
    let engine = engine();
    let report = engine.verify().unwrap();

    for capability in engine.list_capabilities(&CapabilityFilter::new()) {
        let path = capability.path();
        assert!(
            data_dir()
                .join("contracts")
                .join(format!("{}.json", path.file_stem()))
                .is_file(),
            "no contract for {path}"
        );
        assert!(
            report
                .checks
                .iter()
                .any(|c| c.provider == capability.provider && c.path == path),
            "no sample for {} {path}",
            capability.provider
        );
    }
}
