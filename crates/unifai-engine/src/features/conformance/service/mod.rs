use crate::features::fake_samples::SampleRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use unifai_core::standardization::ContractStore;
use unifai_core::{CapabilityPath, Result, StandardizedEnvelope};

/// How per-provider results combine into a verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConformancePolicy {
    /// Every provider must conform.
    #[default]
    Strict,
    /// A capability passes when at least one of its providers conforms.
    AnyProviderPerCapability,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCheck {
    pub provider: String,
    pub path: CapabilityPath,
    /// `None` when the sample conforms, otherwise the reason it does not.
    pub failure: Option<String>,
}

impl SampleCheck {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceReport {
    pub policy: ConformancePolicy,
    pub checks: Vec<SampleCheck>,
}

impl ConformanceReport {
    pub fn failures(&self) -> impl Iterator<Item = &SampleCheck> {
        self.checks.iter().filter(|c| !c.passed())
    }

    /// Capabilities that fail under the report's policy.
    pub fn failing_capabilities(&self) -> Vec<CapabilityPath> {
        let mut by_path: BTreeMap<&CapabilityPath, Vec<bool>> = BTreeMap::new();
        for check in &self.checks {
            by_path.entry(&check.path).or_default().push(check.passed());
        }
        by_path
            .into_iter()
            .filter(|(_, results)| match self.policy {
                ConformancePolicy::Strict => results.iter().any(|ok| !ok),
                ConformancePolicy::AnyProviderPerCapability => results.iter().all(|ok| !ok),
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn passed(&self) -> bool {
        self.failing_capabilities().is_empty()
    }
}

pub struct ConformanceService {
    contracts: Arc<ContractStore>,
    policy: ConformancePolicy,
}

impl ConformanceService {
    pub fn new(contracts: Arc<ContractStore>) -> Self {
        Self {
            contracts,
            policy: ConformancePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConformancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn contracts(&self) -> &ContractStore {
        &self.contracts
    }

    pub fn check_envelope(&self, path: &CapabilityPath, envelope: &StandardizedEnvelope) -> Result<()> {
        self.contracts.check(path, &envelope.standardized_response)
    }

    /// Logs a mismatch without failing the call.
    pub fn advise(&self, path: &CapabilityPath, envelope: &StandardizedEnvelope) {
        if self.contracts.get(path).is_none() {
            debug!(capability = %path, "No contract to check response against");
            return;
        }
        if let Err(error) = self.check_envelope(path, envelope) {
            warn!(provider = %envelope.provider, capability = %path, error = %error, "Response does not match its contract");
        }
    }

    /// Checks every recorded sample against the contract of its capability.
    pub fn verify_samples(&self, samples: &dyn SampleRepository) -> Result<ConformanceReport> {
        let mut checks = Vec::new();
        for (provider, path) in samples.list()? {
            let failure = samples
                .sample(&provider, &path)
                .and_then(|sample| self.contracts.check(&path, &sample.standardized_response))
                .err()
                .map(|e| e.to_string());
            checks.push(SampleCheck {
                provider,
                path,
                failure,
            });
        }

        let report = ConformanceReport {
            policy: self.policy,
            checks,
        };
        info!(
            samples = report.checks.len(),
            failures = report.failures().count(),
            passed = report.passed(),
            "Verified recorded samples"
        );
        Ok(report)
    }
}
