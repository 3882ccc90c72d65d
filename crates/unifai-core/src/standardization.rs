//! Structural contracts for standardized responses.
//!
//! A contract is a sample response. A candidate conforms when it has the same
//! shape: identical key sets, matching leaf types (integers and floats are
//! interchangeable) and, for lists, a matching first element.

use crate::{CapabilityPath, CoreError, Result};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchReason {
    Type {
        expected: &'static str,
        found: &'static str,
    },
    Keys {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

/// First point where a candidate diverges from its contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// `$`-rooted path, e.g. `$.items[0].label`.
    pub path: String,
    pub reason: MismatchReason,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            MismatchReason::Type { expected, found } => {
                write!(f, "{}: expected {expected}, found {found}", self.path)
            }
            MismatchReason::Keys {
                missing,
                unexpected,
            } => {
                write!(f, "{}: key mismatch", self.path)?;
                if !missing.is_empty() {
                    write!(f, ", missing [{}]", missing.join(", "))?;
                }
                if !unexpected.is_empty() {
                    write!(f, ", unexpected [{}]", unexpected.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn conforms(contract: &Value, candidate: &Value) -> std::result::Result<(), Mismatch> {
    compare(contract, candidate, &mut String::from("$"))
}

fn compare(contract: &Value, candidate: &Value, path: &mut String) -> std::result::Result<(), Mismatch> {
    match (contract, candidate) {
        (Value::Object(expected), Value::Object(found)) => {
            let expected_keys: BTreeSet<&String> = expected.keys().collect();
            let found_keys: BTreeSet<&String> = found.keys().collect();

            if expected_keys != found_keys {
                let missing: Vec<String> = expected_keys
                    .difference(&found_keys)
                    .map(|k| k.to_string())
                    .collect();
                let unexpected: Vec<String> = found_keys
                    .difference(&expected_keys)
                    .map(|k| k.to_string())
                    .collect();
                if let Some(first) = missing.first().or_else(|| unexpected.first()) {
                    path.push('.');
                    path.push_str(first);
                }
                return Err(Mismatch {
                    path: path.clone(),
                    reason: MismatchReason::Keys {
                        missing,
                        unexpected,
                    },
                });
            }

            for (key, expected_value) in expected {
                let len = path.len();
                path.push('.');
                path.push_str(key);
                compare(expected_value, &found[key], path)?;
                path.truncate(len);
            }
            Ok(())
        }
        (Value::Array(expected), Value::Array(found)) => match (expected.first(), found.first()) {
            (Some(expected_first), Some(found_first)) => {
                let len = path.len();
                path.push_str("[0]");
                compare(expected_first, found_first, path)?;
                path.truncate(len);
                Ok(())
            }
            _ => Ok(()),
        },
        _ if type_name(contract) == type_name(candidate) => Ok(()),
        _ => Err(Mismatch {
            path: path.clone(),
            reason: MismatchReason::Type {
                expected: type_name(contract),
                found: type_name(candidate),
            },
        }),
    }
}

/// Contracts keyed by capability path, loaded from `<feature>__<subfeature>[__<phase>].json`.
#[derive(Debug, Clone, Default)]
pub struct ContractStore {
    contracts: HashMap<CapabilityPath, Value>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: CapabilityPath, contract: Value) {
        self.contracts.insert(path, contract);
    }

    pub fn get(&self, path: &CapabilityPath) -> Option<&Value> {
        self.contracts.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &CapabilityPath> {
        self.contracts.keys()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn load_dir(&mut self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let file = entry
                .map_err(|e| CoreError::Configuration(e.to_string()))?
                .path();
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(path) = file
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CapabilityPath::from_file_stem)
            else {
                debug!(file = %file.display(), "Skipping file without a capability name");
                continue;
            };

            let json = std::fs::read_to_string(&file).map_err(|e| {
                CoreError::Configuration(format!("cannot read {}: {e}", file.display()))
            })?;
            let contract: Value = serde_json::from_str(&json).map_err(|e| {
                CoreError::Configuration(format!("invalid contract {}: {e}", file.display()))
            })?;
            self.insert(path, contract);
        }

        info!(dir = %dir.display(), contracts = self.len(), "Loaded contracts");
        Ok(())
    }

    pub fn check(&self, path: &CapabilityPath, candidate: &Value) -> Result<()> {
        let contract = self
            .get(path)
            .ok_or_else(|| CoreError::Configuration(format!("no contract for {path}")))?;
        conforms(contract, candidate)
            .map_err(|mismatch| CoreError::ContractViolation(format!("{path}: {mismatch}")))
    }
}
