use std::path::PathBuf;
use std::time::Duration;
use unifai_core::{CoreError, Result};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_POLL_MAX_WAIT_MS: u64 = 600_000;
const DEFAULT_DATA_DIR: &str = "data";

/// Engine settings, read from `UNIFAI_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Holds `constraints/`, `contracts/` and `samples/`.
    pub data_dir: PathBuf,
    /// Upper bound of the random delay added to fake calls.
    pub fake_delay_ms: u64,
    pub poll_interval: Duration,
    pub poll_max_wait: Duration,
    /// Check live responses against their contract and log mismatches.
    pub check_responses: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            fake_delay_ms: 0,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_max_wait: Duration::from_millis(DEFAULT_POLL_MAX_WAIT_MS),
            check_responses: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(raw) => raw.parse::<u64>().map_err(|e| {
                    CoreError::Configuration(format!("{key}='{raw}' is not a number: {e}"))
                }),
                None => Ok(default),
            }
        };

        let poll_interval_ms = number("UNIFAI_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        if poll_interval_ms == 0 {
            return Err(CoreError::Configuration(
                "UNIFAI_POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let check_responses = match lookup("UNIFAI_CHECK_RESPONSES").as_deref().map(str::trim) {
            None | Some("") => false,
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            Some(other) => {
                return Err(CoreError::Configuration(format!(
                    "UNIFAI_CHECK_RESPONSES='{other}' is not a boolean"
                )))
            }
        };

        Ok(Self {
            data_dir: lookup("UNIFAI_DATA_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            fake_delay_ms: number("UNIFAI_FAKE_DELAY_MS", 0)?,
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_max_wait: Duration::from_millis(number(
                "UNIFAI_POLL_MAX_WAIT_MS",
                DEFAULT_POLL_MAX_WAIT_MS,
            )?),
            check_responses,
        })
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn constraints_dir(&self) -> PathBuf {
        self.data_dir.join("constraints")
    }

    pub fn contracts_dir(&self) -> PathBuf {
        self.data_dir.join("contracts")
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.data_dir.join("samples")
    }
}
