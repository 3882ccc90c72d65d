pub mod features;
pub mod standard;

pub use features::assemblyai::AssemblyAiAdapter;
pub use features::local::LocalAdapter;
pub use features::openai::OpenAiAdapter;

use serde::Serialize;
use serde_json::Value;
use unifai_core::adapter::{ProviderEntry, ProviderError, ProviderResult};
use unifai_core::{CoreError, Credentials, ProviderResponse, Result};

/// Registry entries for every adapter shipped with this crate.
pub fn builtin_entries() -> Result<Vec<ProviderEntry>> {
    Ok(vec![
        ProviderEntry::of::<OpenAiAdapter>()?,
        ProviderEntry::of::<AssemblyAiAdapter>()?,
        ProviderEntry::of::<LocalAdapter>()?,
    ])
}

/// Pairs the raw upstream payload with its typed standardized form.
pub fn standardize<T: Serialize>(
    original: Value,
    standardized: &T,
) -> ProviderResult<ProviderResponse> {
    ProviderResponse::from_typed(original, standardized)
        .map_err(|e| ProviderError::new(e.to_string()))
}

/// A credential override, else the named environment variable.
pub(crate) fn credential_or_env(
    credentials: Option<&Credentials>,
    key: &str,
    env_var: &str,
    provider: &str,
) -> Result<String> {
    if let Some(value) = credentials.and_then(|c| c.get(key)) {
        return Ok(value.to_string());
    }
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            CoreError::Configuration(format!(
                "{provider}: no '{key}' credential given and {env_var} is not set"
            ))
        })
}
