use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;
use unifai_core::{CapabilityPath, CoreError, ProviderResponse, Result};

/// Recorded provider responses, replayed by fake calls.
pub trait SampleRepository: Send + Sync {
    fn sample(&self, provider: &str, path: &CapabilityPath) -> Result<ProviderResponse>;

    /// Every recorded `(provider, capability)` pair.
    fn list(&self) -> Result<Vec<(String, CapabilityPath)>>;
}

fn missing(provider: &str, path: &CapabilityPath) -> CoreError {
    CoreError::Configuration(format!("no recorded sample for {provider} {path}"))
}

#[derive(Clone, Default)]
pub struct InMemorySampleRepository {
    storage: Arc<RwLock<BTreeMap<(String, CapabilityPath), ProviderResponse>>>,
}

impl InMemorySampleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        provider: impl Into<String>,
        path: CapabilityPath,
        sample: ProviderResponse,
    ) -> Result<()> {
        let mut storage = self
            .storage
            .write()
            .map_err(|_| CoreError::Configuration("sample store lock poisoned".to_string()))?;
        storage.insert((provider.into(), path), sample);
        Ok(())
    }
}

impl SampleRepository for InMemorySampleRepository {
    fn sample(&self, provider: &str, path: &CapabilityPath) -> Result<ProviderResponse> {
        let storage = self
            .storage
            .read()
            .map_err(|_| CoreError::Configuration("sample store lock poisoned".to_string()))?;
        storage
            .get(&(provider.to_string(), path.clone()))
            .cloned()
            .ok_or_else(|| missing(provider, path))
    }

    fn list(&self) -> Result<Vec<(String, CapabilityPath)>> {
        let storage = self
            .storage
            .read()
            .map_err(|_| CoreError::Configuration("sample store lock poisoned".to_string()))?;
        Ok(storage.keys().cloned().collect())
    }
}

/// Samples on disk at `<root>/<provider>/<feature>__<subfeature>[__<phase>].json`,
/// read on every access.
#[derive(Debug, Clone)]
pub struct FsSampleRepository {
    root: PathBuf,
}

impl FsSampleRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file(&self, provider: &str, path: &CapabilityPath) -> PathBuf {
        self.root
            .join(provider)
            .join(format!("{}.json", path.file_stem()))
    }

    fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {e}", dir.display()))
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(
                entry
                    .map_err(|e| CoreError::Configuration(e.to_string()))?
                    .path(),
            );
        }
        paths.sort();
        Ok(paths)
    }
}

impl SampleRepository for FsSampleRepository {
    fn sample(&self, provider: &str, path: &CapabilityPath) -> Result<ProviderResponse> {
        let file = self.file(provider, path);
        if !file.is_file() {
            return Err(missing(provider, path));
        }
        let json = std::fs::read_to_string(&file).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {e}", file.display()))
        })?;
        debug!(file = %file.display(), "Replaying recorded sample");
        serde_json::from_str(&json).map_err(|e| {
            CoreError::Configuration(format!("invalid sample {}: {e}", file.display()))
        })
    }

    fn list(&self) -> Result<Vec<(String, CapabilityPath)>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut samples = Vec::new();
        for provider_dir in Self::read_dir(&self.root)? {
            if !provider_dir.is_dir() {
                continue;
            }
            let Some(provider) = provider_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for file in Self::read_dir(&provider_dir)? {
                if file.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(path) = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(CapabilityPath::from_file_stem)
                {
                    samples.push((provider.to_string(), path));
                }
            }
        }
        Ok(samples)
    }
}
