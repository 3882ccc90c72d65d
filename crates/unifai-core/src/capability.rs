use crate::adapter::{Operation, ProviderEntry};
use crate::{Capability, CapabilityPath, CoreError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Leaf of [`CapabilityMap`]: `true` for a phase-less subfeature, otherwise its phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubfeatureEntry {
    Supported(bool),
    Phases(BTreeMap<String, bool>),
}

impl SubfeatureEntry {
    pub fn supports(&self, phase: Option<&str>) -> bool {
        match (self, phase) {
            (Self::Supported(supported), None) => *supported,
            (Self::Phases(phases), Some(phase)) => phases.get(phase).copied().unwrap_or(false),
            _ => false,
        }
    }
}

/// `provider -> feature -> subfeature -> entry`
pub type CapabilityMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, SubfeatureEntry>>>;

/// Optional narrowing of a capability listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityFilter {
    pub provider: Option<String>,
    pub feature: Option<String>,
    pub subfeature: Option<String>,
}

impl CapabilityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn subfeature(mut self, subfeature: impl Into<String>) -> Self {
        self.subfeature = Some(subfeature.into());
        self
    }

    fn matches(&self, provider: &str, path: &CapabilityPath) -> bool {
        self.provider.as_deref().map_or(true, |p| p == provider)
            && self.feature.as_deref().map_or(true, |f| f == path.feature)
            && self
                .subfeature
                .as_deref()
                .map_or(true, |s| s == path.subfeature)
    }
}

/// Registry of provider adapters and the capabilities each one registers
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    providers: BTreeMap<String, ProviderEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ProviderEntry>) -> Result<Self> {
        let mut registry = Self::new();
        for entry in entries {
            registry.register(entry)?;
        }
        Ok(registry)
    }

    /// Register an adapter. One entry per provider name.
    pub fn register(&mut self, entry: ProviderEntry) -> Result<()> {
        let name = entry.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(CoreError::Configuration(format!(
                "provider '{name}' is registered more than once"
            )));
        }
        debug!(provider = %name, operations = entry.operations().len(), "Registered provider");
        self.providers.insert(name, entry);
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Result<&ProviderEntry> {
        self.providers
            .get(name)
            .ok_or_else(|| CoreError::Configuration(format!("no adapter for provider '{name}'")))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn implements(&self, provider: &str, path: &CapabilityPath, operation: Operation) -> bool {
        self.providers
            .get(provider)
            .map(|entry| entry.implements(path, operation))
            .unwrap_or(false)
    }

    pub fn list_capabilities(&self, filter: &CapabilityFilter) -> Vec<Capability> {
        let mut capabilities = BTreeSet::new();
        for (name, entry) in &self.providers {
            for path in entry.paths() {
                if filter.matches(name, &path) {
                    capabilities.insert(Capability::new(name.clone(), &path));
                }
            }
        }
        capabilities.into_iter().collect()
    }

    /// Providers implementing a given feature/subfeature (and phase, when given).
    pub fn list_providers(&self, path: &CapabilityPath) -> Vec<String> {
        self.providers
            .iter()
            .filter(|(_, entry)| {
                entry.paths().iter().any(|p| {
                    p.feature == path.feature
                        && p.subfeature == path.subfeature
                        && (path.phase.is_none() || p.phase == path.phase)
                })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// `provider -> feature -> subfeature -> (true | {phase: true})`
    pub fn as_dict(&self, filter: &CapabilityFilter) -> CapabilityMap {
        let mut root = CapabilityMap::new();
        for capability in self.list_capabilities(filter) {
            let entry = root
                .entry(capability.provider)
                .or_default()
                .entry(capability.feature)
                .or_default()
                .entry(capability.subfeature);
            match capability.phase {
                None => {
                    entry.or_insert(SubfeatureEntry::Supported(true));
                }
                Some(phase) => {
                    let slot = entry.or_insert_with(|| SubfeatureEntry::Phases(BTreeMap::new()));
                    if let SubfeatureEntry::Phases(phases) = &mut *slot {
                        phases.insert(phase, true);
                    } else {
                        *slot = SubfeatureEntry::Phases(BTreeMap::from([(phase, true)]));
                    }
                }
            }
        }
        root
    }
}

/// Process-wide registry slot with a single-flight build.
///
/// Concurrent first callers wait on the build lock instead of building twice.
/// An empty registry counts as missing and is rebuilt on the next access.
pub struct RegistryCache {
    slot: RwLock<Option<Arc<CapabilityRegistry>>>,
    build_lock: Mutex<()>,
}

impl RegistryCache {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<Arc<CapabilityRegistry>> {
        self.slot
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .filter(|registry| !registry.is_empty())
    }

    pub fn get_or_build<F>(&self, build: F) -> Result<Arc<CapabilityRegistry>>
    where
        F: FnOnce() -> Result<CapabilityRegistry>,
    {
        if let Some(registry) = self.get() {
            return Ok(registry);
        }

        let _guard = self
            .build_lock
            .lock()
            .map_err(|_| CoreError::Configuration("registry build lock poisoned".to_string()))?;

        if let Some(registry) = self.get() {
            return Ok(registry);
        }

        let registry = Arc::new(build()?);
        info!(providers = registry.len(), "Capability registry built");

        let mut slot = self
            .slot
            .write()
            .map_err(|_| CoreError::Configuration("registry slot lock poisoned".to_string()))?;
        *slot = Some(Arc::clone(&registry));
        Ok(registry)
    }

    pub fn reset(&self) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = None;
        }
    }
}

impl Default for RegistryCache {
    fn default() -> Self {
        Self::new()
    }
}

pub static GLOBAL_REGISTRY: RegistryCache = RegistryCache::new();
