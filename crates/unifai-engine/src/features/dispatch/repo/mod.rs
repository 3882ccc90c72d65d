use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use unifai_core::adapter::BoundAdapter;
use unifai_core::capability::CapabilityRegistry;
use unifai_core::{CoreError, Credentials, Result};

/// Source of connected adapters.
pub trait AdapterRepository: Send + Sync {
    fn adapter(
        &self,
        provider: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn BoundAdapter>>;
}

/// Provider name plus the credential overrides it was connected with.
type InstanceKey = (String, Option<Vec<(String, String)>>);

/// Connects adapters through the registry, once per provider and credential set.
/// Follow-up calls carrying the same overrides (a job poll after its launch)
/// reach the instance that served the first call.
pub struct CachedAdapterRepository {
    registry: Arc<CapabilityRegistry>,
    instances: RwLock<HashMap<InstanceKey, Arc<dyn BoundAdapter>>>,
}

impl CachedAdapterRepository {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn cached(&self) -> usize {
        self.instances.read().map(|i| i.len()).unwrap_or(0)
    }
}

fn poisoned() -> CoreError {
    CoreError::Configuration("adapter cache lock poisoned".to_string())
}

impl AdapterRepository for CachedAdapterRepository {
    fn adapter(
        &self,
        provider: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn BoundAdapter>> {
        let entry = self.registry.provider(provider)?;
        let key: InstanceKey = (provider.to_string(), credentials.map(Credentials::sorted_pairs));

        if let Some(adapter) = self.instances.read().map_err(|_| poisoned())?.get(&key) {
            return Ok(Arc::clone(adapter));
        }

        let mut instances = self.instances.write().map_err(|_| poisoned())?;
        if let Some(adapter) = instances.get(&key) {
            return Ok(Arc::clone(adapter));
        }
        let adapter = entry.connect(credentials)?;
        debug!(
            provider = %provider,
            overrides = credentials.is_some(),
            "Connected adapter"
        );
        instances.insert(key, Arc::clone(&adapter));
        Ok(adapter)
    }
}
