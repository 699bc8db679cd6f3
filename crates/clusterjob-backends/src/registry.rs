//! Static backend registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::SchedulerBackend;
use crate::conformance::check_backend;
use crate::error::RegistryError;
use crate::{Lpbs, Lsf, Pbs, PbsPro, Sge, Slurm};

/// Backends by name.
///
/// New backends are added with one `register` line in [`BackendRegistry::builtin`]
/// (or at runtime by the embedding program); there is no plugin discovery.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn SchedulerBackend>>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in backends
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Arc::new(Slurm))?;
        registry.register(Arc::new(Pbs))?;
        registry.register(Arc::new(PbsPro))?;
        registry.register(Arc::new(Lpbs))?;
        registry.register(Arc::new(Lsf))?;
        registry.register(Arc::new(Sge))?;
        Ok(registry)
    }

    /// Add a backend after it passes the conformance check
    pub fn register(&mut self, backend: Arc<dyn SchedulerBackend>) -> Result<(), RegistryError> {
        let name = backend.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        check_backend(backend.as_ref())?;
        self.backends.insert(name, backend);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SchedulerBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SchedulerBackend>> {
        self.backends.values()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
