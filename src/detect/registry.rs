use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::config::ModelSettings;

use super::backend::{DetectorBackend, SharedDetector};
use super::backends::StubBackend;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::predict` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedDetector>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend under `key`. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, key: &str, backend: B) {
        if self.default_name.is_none() {
            self.default_name = Some(key.to_string());
        }
        self.backends
            .insert(key.to_string(), Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by key.
    pub fn set_default(&mut self, key: &str) -> Result<()> {
        if !self.backends.contains_key(key) {
            return Err(anyhow!("backend '{}' not registered", key));
        }
        self.default_name = Some(key.to_string());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<SharedDetector> {
        self.backends.get(key).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedDetector> {
        self.default_name.as_ref().and_then(|key| self.get(key))
    }

    /// Registered keys, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.backends.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a registry holding the configured backend as its default.
///
/// Backends are constructed unloaded; the caller decides when to `load`.
pub fn build_registry(settings: &ModelSettings) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    match settings.backend.as_str() {
        "stub" => registry.register("stub", StubBackend::new()),
        #[cfg(feature = "backend-tract")]
        "tract" => registry.register("tract", super::backends::TractBackend::new(settings)?),
        other => {
            return Err(anyhow!(
                "unknown detector backend '{}' (available: {})",
                other,
                available_backends().join(", ")
            ))
        }
    }
    registry.set_default(&settings.backend)?;
    Ok(registry)
}

/// Backend keys compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut names = vec!["stub"];
    if cfg!(feature = "backend-tract") {
        names.push("tract");
    }
    names
}
