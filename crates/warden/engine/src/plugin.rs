//! The plugin execution boundary and the static plugin registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use warden_types::{PackageId, PluginResult};

use crate::error::PluginError;

/// An executable unit emitted from a package container.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Run once. `previous` is the parent step's full result, secure outputs
    /// included, when there is one.
    async fn execute(&self, previous: Option<&PluginResult>) -> Result<PluginResult, PluginError>;
}

/// Builds a plugin from its merged configuration.
pub type PluginFactory =
    Arc<dyn Fn(&Value) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync>;

/// Statically known plugin implementations, keyed by plugin package id.
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<PackageId, PluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, package: PackageId, factory: F) -> Result<(), PluginError>
    where
        F: Fn(&Value) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write().map_err(|_| PluginError::LockPoisoned)?;
        factories.insert(package, Arc::new(factory));
        Ok(())
    }

    pub fn with<F>(self, package: PackageId, factory: F) -> Result<Self, PluginError>
    where
        F: Fn(&Value) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.register(package, factory)?;
        Ok(self)
    }

    pub fn contains(&self, package: &PackageId) -> bool {
        self.factories
            .read()
            .map(|f| f.contains_key(package))
            .unwrap_or(false)
    }

    pub fn packages(&self) -> Vec<PackageId> {
        self.factories
            .read()
            .map(|f| f.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Instantiate the plugin registered for `package`.
    pub fn emit(&self, package: &PackageId, configuration: &Value) -> Result<Box<dyn Plugin>, PluginError> {
        let factory = {
            let factories = self.factories.read().map_err(|_| PluginError::LockPoisoned)?;
            factories
                .get(package)
                .cloned()
                .ok_or(PluginError::UnknownPlugin(*package))?
        };
        factory(configuration)
    }
}
