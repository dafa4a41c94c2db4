//! Backend registry
//!
//! Maps the class references used in spawner definitions to factories.
//! Instantiation resolves only against this explicit table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{Backend, KubeBackend, Parameters, SshBackend, KUBERNETES_CLASS, SSH_CLASS};
use crate::cluster::SharedCluster;
use crate::config::Config;
use crate::error::{DossierError, Result};

/// Builds a backend from merged construction parameters
pub type BackendFactory = Box<dyn Fn(&Parameters) -> Result<Box<dyn Backend>> + Send + Sync>;

#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Kubernetes and SSH backends
    pub fn with_builtin(cluster: SharedCluster, config: Arc<Config>) -> Self {
        let mut registry = Self::new();
        registry.register(KUBERNETES_CLASS, move |params| {
            let backend = KubeBackend::from_parameters(cluster.clone(), &config, params)?;
            Ok(Box::new(backend) as Box<dyn Backend>)
        });
        registry.register(SSH_CLASS, |params| {
            Ok(Box::new(SshBackend::from_parameters(params)?) as Box<dyn Backend>)
        });
        registry
    }

    pub fn register<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(&Parameters) -> Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        let class = class.into();
        debug!(class = %class, "Registered backend class");
        self.factories.insert(class, Box::new(factory));
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    pub fn build(&self, class: &str, params: &Parameters) -> Result<Box<dyn Backend>> {
        let factory = self.factories.get(class).ok_or_else(|| {
            DossierError::Configuration(format!("Spawner class {class} is not available"))
        })?;
        factory(params)
    }
}
