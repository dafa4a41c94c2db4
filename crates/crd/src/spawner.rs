//! Dossier `Spawner` resource
//!
//! A spawner definition names a backend implementation by class reference,
//! the parameters it is constructed with, and optionally the tenants it is
//! restricted to.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dossier.unito.it",
    version = "v1alpha1",
    kind = "Spawner",
    plural = "spawners"
)]
pub struct SpawnerSpec {
    /// Class reference of the backend implementation.
    pub class: String,
    /// Construction parameters, merged over the inherited baseline.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Tenants allowed to use this spawner. Absent or empty means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenants: Option<Vec<String>>,
}

impl Spawner {
    /// Whether the spawner may be used by sessions bound to `tenant`.
    pub fn applies_to(&self, tenant: &str) -> bool {
        match self.spec.tenants.as_deref() {
            None | Some([]) => true,
            Some(tenants) => tenants.iter().any(|t| t == tenant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spawner(tenants: Option<Vec<&str>>) -> Spawner {
        Spawner::new(
            "gpu",
            SpawnerSpec {
                class: "dossier.spawners.ssh.SSHSpawner".to_string(),
                parameters: BTreeMap::new(),
                tenants: tenants.map(|t| t.into_iter().map(String::from).collect()),
            },
        )
    }

    #[test]
    fn test_unrestricted_spawner_applies_everywhere() {
        assert!(spawner(None).applies_to("physics"));
        assert!(spawner(Some(vec![])).applies_to("physics"));
    }

    #[test]
    fn test_restricted_spawner() {
        let s = spawner(Some(vec!["physics", "chemistry"]));
        assert!(s.applies_to("chemistry"));
        assert!(!s.applies_to("biology"));
    }

    #[test]
    fn test_deserialize_spawner() {
        let s: Spawner = serde_json::from_value(json!({
            "apiVersion": "dossier.unito.it/v1alpha1",
            "kind": "Spawner",
            "metadata": {
                "name": "hpc",
                "annotations": { "dossier.unito.it/display-name": "HPC login node" }
            },
            "spec": {
                "class": "dossier.spawners.ssh.SSHSpawner",
                "parameters": { "remote_host": "login.hpc.example", "remote_port": "2222" },
                "tenants": ["physics"]
            }
        }))
        .unwrap();

        assert_eq!(s.spec.class, "dossier.spawners.ssh.SSHSpawner");
        assert_eq!(s.spec.parameters["remote_host"], json!("login.hpc.example"));
        assert!(s.applies_to("physics"));
    }

    #[test]
    fn test_parameters_default_to_empty() {
        let s: Spawner = serde_json::from_value(json!({
            "apiVersion": "dossier.unito.it/v1alpha1",
            "kind": "Spawner",
            "metadata": { "name": "plain" },
            "spec": { "class": "dossier.spawners.kubespawner.DossierKubeSpawner" }
        }))
        .unwrap();

        assert!(s.spec.parameters.is_empty());
        assert!(s.spec.tenants.is_none());
    }
}
