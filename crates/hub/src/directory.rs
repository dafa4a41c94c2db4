//! Tenant and spawner definition lookup
//!
//! A missing object is `Ok(None)`. Every other cluster failure surfaces
//! as [`DossierError::Transport`].

use dossier_crd::{Spawner, Tenant};
use tracing::warn;

use crate::cluster::{is_not_found, SharedCluster};
use crate::error::{DossierError, Result};

#[derive(Clone)]
pub struct Directory {
    cluster: SharedCluster,
}

impl Directory {
    pub fn new(cluster: SharedCluster) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &SharedCluster {
        &self.cluster
    }

    pub async fn tenants(&self) -> Result<Vec<Tenant>> {
        self.cluster.list_tenants().await.map_err(|e| {
            warn!(error = %e, "Failed to list tenants");
            DossierError::Transport(e)
        })
    }

    pub async fn tenant(&self, name: &str) -> Result<Option<Tenant>> {
        match self.cluster.get_tenant(name).await {
            Ok(tenant) => Ok(Some(tenant)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                warn!(tenant = %name, error = %e, "Failed to read tenant");
                Err(DossierError::Transport(e))
            }
        }
    }

    pub async fn spawners(&self) -> Result<Vec<Spawner>> {
        self.cluster.list_spawners().await.map_err(|e| {
            warn!(error = %e, "Failed to list spawners");
            DossierError::Transport(e)
        })
    }

    pub async fn spawner(&self, name: &str) -> Result<Option<Spawner>> {
        match self.cluster.get_spawner(name).await {
            Ok(spawner) => Ok(Some(spawner)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                warn!(spawner = %name, error = %e, "Failed to read spawner");
                Err(DossierError::Transport(e))
            }
        }
    }
}
