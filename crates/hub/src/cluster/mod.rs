//! Cluster API access
//!
//! Everything the hub needs from Kubernetes goes through [`ClusterApi`] so
//! the tenancy logic can run against a real cluster or an in-memory one.

mod memory;

pub use memory::MemoryCluster;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dossier_crd::{Spawner, Tenant};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    Client,
};

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_tenants(&self) -> kube::Result<Vec<Tenant>>;
    async fn get_tenant(&self, name: &str) -> kube::Result<Tenant>;
    async fn list_spawners(&self) -> kube::Result<Vec<Spawner>>;
    async fn get_spawner(&self, name: &str) -> kube::Result<Spawner>;
    async fn create_namespace(&self, namespace: &Namespace) -> kube::Result<Namespace>;
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> kube::Result<Pod>;
    async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> kube::Result<()>;
}

pub type SharedCluster = Arc<dyn ClusterApi>;

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

/// [`ClusterApi`] backed by a live Kubernetes client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster or kubeconfig settings
    pub async fn connect(request_timeout: Duration) -> Result<Self> {
        let mut config = kube::Config::infer().await?;
        config.connect_timeout = Some(request_timeout);
        config.read_timeout = Some(request_timeout);
        config.write_timeout = Some(request_timeout);
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_tenants(&self) -> kube::Result<Vec<Tenant>> {
        let tenants: Api<Tenant> = Api::all(self.client.clone());
        Ok(tenants.list(&ListParams::default()).await?.items)
    }

    async fn get_tenant(&self, name: &str) -> kube::Result<Tenant> {
        let tenants: Api<Tenant> = Api::all(self.client.clone());
        tenants.get(name).await
    }

    async fn list_spawners(&self) -> kube::Result<Vec<Spawner>> {
        let spawners: Api<Spawner> = Api::all(self.client.clone());
        Ok(spawners.list(&ListParams::default()).await?.items)
    }

    async fn get_spawner(&self, name: &str) -> kube::Result<Spawner> {
        let spawners: Api<Spawner> = Api::all(self.client.clone());
        spawners.get(name).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> kube::Result<Namespace> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        namespaces.create(&PostParams::default(), namespace).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> kube::Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.create(&PostParams::default(), pod).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get(name).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> kube::Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
