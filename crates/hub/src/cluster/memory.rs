//! In-memory cluster
//!
//! Holds tenants, spawner definitions, namespaces and pods in maps. Pods
//! are reported `Running` as soon as they are created unless another
//! starting phase is set. Used by the test
//! suites and for local development without a cluster.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dossier_crd::{Spawner, Tenant};
use k8s_openapi::api::core::v1::{Namespace, Pod, PodStatus};
use kube::core::ErrorResponse;
use kube::ResourceExt;

use super::ClusterApi;

#[derive(Default)]
struct State {
    tenants: BTreeMap<String, Tenant>,
    spawners: BTreeMap<String, Spawner>,
    namespaces: BTreeMap<String, Namespace>,
    pods: BTreeMap<(String, String), Pod>,
    failure: Option<u16>,
    start_phase: Option<String>,
    next_ip: u8,
}

#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

fn not_found(kind: &str, name: &str) -> kube::Error {
    api_error(404, "NotFound", format!("{kind} \"{name}\" not found"))
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a poisoned map is still usable; the writer panicked between whole inserts
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check(&self) -> kube::Result<MutexGuard<'_, State>> {
        let state = self.lock();
        match state.failure {
            Some(code) => Err(api_error(code, "InternalError", "injected failure".into())),
            None => Ok(state),
        }
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        self.lock().tenants.insert(tenant.name_any(), tenant);
    }

    pub fn remove_tenant(&self, name: &str) {
        self.lock().tenants.remove(name);
    }

    pub fn insert_spawner(&self, spawner: Spawner) {
        self.lock().spawners.insert(spawner.name_any(), spawner);
    }

    pub fn remove_spawner(&self, name: &str) {
        self.lock().spawners.remove(name);
    }

    /// Make every subsequent call fail with the given HTTP status code.
    pub fn fail_with(&self, code: Option<u16>) {
        self.lock().failure = code;
    }

    /// Phase new pods report instead of `Running`.
    pub fn start_pods_in(&self, phase: &str) {
        self.lock().start_phase = Some(phase.to_string());
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.lock().namespaces.get(name).cloned()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.lock().namespaces.keys().cloned().collect()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn pod_count(&self) -> usize {
        self.lock().pods.len()
    }

    /// Overwrite the phase reported for an existing pod.
    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) {
        if let Some(pod) = self
            .lock()
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            pod.status.get_or_insert_with(PodStatus::default).phase = Some(phase.to_string());
        }
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_tenants(&self) -> kube::Result<Vec<Tenant>> {
        Ok(self.check()?.tenants.values().cloned().collect())
    }

    async fn get_tenant(&self, name: &str) -> kube::Result<Tenant> {
        self.check()?
            .tenants
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("tenants", name))
    }

    async fn list_spawners(&self) -> kube::Result<Vec<Spawner>> {
        Ok(self.check()?.spawners.values().cloned().collect())
    }

    async fn get_spawner(&self, name: &str) -> kube::Result<Spawner> {
        self.check()?
            .spawners
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("spawners", name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> kube::Result<Namespace> {
        let mut state = self.check()?;
        let name = namespace.name_any();
        if state.namespaces.contains_key(&name) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("namespaces \"{name}\" already exists"),
            ));
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace.clone())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> kube::Result<Pod> {
        let mut state = self.check()?;
        let key = (namespace.to_string(), pod.name_any());
        if state.pods.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("pods \"{}\" already exists", key.1),
            ));
        }
        state.next_ip = state.next_ip.wrapping_add(1);
        let mut created = pod.clone();
        created.metadata.namespace = Some(namespace.to_string());
        let phase = state
            .start_phase
            .clone()
            .unwrap_or_else(|| "Running".to_string());
        created.status = Some(PodStatus {
            phase: Some(phase),
            pod_ip: Some(format!("10.0.0.{}", state.next_ip)),
            ..Default::default()
        });
        state.pods.insert(key, created.clone());
        Ok(created)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod> {
        self.check()?
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("pods", name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> kube::Result<()> {
        self.check()?
            .pods
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found("pods", name))
    }
}
