//! Workload pod definition
//!
//! Defines the Kubernetes Pod spec for single-user server containers.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};

use super::BackendArgs;
use crate::config::KubernetesConfig;
use crate::forms::{to_quantity, WorkloadOverride};
use crate::namespace::escape_username;

pub const USER_LABEL: &str = "dossier.unito.it/user";
pub const SERVER_LABEL: &str = "dossier.unito.it/server";
pub const TENANT_LABEL: &str = "dossier.unito.it/tenant";
pub const USERNAME_ANNOTATION: &str = "dossier.unito.it/username";

/// Pod name for a user's server slot
pub fn pod_name(user: &str, server_name: &str) -> String {
    if server_name.is_empty() {
        format!("dossier-{}", escape_username(user))
    } else {
        format!(
            "dossier-{}-{}",
            escape_username(user),
            escape_username(server_name)
        )
    }
}

/// Workload pod specification
#[derive(Debug, Clone)]
pub struct WorkloadPodSpec<'a> {
    pub namespace: &'a str,
    pub tenant: &'a str,
    pub args: &'a BackendArgs,
    pub settings: &'a KubernetesConfig,
    pub workload: &'a WorkloadOverride,
}

/// Pod phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// IP address assigned to a pod, once scheduled
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .pod_ip
        .as_deref()
        .filter(|ip| !ip.is_empty())
}

impl WorkloadPodSpec<'_> {
    pub fn pod_name(&self) -> String {
        pod_name(&self.args.user, &self.args.server_name)
    }

    /// Build Kubernetes Pod object
    pub fn build_pod(&self) -> Pod {
        let labels = BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "dossier".to_string()),
            (
                "app.kubernetes.io/component".to_string(),
                "singleuser-server".to_string(),
            ),
            (USER_LABEL.to_string(), escape_username(&self.args.user)),
            (
                SERVER_LABEL.to_string(),
                escape_username(&self.args.server_name),
            ),
            (TENANT_LABEL.to_string(), self.tenant.to_string()),
        ]);

        let annotations = BTreeMap::from([(
            USERNAME_ANNOTATION.to_string(),
            self.args.user.clone(),
        )]);

        let env_vars = self
            .args
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        let mut container_args = self.args.args.clone();
        container_args.push("--ip=0.0.0.0".to_string());
        container_args.push(format!("--port={}", self.settings.port));

        let image = self
            .workload
            .image
            .clone()
            .unwrap_or_else(|| self.settings.image.clone());

        let container = Container {
            name: "notebook".to_string(),
            image: Some(image),
            command: (!self.args.cmd.is_empty()).then(|| self.args.cmd.clone()),
            args: Some(container_args),
            env: Some(env_vars),
            resources: Some(build_resources(self.settings, self.workload)),
            ports: Some(vec![ContainerPort {
                container_port: i32::from(self.settings.port),
                name: Some("notebook-port".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let spec = PodSpec {
            containers: vec![container],
            restart_policy: Some("OnFailure".to_string()),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(self.pod_name()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        }
    }
}

/// Requests and limits: overrides first, then configured quantities
fn build_resources(settings: &KubernetesConfig, workload: &WorkloadOverride) -> ResourceRequirements {
    fn pick(value: Option<f64>, fallback: Option<&String>) -> Option<Quantity> {
        value
            .map(to_quantity)
            .or_else(|| fallback.map(|q| Quantity(q.clone())))
    }

    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some(q) = pick(workload.cpu_guarantee, settings.cpu_guarantee.as_ref()) {
        requests.insert("cpu".to_string(), q);
    }
    if let Some(q) = pick(workload.mem_guarantee, settings.mem_guarantee.as_ref()) {
        requests.insert("memory".to_string(), q);
    }
    if let Some(q) = pick(workload.cpu_limit, settings.cpu_limit.as_ref()) {
        limits.insert("cpu".to_string(), q);
    }
    if let Some(q) = pick(workload.mem_limit, settings.mem_limit.as_ref()) {
        limits.insert("memory".to_string(), q);
    }

    ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    }
}
