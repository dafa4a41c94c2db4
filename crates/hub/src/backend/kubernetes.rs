//! Built-in Kubernetes backend
//!
//! Runs the single-user server as a pod in the tenant namespace of the
//! session, sized by the tenant's policies.

use std::time::Duration;

use async_trait::async_trait;
use dossier_crd::Tenant;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    invalid_parameters, pod::pod_ip, Backend, BackendArgs, Endpoint, Parameters, PodPhase,
    TenantAware, WorkloadPodSpec, WorkloadStatus,
};
use crate::cluster::{is_conflict, is_not_found, SharedCluster};
use crate::config::{Config, KubernetesConfig, TenancyConfig};
use crate::error::{DossierError, Result};
use crate::forms::{options_form, workload_override, OptionsForm, UserOptions, WorkloadOverride};
use crate::namespace::{build_namespace, derive_namespace, escape_username, TemplateVars};

pub const KUBERNETES_CLASS: &str = "dossier.spawners.kubespawner.DossierKubeSpawner";

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct KubeBackend {
    cluster: SharedCluster,
    args: BackendArgs,
    settings: KubernetesConfig,
    tenancy: TenancyConfig,
    tenant: Option<Tenant>,
    namespace: Option<String>,
    workload: WorkloadOverride,
}

impl KubeBackend {
    pub fn new(
        cluster: SharedCluster,
        args: BackendArgs,
        settings: KubernetesConfig,
        tenancy: TenancyConfig,
    ) -> Self {
        Self {
            cluster,
            args,
            settings,
            tenancy,
            tenant: None,
            namespace: None,
            workload: WorkloadOverride::default(),
        }
    }

    /// Build from spawner definition parameters layered over the configured
    /// Kubernetes settings.
    pub fn from_parameters(cluster: SharedCluster, config: &Config, params: &Parameters) -> Result<Self> {
        let args = BackendArgs::from_parameters(KUBERNETES_CLASS, params)?;
        let mut merged = match serde_json::to_value(&config.kubernetes) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Parameters::new(),
        };
        merged.extend(params.clone());
        let settings: KubernetesConfig = serde_json::from_value(serde_json::Value::Object(merged))
            .map_err(|e| invalid_parameters(KUBERNETES_CLASS, &e))?;
        Ok(Self::new(cluster, args, settings, config.tenancy.clone()))
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub const fn workload(&self) -> &WorkloadOverride {
        &self.workload
    }

    pub fn pod_name(&self) -> String {
        super::pod_name(&self.args.user, &self.args.server_name)
    }

    fn template_vars(&self) -> TemplateVars {
        TemplateVars {
            username: escape_username(&self.args.user),
            servername: escape_username(&self.args.server_name),
            ..Default::default()
        }
    }

    /// Namespace before the tenant prefix is applied
    pub fn namespace_base(&self) -> String {
        self.template_vars().expand(&self.settings.namespace_template)
    }

    /// Delete the workload pod. A pod that is already gone counts as deleted.
    async fn delete_pod(&self, namespace: &str, pod_name: &str) -> Result<()> {
        match self.cluster.delete_pod(namespace, pod_name).await {
            Ok(()) => {
                info!(namespace = %namespace, pod_name = %pod_name, "Deleted workload pod");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                warn!(namespace = %namespace, pod_name = %pod_name, "Pod already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_ready(&self, namespace: &str, name: &str) -> Result<Endpoint> {
        let deadline = Instant::now() + Duration::from_secs(self.settings.start_timeout_secs);
        loop {
            let pod = self.cluster.get_pod(namespace, name).await?;
            let phase = PodPhase::of(&pod);
            match (phase, pod_ip(&pod)) {
                (PodPhase::Running, Some(ip)) => {
                    return Ok(Endpoint {
                        host: ip.to_string(),
                        port: self.settings.port,
                    });
                }
                (phase, _) if phase.is_terminated() => {
                    return Err(DossierError::Backend {
                        backend: KUBERNETES_CLASS.to_string(),
                        message: format!("pod {namespace}/{name} terminated during startup ({phase:?})"),
                    });
                }
                _ => debug!(pod = %name, ?phase, "Waiting for pod"),
            }

            if Instant::now() >= deadline {
                return Err(DossierError::Backend {
                    backend: KUBERNETES_CLASS.to_string(),
                    message: format!(
                        "pod {namespace}/{name} not ready after {}s",
                        self.settings.start_timeout_secs
                    ),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Backend for KubeBackend {
    fn class(&self) -> &str {
        KUBERNETES_CLASS
    }

    fn args(&self) -> &BackendArgs {
        &self.args
    }

    async fn start(&mut self) -> Result<Endpoint> {
        let (Some(namespace), Some(tenant)) = (self.namespace.clone(), self.tenant.as_ref()) else {
            return Err(DossierError::Conflict(format!(
                "server {} has no tenant namespace",
                self.args.proxy_spec
            )));
        };
        let tenant_name = tenant.name_any();

        let spec = WorkloadPodSpec {
            namespace: &namespace,
            tenant: &tenant_name,
            args: &self.args,
            settings: &self.settings,
            workload: &self.workload,
        };
        let pod_name = spec.pod_name();
        let pod = spec.build_pod();

        match self.cluster.create_pod(&namespace, &pod).await {
            Ok(_) => {
                info!(user = %self.args.user, namespace = %namespace, pod_name = %pod_name, "Created workload pod");
            }
            Err(e) if is_conflict(&e) => {
                let existing = self.cluster.get_pod(&namespace, &pod_name).await?;
                let phase = PodPhase::of(&existing);
                if phase.is_terminated() {
                    info!(namespace = %namespace, pod_name = %pod_name, ?phase, "Replacing terminated workload pod");
                    self.delete_pod(&namespace, &pod_name).await?;
                    self.cluster.create_pod(&namespace, &pod).await?;
                } else {
                    info!(namespace = %namespace, pod_name = %pod_name, "Workload pod already exists");
                }
            }
            Err(e) => return Err(e.into()),
        }

        match self.wait_for_ready(&namespace, &pod_name).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) => {
                if let Err(cleanup) = self.delete_pod(&namespace, &pod_name).await {
                    warn!(namespace = %namespace, pod_name = %pod_name, error = %cleanup, "Failed to remove pod after failed start");
                }
                Err(e)
            }
        }
    }

    async fn poll(&mut self) -> Result<WorkloadStatus> {
        let Some(namespace) = self.namespace.as_deref() else {
            return Ok(WorkloadStatus::Stopped);
        };
        match self.cluster.get_pod(namespace, &self.pod_name()).await {
            Ok(pod) if PodPhase::of(&pod).is_terminated() => Ok(WorkloadStatus::Stopped),
            Ok(_) => Ok(WorkloadStatus::Running),
            Err(e) if is_not_found(&e) => Ok(WorkloadStatus::Stopped),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(namespace) = self.namespace.clone() else {
            return Ok(());
        };
        self.delete_pod(&namespace, &self.pod_name()).await
    }

    fn state(&self) -> Parameters {
        let mut state = Parameters::new();
        if let Some(namespace) = &self.namespace {
            state.insert("namespace".to_string(), namespace.clone().into());
        }
        state
    }

    fn load_state(&mut self, state: &Parameters) {
        if let Some(namespace) = state.get("namespace").and_then(|v| v.as_str()) {
            self.namespace = Some(namespace.to_string());
        }
    }

    fn tenant_aware(&self) -> Option<&dyn TenantAware> {
        Some(self)
    }

    fn tenant_aware_mut(&mut self) -> Option<&mut dyn TenantAware> {
        Some(self)
    }
}

impl TenantAware for KubeBackend {
    fn tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }

    fn bind_tenant(&mut self, tenant: Tenant) -> Namespace {
        let tenant_name = tenant.name_any();
        let namespace = derive_namespace(&tenant_name, &self.namespace_base());
        let vars = TemplateVars {
            tenant: tenant_name,
            namespace: namespace.clone(),
            ..self.template_vars()
        };

        self.workload = workload_override(&tenant, &self.tenancy, &self.settings, &UserOptions::default())
            .unwrap_or_else(|e| {
                warn!(tenant = %vars.tenant, error = %e, "Using configured workload settings");
                WorkloadOverride::default()
            });
        self.tenant = Some(tenant);
        self.namespace = Some(namespace.clone());

        build_namespace(
            &namespace,
            vars.expand_all(&self.settings.user_namespace_labels),
            vars.expand_all(&self.settings.user_namespace_annotations),
        )
    }

    fn clear_tenant(&mut self) {
        self.tenant = None;
        self.namespace = None;
        self.workload = WorkloadOverride::default();
    }

    fn options_form(&self) -> Option<OptionsForm> {
        options_form(self.tenant.as_ref(), &self.tenancy, &self.settings)
    }

    fn apply_options(&mut self, options: &UserOptions) -> Result<()> {
        let tenant = self
            .tenant
            .as_ref()
            .ok_or_else(|| DossierError::Conflict("no tenant bound".to_string()))?;
        self.workload = workload_override(tenant, &self.tenancy, &self.settings, options)?;
        Ok(())
    }
}
