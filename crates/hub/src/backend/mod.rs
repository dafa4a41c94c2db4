//! Workload backends
//!
//! A backend provisions one single-user server. Every session starts with
//! the built-in Kubernetes backend; spawner definitions can swap in any
//! implementation registered in the [`BackendRegistry`].

mod kubernetes;
mod pod;
mod registry;
mod ssh;

pub use kubernetes::{KubeBackend, KUBERNETES_CLASS};
pub use pod::{pod_name, PodPhase, WorkloadPodSpec};
pub use registry::{BackendFactory, BackendRegistry};
pub use ssh::{SshBackend, SshSettings, SSH_CLASS};

use std::collections::BTreeMap;

use async_trait::async_trait;
use dossier_crd::Tenant;
use k8s_openapi::api::core::v1::Namespace;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{DossierError, Result};
use crate::forms::{OptionsForm, UserOptions};
use crate::namespace::escape_username;

/// Construction parameters handed to a backend factory
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Session handles every backend is constructed with.
///
/// A backend built from a spawner definition inherits these from the
/// session's built-in backend, with the definition's parameters layered on
/// top.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendArgs {
    pub cmd: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Hub username the workload belongs to
    pub user: String,
    /// Named server slot, empty for the default server
    pub server_name: String,
    pub hub_api_url: String,
    pub oauth_client_id: String,
    /// Route the proxy forwards to this workload
    pub proxy_spec: String,
}

impl BackendArgs {
    pub fn for_session(config: &Config, user: &str, server_name: &str) -> Self {
        let encoded_user = urlencoding::encode(user);
        let proxy_spec = if server_name.is_empty() {
            format!("/user/{encoded_user}/")
        } else {
            format!("/user/{encoded_user}/{}/", urlencoding::encode(server_name))
        };
        let mut oauth_client_id = format!("jupyterhub-user-{}", escape_username(user));
        if !server_name.is_empty() {
            oauth_client_id = format!("{oauth_client_id}-{}", escape_username(server_name));
        }

        let mut env = config.kubernetes.env.clone();
        env.insert("JUPYTERHUB_USER".to_string(), user.to_string());
        env.insert("JUPYTERHUB_SERVER_NAME".to_string(), server_name.to_string());
        env.insert("JUPYTERHUB_API_URL".to_string(), config.server.hub_api_url.clone());
        env.insert("JUPYTERHUB_CLIENT_ID".to_string(), oauth_client_id.clone());
        env.insert("JUPYTERHUB_SERVICE_PREFIX".to_string(), proxy_spec.clone());

        Self {
            cmd: config.kubernetes.cmd.clone(),
            args: config.kubernetes.args.clone(),
            env,
            user: user.to_string(),
            server_name: server_name.to_string(),
            hub_api_url: config.server.hub_api_url.clone(),
            oauth_client_id,
            proxy_spec,
        }
    }

    pub fn to_parameters(&self) -> Parameters {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Parameters::new(),
        }
    }

    pub fn from_parameters(class: &str, params: &Parameters) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(params.clone()))
            .map_err(|e| invalid_parameters(class, &e))
    }

    /// Full command line: `cmd` followed by `args`
    pub fn command_line(&self) -> Vec<String> {
        self.cmd.iter().chain(self.args.iter()).cloned().collect()
    }
}

pub(crate) fn invalid_parameters(class: &str, err: &serde_json::Error) -> DossierError {
    DossierError::Configuration(format!("Invalid parameters for spawner class {class}: {err}"))
}

/// Where a started workload can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadStatus {
    Running,
    Stopped,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Class reference this backend is registered under
    fn class(&self) -> &str;

    fn args(&self) -> &BackendArgs;

    async fn start(&mut self) -> Result<Endpoint>;

    async fn poll(&mut self) -> Result<WorkloadStatus>;

    async fn stop(&mut self) -> Result<()>;

    /// State persisted between hub restarts
    fn state(&self) -> Parameters {
        Parameters::new()
    }

    fn load_state(&mut self, _state: &Parameters) {}

    fn tenant_aware(&self) -> Option<&dyn TenantAware> {
        None
    }

    fn tenant_aware_mut(&mut self) -> Option<&mut dyn TenantAware> {
        None
    }
}

/// Capability of backends that run inside a tenant's namespace
pub trait TenantAware: Send + Sync {
    fn tenant(&self) -> Option<&Tenant>;

    /// Bind the tenant and return the namespace the workload will use
    fn bind_tenant(&mut self, tenant: Tenant) -> Namespace;

    fn clear_tenant(&mut self);

    fn options_form(&self) -> Option<OptionsForm>;

    fn apply_options(&mut self, options: &UserOptions) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_for_default_server() {
        let args = BackendArgs::for_session(&Config::default(), "alice", "");
        assert_eq!(args.proxy_spec, "/user/alice/");
        assert_eq!(args.oauth_client_id, "jupyterhub-user-alice");
        assert_eq!(args.cmd, vec!["jupyterhub-singleuser"]);
        assert_eq!(args.env["JUPYTERHUB_USER"], "alice");
        assert_eq!(args.env["JUPYTERHUB_API_URL"], "http://127.0.0.1:8081/hub/api");
    }

    #[test]
    fn test_args_for_named_server() {
        let args = BackendArgs::for_session(&Config::default(), "Bob Smith", "gpu");
        assert_eq!(args.proxy_spec, "/user/Bob%20Smith/gpu/");
        assert_eq!(args.oauth_client_id, "jupyterhub-user--42ob-20-53mith-gpu");
        assert_eq!(args.env["JUPYTERHUB_SERVICE_PREFIX"], "/user/Bob%20Smith/gpu/");
    }

    #[test]
    fn test_parameters_override_baseline() {
        let args = BackendArgs::for_session(&Config::default(), "alice", "");
        let mut params = args.to_parameters();
        params.insert("cmd".into(), serde_json::json!(["start-notebook.sh"]));
        params.insert("remote_host".into(), serde_json::json!("login.example"));

        let rebuilt = BackendArgs::from_parameters("test", &params).unwrap();
        assert_eq!(rebuilt.cmd, vec!["start-notebook.sh"]);
        assert_eq!(rebuilt.user, "alice");
        assert_eq!(rebuilt.env, args.env);
    }

    #[test]
    fn test_bad_parameters_are_configuration_errors() {
        let mut params = Parameters::new();
        params.insert("cmd".into(), serde_json::json!(42));
        assert!(matches!(
            BackendArgs::from_parameters("test", &params),
            Err(DossierError::Configuration(_))
        ));
    }

    #[test]
    fn test_command_line() {
        let args = BackendArgs {
            cmd: vec!["jupyterhub-singleuser".into()],
            args: vec!["--debug".into()],
            ..Default::default()
        };
        assert_eq!(args.command_line(), vec!["jupyterhub-singleuser", "--debug"]);
    }
}
