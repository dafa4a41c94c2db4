//! Configuration system for the Dossier hub
//!
//! Reads TOML from `$DOSSIER_CONFIG` or `~/.config/dossier/config.toml`.
//! Every section and field is optional.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::forms::Policy;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "DOSSIER_CONFIG";
pub const COOKIE_SECRET_ENV: &str = "DOSSIER_COOKIE_SECRET";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Prefix under which every hub page is mounted
    pub base_url: String,
    /// URL single-user servers use to reach the hub API
    pub hub_api_url: String,
    /// Optional favicon served at `<base_url>favicon.ico`
    pub favicon: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8081,
            base_url: "/hub/".to_string(),
            hub_api_url: "http://127.0.0.1:8081/hub/api".to_string(),
            favicon: None,
        }
    }
}

impl ServerConfig {
    /// Base URL with exactly one leading and one trailing slash.
    pub fn normalized_base_url(&self) -> String {
        let trimmed = self.base_url.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{trimmed}/")
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Cookie carrying the encoded identity record
    pub cookie_name: String,
    /// HMAC key the identity cookie is signed with. Falls back to
    /// `$DOSSIER_COOKIE_SECRET`; cookies never verify while it is empty.
    pub cookie_secret: String,
    /// Derive allow decisions from identity groups matching tenant names
    pub manage_groups: bool,
    pub admin_groups: BTreeSet<String>,
    pub admin_users: BTreeSet<String>,
    pub allowed_users: BTreeSet<String>,
    /// Email domains admitted by the base allow-list
    pub allowed_domains: BTreeSet<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "dossier-session".to_string(),
            cookie_secret: String::new(),
            manage_groups: false,
            admin_groups: BTreeSet::new(),
            admin_users: BTreeSet::new(),
            allowed_users: BTreeSet::new(),
            allowed_domains: BTreeSet::new(),
        }
    }
}

/// Tenancy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Tenant bound for users whose groups match no tenant
    pub default_tenant: Option<String>,
    pub default_image_policy: Policy,
    pub default_resource_policy: Policy,
    /// Stop running workloads and forget bindings on logout
    pub shutdown_on_logout: bool,
}

/// A selectable image profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub slug: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub image: String,
    #[serde(default)]
    pub default: bool,
}

/// Settings of the built-in Kubernetes backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Workload container image
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_cmd")]
    pub cmd: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Port the workload listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base namespace before tenant prefixing
    #[serde(default = "default_namespace_template")]
    pub namespace_template: String,

    #[serde(default = "default_namespace_labels")]
    pub user_namespace_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub user_namespace_annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub cpu_limit: Option<String>,

    #[serde(default)]
    pub cpu_guarantee: Option<String>,

    #[serde(default)]
    pub mem_limit: Option<String>,

    #[serde(default)]
    pub mem_guarantee: Option<String>,

    #[serde(default)]
    pub profiles: Vec<Profile>,

    /// Seconds to wait for a workload to become reachable
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Cluster API request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_image() -> String {
    "quay.io/jupyter/base-notebook:latest".to_string()
}

fn default_cmd() -> Vec<String> {
    vec!["jupyterhub-singleuser".to_string()]
}

const fn default_port() -> u16 {
    8888
}

fn default_namespace_template() -> String {
    "{username}".to_string()
}

fn default_namespace_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/managed-by".to_string(),
            "dossier".to_string(),
        ),
        (
            "capsule.clastix.io/tenant".to_string(),
            "{tenant}".to_string(),
        ),
    ])
}

const fn default_start_timeout() -> u64 {
    300
}

const fn default_request_timeout() -> u64 {
    30
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            cmd: default_cmd(),
            args: Vec::new(),
            env: BTreeMap::new(),
            port: default_port(),
            namespace_template: default_namespace_template(),
            user_namespace_labels: default_namespace_labels(),
            user_namespace_annotations: BTreeMap::new(),
            cpu_limit: None,
            cpu_guarantee: None,
            mem_limit: None,
            mem_guarantee: None,
            profiles: Vec::new(),
            start_timeout_secs: default_start_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub tenancy: TenancyConfig,
    pub kubernetes: KubernetesConfig,
}

impl Config {
    /// Load configuration from an explicit path, `$DOSSIER_CONFIG`, or the
    /// default location. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        if config.auth.cookie_secret.is_empty() {
            if let Ok(secret) = std::env::var(COOKIE_SECRET_ENV) {
                config.auth.cookie_secret = secret.trim().to_string();
            }
        }
        Ok(config)
    }

    fn load_file(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from_path(Path::new(&path));
        }
        let path = Self::default_config_path();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dossier")
            .join("config.toml")
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
