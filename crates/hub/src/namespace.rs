//! Tenant namespaces
//!
//! Workloads run in `<tenant>-<base>` where the base comes from the
//! backend's namespace template. Namespaces are created on demand and an
//! existing one is reused as is.

use std::collections::BTreeMap;
use std::fmt::Write;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use tracing::{debug, info};

use crate::cluster::{is_conflict, ClusterApi};
use crate::error::Result;

/// Escape a hub username into a DNS-label friendly token.
///
/// Lowercase letters and digits pass through. Every other byte becomes
/// `-` followed by its hex code, and the result is lowercased.
pub fn escape_username(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            escaped.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(escaped, "-{byte:02x}");
            }
        }
    }
    escaped
}

/// Namespace a tenant-bound workload runs in.
pub fn derive_namespace(tenant: &str, base: &str) -> String {
    format!("{tenant}-{base}")
}

/// Values substituted into namespace, label and annotation templates
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub username: String,
    pub servername: String,
    pub tenant: String,
    pub namespace: String,
}

impl TemplateVars {
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{username}", &self.username)
            .replace("{servername}", &self.servername)
            .replace("{tenant}", &self.tenant)
            .replace("{namespace}", &self.namespace)
    }

    pub fn expand_all(&self, templates: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        templates
            .iter()
            .map(|(k, v)| (self.expand(k), self.expand(v)))
            .collect()
    }
}

pub fn build_namespace(
    name: &str,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: (!labels.is_empty()).then_some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Create the namespace unless it already exists.
///
/// Returns `true` when the namespace was created by this call.
pub async fn ensure_namespace(cluster: &dyn ClusterApi, namespace: &Namespace) -> Result<bool> {
    let name = namespace.metadata.name.as_deref().unwrap_or_default();
    match cluster.create_namespace(namespace).await {
        Ok(_) => {
            info!(namespace = %name, "Created tenant namespace");
            Ok(true)
        }
        Err(e) if is_conflict(&e) => {
            debug!(namespace = %name, "Namespace already exists");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
