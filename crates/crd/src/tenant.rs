//! Capsule `Tenant` resource
//!
//! Only the fields Dossier reads are modelled. Tenants are cluster scoped.

use k8s_openapi::api::core::v1::{LimitRangeItem, LimitRangeSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Limit type that applies to individual containers.
pub const CONTAINER_LIMIT: &str = "Container";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "capsule.clastix.io",
    version = "v1beta2",
    kind = "Tenant",
    plural = "tenants"
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_ranges: Option<LimitRanges>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LimitRanges {
    #[serde(default)]
    pub items: Vec<LimitRangeSpec>,
}

impl Tenant {
    /// The first `Container` limit declared by the tenant, if any.
    pub fn container_limits(&self) -> Option<&LimitRangeItem> {
        self.spec
            .limit_ranges
            .as_ref()?
            .items
            .iter()
            .flat_map(|range| range.limits.iter())
            .find(|limit| limit.type_ == CONTAINER_LIMIT)
    }
}
