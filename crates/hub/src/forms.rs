//! Spawn options derived from tenant policies
//!
//! Tenants choose through annotations how much of the workload a user may
//! pick: nothing (`fixed`), one of the configured profiles (`profiles`),
//! or free values within the tenant's container limits (`manual`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use dossier_crd::{annotations, parse_quantity, Annotated, ResourceUnit, Tenant};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{KubernetesConfig, Profile, TenancyConfig};
use crate::error::{DossierError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[default]
    Fixed,
    Profiles,
    Manual,
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fixed" => Ok(Self::Fixed),
            "profiles" => Ok(Self::Profiles),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown policy \"{other}\"")),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::Profiles => f.write_str("profiles"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Image and resource policies in effect for a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantPolicies {
    pub image: Policy,
    pub resources: Policy,
}

impl TenantPolicies {
    pub fn for_tenant(tenant: &Tenant, defaults: &TenancyConfig) -> Self {
        Self {
            image: annotated_policy(tenant, annotations::IMAGE_POLICY, defaults.default_image_policy),
            resources: annotated_policy(
                tenant,
                annotations::RESOURCE_POLICY,
                defaults.default_resource_policy,
            ),
        }
    }
}

fn annotated_policy(tenant: &Tenant, key: &str, default: Policy) -> Policy {
    match tenant.annotation(key) {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|e| {
            warn!(tenant = %tenant.name_any(), annotation = key, error = %e, "Ignoring policy annotation");
            default
        }),
    }
}

/// Resources offered in the options form: (limit key, form name, unit, step)
const RESOURCES: [(&str, &str, ResourceUnit, Option<u32>); 3] = [
    ("cpu", "cpu", ResourceUnit::Element, Some(10)),
    ("memory", "memory", ResourceUnit::Byte, None),
    ("nvidia.com/gpu", "gpu", ResourceUnit::Element, Some(1)),
];

/// Bounds a tenant places on one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDeclaration {
    pub name: String,
    pub unit: ResourceUnit,
    pub default: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<u32>,
}

impl ResourceDeclaration {
    fn check(&self, value: f64) -> Result<f64> {
        let out_of_range = |bound: &str, limit: f64| DossierError::InvalidInput {
            field: self.name.clone(),
            reason: format!("{value} is {bound} the tenant limit of {limit}"),
        };
        if let Some(min) = self.min.filter(|min| value < *min) {
            return Err(out_of_range("below", min));
        }
        if let Some(max) = self.max.filter(|max| value > *max) {
            return Err(out_of_range("above", max));
        }
        Ok(value)
    }
}

fn limit_value(
    tenant: &Tenant,
    values: Option<&BTreeMap<String, Quantity>>,
    key: &str,
    unit: ResourceUnit,
) -> Option<f64> {
    let raw = values?.get(key)?;
    match parse_quantity(&raw.0, unit) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(tenant = %tenant.name_any(), resource = key, error = %e, "Ignoring unparsable limit");
            None
        }
    }
}

/// Resource bounds from the tenant's first container limit range.
///
/// Without a container limit every resource is unbounded above with a
/// minimum of zero. An unparsable bound is left unset.
pub fn resource_declarations(tenant: &Tenant) -> Vec<ResourceDeclaration> {
    let limits = tenant.container_limits();
    RESOURCES
        .iter()
        .map(|&(key, name, unit, step)| match limits {
            None => ResourceDeclaration {
                name: name.to_string(),
                unit,
                default: None,
                min: Some(0.0),
                max: None,
                step,
            },
            Some(limits) => ResourceDeclaration {
                name: name.to_string(),
                unit,
                default: limit_value(tenant, limits.default.as_ref(), key, unit),
                min: limit_value(tenant, limits.min.as_ref(), key, unit),
                max: limit_value(tenant, limits.max.as_ref(), key, unit),
                step,
            },
        })
        .collect()
}

/// Everything the options page needs to render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionsForm {
    pub image_policy: Policy,
    pub resource_policy: Policy,
    pub default_image: String,
    pub profiles: Vec<Profile>,
    pub resources: Vec<ResourceDeclaration>,
}

/// Build the options form, or `None` when the user has nothing to choose.
pub fn options_form(
    tenant: Option<&Tenant>,
    defaults: &TenancyConfig,
    settings: &KubernetesConfig,
) -> Option<OptionsForm> {
    let tenant = tenant?;
    let policies = TenantPolicies::for_tenant(tenant, defaults);
    let offers_image = match policies.image {
        Policy::Fixed => false,
        Policy::Profiles => !settings.profiles.is_empty(),
        Policy::Manual => true,
    };
    let offers_resources = policies.resources == Policy::Manual;
    if !offers_image && !offers_resources {
        return None;
    }

    Some(OptionsForm {
        image_policy: policies.image,
        resource_policy: policies.resources,
        default_image: settings.image.clone(),
        profiles: settings.profiles.clone(),
        resources: if offers_resources {
            resource_declarations(tenant)
        } else {
            Vec::new()
        },
    })
}

/// Values submitted from the options page
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserOptions {
    pub image: Option<String>,
    pub profile: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Workload settings that take precedence over the backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadOverride {
    pub image: Option<String>,
    pub cpu_limit: Option<f64>,
    pub cpu_guarantee: Option<f64>,
    pub mem_limit: Option<f64>,
    pub mem_guarantee: Option<f64>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn default_profile(profiles: &[Profile]) -> Option<&Profile> {
    profiles.iter().find(|p| p.default).or_else(|| profiles.first())
}

fn parse_user_value(field: &str, raw: &str, unit: ResourceUnit) -> Result<f64> {
    if let Ok(value) = raw.parse::<f64>() {
        if value.is_finite() {
            return Ok(value);
        }
    }
    parse_quantity(raw, unit).map_err(|e| DossierError::InvalidInput {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// Translate submitted options into workload overrides under the tenant's
/// policies.
pub fn workload_override(
    tenant: &Tenant,
    defaults: &TenancyConfig,
    settings: &KubernetesConfig,
    options: &UserOptions,
) -> Result<WorkloadOverride> {
    let policies = TenantPolicies::for_tenant(tenant, defaults);
    let mut workload = WorkloadOverride::default();

    workload.image = match policies.image {
        Policy::Fixed => None,
        Policy::Manual => non_empty(options.image.as_ref()).map(str::to_string),
        Policy::Profiles => match non_empty(options.profile.as_ref()) {
            Some(slug) => {
                let profile = settings
                    .profiles
                    .iter()
                    .find(|p| p.slug == slug)
                    .ok_or_else(|| DossierError::not_found("Profile", slug))?;
                Some(profile.image.clone())
            }
            None => default_profile(&settings.profiles).map(|p| p.image.clone()),
        },
    };

    match policies.resources {
        Policy::Manual => {
            let declarations = resource_declarations(tenant);
            let declared = |name: &str| declarations.iter().find(|d| d.name == name);
            if let Some(raw) = non_empty(options.cpu.as_ref()) {
                let mut cpu = parse_user_value("cpu", raw, ResourceUnit::Element)?;
                if let Some(declaration) = declared("cpu") {
                    cpu = declaration.check(cpu)?;
                }
                workload.cpu_limit = Some(cpu);
                workload.cpu_guarantee = Some(cpu);
            }
            if let Some(raw) = non_empty(options.memory.as_ref()) {
                let mut memory = parse_user_value("memory", raw, ResourceUnit::Byte)?;
                if let Some(declaration) = declared("memory") {
                    memory = declaration.check(memory)?;
                }
                workload.mem_limit = Some(memory);
                workload.mem_guarantee = Some(memory);
            }
        }
        // no resource profiles; keep the backend configuration
        Policy::Profiles => {}
        Policy::Fixed => {
            if let Some(limits) = tenant.container_limits() {
                let default = limits.default.as_ref();
                let request = limits.default_request.as_ref();
                workload.cpu_limit = limit_value(tenant, default, "cpu", ResourceUnit::Element);
                workload.cpu_guarantee = limit_value(tenant, request, "cpu", ResourceUnit::Element);
                workload.mem_limit = limit_value(tenant, default, "memory", ResourceUnit::Byte);
                workload.mem_guarantee = limit_value(tenant, request, "memory", ResourceUnit::Byte);
            }
        }
    }

    Ok(workload)
}

/// Render a number back into a Kubernetes quantity
pub fn to_quantity(value: f64) -> Quantity {
    if value.fract() == 0.0 {
        Quantity(format!("{value:.0}"))
    } else {
        Quantity(format!("{value}"))
    }
}
