//! Access decisions
//!
//! The base allow-list admits configured users and email domains. On top of
//! it, membership in a group named after an existing tenant admits a user
//! when group management is enabled.

use std::collections::BTreeSet;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::directory::Directory;
use crate::error::Result;
use crate::identity::{AuthRecord, HubUser};

/// Result of a policy check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyResult {
    Allowed,
    Denied(String),
}

impl PolicyResult {
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Decisions of the underlying platform authenticator
#[async_trait]
pub trait BaseAuthenticator: Send + Sync {
    async fn check_allowed(&self, record: &AuthRecord) -> PolicyResult;

    fn is_admin(&self, record: &AuthRecord) -> bool;
}

/// Static allow-list from the `[auth]` configuration
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    pub allowed_users: BTreeSet<String>,
    pub admin_users: BTreeSet<String>,
    pub allowed_domains: BTreeSet<String>,
}

impl AllowList {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            allowed_users: config.allowed_users.clone(),
            admin_users: config.admin_users.clone(),
            allowed_domains: config.allowed_domains.clone(),
        }
    }

    pub fn check(&self, record: &AuthRecord) -> PolicyResult {
        if self.allowed_users.contains(&record.name) || self.admin_users.contains(&record.name) {
            return PolicyResult::Allowed;
        }
        if record
            .email_domain()
            .is_some_and(|domain| self.allowed_domains.contains(domain))
        {
            return PolicyResult::Allowed;
        }
        PolicyResult::Denied(format!("User {} is not on the allow-list", record.name))
    }
}

#[async_trait]
impl BaseAuthenticator for AllowList {
    async fn check_allowed(&self, record: &AuthRecord) -> PolicyResult {
        self.check(record)
    }

    fn is_admin(&self, record: &AuthRecord) -> bool {
        self.admin_users.contains(&record.name)
    }
}

/// Admits users of existing tenants and derives admin rights from groups
pub struct SessionAuthenticator {
    base: Box<dyn BaseAuthenticator>,
    directory: Directory,
    manage_groups: bool,
    admin_groups: BTreeSet<String>,
}

impl SessionAuthenticator {
    pub fn new(base: Box<dyn BaseAuthenticator>, directory: Directory, config: &AuthConfig) -> Self {
        Self {
            base,
            directory,
            manage_groups: config.manage_groups,
            admin_groups: config.admin_groups.clone(),
        }
    }

    pub async fn check_allowed(&self, record: &AuthRecord) -> Result<PolicyResult> {
        if self.base.check_allowed(record).await.is_allowed() {
            return Ok(PolicyResult::Allowed);
        }
        if !self.manage_groups {
            warn!("Tenant support is disabled, enable `manage_groups` in the [auth] configuration");
            return Ok(PolicyResult::Denied(
                "Tenant support is disabled".to_string(),
            ));
        }

        debug!(user = %record.name, groups = ?record.groups, "Checking tenant membership");
        let tenants: BTreeSet<String> = self
            .directory
            .tenants()
            .await?
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        if tenants.is_empty() {
            debug!("No tenants found on the cluster");
        }

        if record.groups.iter().any(|group| tenants.contains(group)) {
            Ok(PolicyResult::Allowed)
        } else {
            Ok(PolicyResult::Denied(format!(
                "User {} does not belong to any tenant",
                record.name
            )))
        }
    }

    pub fn is_admin(&self, record: &AuthRecord) -> bool {
        record.groups.iter().any(|group| self.admin_groups.contains(group))
            || self.base.is_admin(record)
    }

    /// Admit a record and build the request user
    pub async fn admit(&self, record: &AuthRecord) -> Result<Option<HubUser>> {
        match self.check_allowed(record).await? {
            PolicyResult::Allowed => Ok(Some(HubUser::from_record(record, self.is_admin(record)))),
            PolicyResult::Denied(reason) => {
                warn!(user = %record.name, reason = %reason, "Access denied");
                Ok(None)
            }
        }
    }
}
