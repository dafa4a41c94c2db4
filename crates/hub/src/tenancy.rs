//! Tenant resolution
//!
//! A user may use the tenants whose names match one of their groups. One
//! eligible tenant is bound right away, several need a choice, none falls
//! back to the configured default tenant.

use dossier_crd::Tenant;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::{DossierError, Result};
use crate::identity::HubUser;
use crate::resolution::{Choice, Resolution};
use crate::session::{Phase, Session};

#[derive(Clone)]
pub struct TenantResolver {
    directory: Directory,
    default_tenant: Option<String>,
}

impl TenantResolver {
    pub fn new(directory: Directory, default_tenant: Option<String>) -> Self {
        Self {
            directory,
            default_tenant: default_tenant.filter(|name| !name.is_empty()),
        }
    }

    /// Tenants named after one of the user's groups, sorted by name
    pub async fn eligible(&self, user: &HubUser) -> Result<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self
            .directory
            .tenants()
            .await?
            .into_iter()
            .filter(|tenant| user.groups.contains(&tenant.name_any()))
            .collect();
        tenants.sort_by_key(ResourceExt::name_any);
        debug!(user = %user.name, count = tenants.len(), "Eligible tenants");
        Ok(tenants)
    }

    pub async fn candidates(&self, user: &HubUser) -> Result<Vec<Choice>> {
        Ok(self
            .eligible(user)
            .await?
            .iter()
            .map(Choice::from_resource)
            .collect())
    }

    /// Bind a tenant to the session if the choice is unambiguous
    pub async fn resolve(&self, user: &HubUser, session: &mut Session) -> Result<Resolution<Tenant>> {
        if let Some(tenant) = session.tenant() {
            return Ok(Resolution::Bound(tenant.clone()));
        }

        let mut eligible = self.eligible(user).await?;
        let tenant = match eligible.len() {
            0 => self.default_for(user).await?,
            1 => eligible.remove(0),
            _ => {
                session.set_phase(Phase::TenantPending);
                return Ok(Resolution::NeedsChoice(
                    eligible.iter().map(Choice::from_resource).collect(),
                ));
            }
        };

        session.bind_tenant(tenant.clone())?;
        Ok(Resolution::Bound(tenant))
    }

    async fn default_for(&self, user: &HubUser) -> Result<Tenant> {
        let Some(name) = &self.default_tenant else {
            warn!(user = %user.name, "User has no tenants and no default tenant is configured");
            return Err(DossierError::Forbidden(format!(
                "User {} has no tenants assigned",
                user.name
            )));
        };
        match self.directory.tenant(name).await? {
            Some(tenant) => {
                info!(user = %user.name, tenant = %name, "Using default tenant");
                Ok(tenant)
            }
            None => {
                warn!(tenant = %name, "Default tenant does not exist");
                Err(DossierError::UndefinedDefaultTenant(name.clone()))
            }
        }
    }

    /// Bind a tenant picked on the selection page. Eligibility is checked
    /// again against the current cluster state.
    pub async fn select(&self, user: &HubUser, session: &mut Session, chosen: &str) -> Result<Tenant> {
        let chosen = chosen.trim();
        let tenant = self
            .eligible(user)
            .await?
            .into_iter()
            .find(|tenant| Choice::from_resource(tenant).matches(chosen));

        let Some(tenant) = tenant else {
            warn!(user = %user.name, tenant = %chosen, "Rejected tenant selection");
            return Err(DossierError::Forbidden(format!(
                "User {} is not assigned to tenant {}",
                user.name, chosen
            )));
        };

        session.bind_tenant(tenant.clone())?;
        Ok(tenant)
    }
}
