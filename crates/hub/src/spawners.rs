//! Backend resolution
//!
//! Once a tenant is bound, the spawner definitions that apply to it decide
//! which backend runs the workload. The built-in backend is always offered
//! as the synthetic `default` choice.

use std::sync::Arc;

use dossier_crd::Spawner;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendRegistry};
use crate::directory::Directory;
use crate::error::{DossierError, Result};
use crate::resolution::{Choice, Resolution};
use crate::session::{Phase, Session};

/// Selection value of the built-in backend
pub const DEFAULT_SPAWNER: &str = "default";

pub fn default_choice() -> Choice {
    Choice {
        name: DEFAULT_SPAWNER.to_string(),
        display_name: Some("Dossier Spawner".to_string()),
        description: Some("Spawns a Notebook on your Kubernetes Tenant".to_string()),
        slug: DEFAULT_SPAWNER.to_string(),
    }
}

#[derive(Clone)]
pub struct BackendResolver {
    directory: Directory,
    registry: Arc<BackendRegistry>,
}

impl BackendResolver {
    pub fn new(directory: Directory, registry: Arc<BackendRegistry>) -> Self {
        Self {
            directory,
            registry,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Spawner definitions usable in `tenant`, sorted by name
    pub async fn applicable(&self, tenant: &str) -> Result<Vec<Spawner>> {
        let mut spawners: Vec<Spawner> = self
            .directory
            .spawners()
            .await?
            .into_iter()
            .filter(|spawner| spawner.applies_to(tenant))
            .collect();
        spawners.sort_by_key(ResourceExt::name_any);
        Ok(spawners)
    }

    /// Choices for the selection page, `default` first
    pub async fn candidates(&self, tenant: &str) -> Result<Vec<Choice>> {
        let spawners = self.applicable(tenant).await?;
        Ok(std::iter::once(default_choice())
            .chain(spawners.iter().map(Choice::from_resource))
            .collect())
    }

    /// Settle the backend of a session whose tenant is bound. Resolves to
    /// the name of the chosen spawner definition, or `default`.
    pub async fn resolve(&self, session: &mut Session) -> Result<Resolution<String>> {
        if session.is_confirmed() {
            let chosen = session.spawner().unwrap_or(DEFAULT_SPAWNER).to_string();
            return Ok(Resolution::Bound(chosen));
        }
        let tenant = bound_tenant(session)?;

        let mut spawners = self.applicable(&tenant).await?;
        match spawners.len() {
            0 => {
                debug!(tenant = %tenant, "No spawner definitions apply, using the built-in backend");
                session.use_builtin();
                Ok(Resolution::Bound(DEFAULT_SPAWNER.to_string()))
            }
            1 => {
                let spawner = spawners.remove(0);
                let name = spawner.name_any();
                self.bind(session, &spawner)?;
                Ok(Resolution::Bound(name))
            }
            _ => {
                session.set_phase(Phase::BackendPending);
                Ok(Resolution::NeedsChoice(
                    std::iter::once(default_choice())
                        .chain(spawners.iter().map(Choice::from_resource))
                        .collect(),
                ))
            }
        }
    }

    /// Bind the backend picked on the selection page
    pub async fn select(&self, session: &mut Session, selection: &str) -> Result<String> {
        let selection = selection.trim();
        let tenant = bound_tenant(session)?;
        ensure_idle(session)?;

        if selection == DEFAULT_SPAWNER {
            session.use_builtin();
            return Ok(DEFAULT_SPAWNER.to_string());
        }

        let spawner = self
            .applicable(&tenant)
            .await?
            .into_iter()
            .find(|spawner| Choice::from_resource(spawner).matches(selection));
        let Some(spawner) = spawner else {
            return match self.directory.spawner(selection).await? {
                Some(_) => {
                    warn!(tenant = %tenant, spawner = %selection, "Rejected spawner selection");
                    Err(DossierError::Forbidden(format!(
                        "Spawner {selection} is not available in tenant {tenant}"
                    )))
                }
                None => Err(DossierError::not_found("Spawner", selection)),
            };
        };

        let name = spawner.name_any();
        self.bind(session, &spawner)?;
        Ok(name)
    }

    fn bind(&self, session: &mut Session, spawner: &Spawner) -> Result<()> {
        ensure_idle(session)?;
        let backend = self.instantiate(session, spawner)?;
        session.override_backend(spawner.name_any(), backend);
        Ok(())
    }

    /// Build the backend of a spawner definition from the session's
    /// built-in backend arguments overlaid with the definition parameters.
    pub fn instantiate(&self, session: &Session, spawner: &Spawner) -> Result<Box<dyn Backend>> {
        let mut params = session.builtin().args().to_parameters();
        params.extend(
            spawner
                .spec
                .parameters
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        let backend = self.registry.build(&spawner.spec.class, &params)?;
        info!(
            spawner = %spawner.name_any(),
            class = %spawner.spec.class,
            user = %backend.args().user,
            "Instantiated backend"
        );
        Ok(backend)
    }
}

fn bound_tenant(session: &Session) -> Result<String> {
    session
        .tenant_name()
        .ok_or_else(|| DossierError::Conflict("Select a tenant before choosing a spawner".to_string()))
}

fn ensure_idle(session: &Session) -> Result<()> {
    if session.is_active() {
        return Err(DossierError::Conflict(format!(
            "Server {:?} is already running",
            session.slot()
        )));
    }
    Ok(())
}
