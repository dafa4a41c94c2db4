//! Per-slot session state
//!
//! A [`Session`] tracks one named server slot of a user: the bound tenant,
//! the backend that will run the workload and where the negotiation
//! between them currently stands.

use chrono::{DateTime, Utc};
use dossier_crd::Tenant;
use kube::ResourceExt;
use serde::Serialize;
use tracing::{debug, info};

use crate::backend::{Backend, Endpoint};
use crate::error::{DossierError, Result};

/// Lifecycle phase of a session slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Unbound,
    TenantPending,
    TenantBound,
    BackendPending,
    Confirmed,
    Provisioning,
    Ready,
    Stopped,
    Failed,
}

impl Phase {
    /// A workload exists or is being created
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Provisioning | Self::Ready)
    }
}

pub struct Session {
    slot: String,
    tenant: Option<Tenant>,
    backend: Box<dyn Backend>,
    /// Built-in backend, kept while a spawner definition overrides it
    original: Option<Box<dyn Backend>>,
    /// Spawner definition the override came from
    spawner: Option<String>,
    confirmed: bool,
    phase: Phase,
    endpoint: Option<Endpoint>,
    started_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("slot", &self.slot)
            .field("tenant", &self.tenant_name())
            .field("backend", &self.backend.class())
            .field("overridden", &self.original.is_some())
            .field("confirmed", &self.confirmed)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(slot: impl Into<String>, builtin: Box<dyn Backend>) -> Self {
        Self {
            slot: slot.into(),
            tenant: None,
            backend: builtin,
            original: None,
            spawner: None,
            confirmed: false,
            phase: Phase::Unbound,
            endpoint: None,
            started_at: None,
        }
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub const fn tenant(&self) -> Option<&Tenant> {
        self.tenant.as_ref()
    }

    pub fn tenant_name(&self) -> Option<String> {
        self.tenant.as_ref().map(ResourceExt::name_any)
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    /// The built-in backend, whether or not it is currently overridden
    pub fn builtin(&self) -> &dyn Backend {
        self.original.as_deref().unwrap_or(self.backend.as_ref())
    }

    pub const fn is_overridden(&self) -> bool {
        self.original.is_some()
    }

    /// Name of the spawner definition in use, `None` for the built-in backend
    pub fn spawner(&self) -> Option<&str> {
        self.spawner.as_deref()
    }

    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(slot = %self.slot, from = ?self.phase, to = ?phase, "Session phase changed");
            self.phase = phase;
        }
    }

    pub const fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub const fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready)
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::Provisioning)
    }

    pub const fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Not ready, not active and not pending
    pub const fn is_idle(&self) -> bool {
        !self.is_ready() && !self.is_active() && !self.is_pending()
    }

    /// Bind a tenant. Binding a different tenant drops the backend choice.
    pub fn bind_tenant(&mut self, tenant: Tenant) -> Result<()> {
        let name = tenant.name_any();
        if self.tenant_name().as_deref() == Some(name.as_str()) {
            self.tenant = Some(tenant);
            return Ok(());
        }
        if self.is_active() {
            return Err(DossierError::Conflict(format!(
                "Server {:?} is running in tenant {}",
                self.slot,
                self.tenant_name().unwrap_or_default()
            )));
        }
        if self.tenant.is_some() {
            self.revert_backend();
            self.confirmed = false;
        }
        info!(slot = %self.slot, tenant = %name, "Bound tenant");
        self.tenant = Some(tenant);
        self.set_phase(Phase::TenantBound);
        Ok(())
    }

    /// Keep the current backend and mark the session confirmed
    pub fn confirm(&mut self) {
        self.confirmed = true;
        self.set_phase(Phase::Confirmed);
    }

    /// Switch back to the built-in backend and confirm
    pub fn use_builtin(&mut self) {
        self.revert_backend();
        self.confirm();
    }

    /// Replace the backend with one built from a spawner definition. The
    /// built-in backend is kept so it can be restored.
    pub fn override_backend(&mut self, spawner: impl Into<String>, backend: Box<dyn Backend>) {
        let spawner = spawner.into();
        info!(slot = %self.slot, spawner = %spawner, class = %backend.class(), "Overriding backend");
        let previous = std::mem::replace(&mut self.backend, backend);
        if self.original.is_none() {
            self.original = Some(previous);
        }
        self.spawner = Some(spawner);
        self.confirm();
    }

    fn revert_backend(&mut self) {
        if let Some(original) = self.original.take() {
            debug!(slot = %self.slot, class = %self.backend.class(), "Restoring built-in backend");
            self.backend = original;
        }
        self.spawner = None;
    }

    pub fn mark_provisioning(&mut self) {
        self.endpoint = None;
        self.started_at = Some(Utc::now());
        self.set_phase(Phase::Provisioning);
    }

    pub fn mark_ready(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
        self.set_phase(Phase::Ready);
    }

    pub fn mark_failed(&mut self) {
        self.endpoint = None;
        self.set_phase(Phase::Failed);
    }

    pub fn mark_stopped(&mut self) {
        self.endpoint = None;
        self.set_phase(Phase::Stopped);
    }

    /// Clear the tenant binding and restore the built-in backend
    pub fn reset(&mut self) {
        self.revert_backend();
        if let Some(aware) = self.backend.tenant_aware_mut() {
            aware.clear_tenant();
        }
        self.tenant = None;
        self.confirmed = false;
        self.endpoint = None;
        self.started_at = None;
        self.set_phase(Phase::Unbound);
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            slot: self.slot.clone(),
            phase: self.phase,
            tenant: self.tenant_name(),
            spawner: self.spawner.clone(),
            class: self.backend.class().to_string(),
            url: self.endpoint.as_ref().map(Endpoint::url),
            started_at: self.started_at,
        }
    }
}

/// Serializable view of a session slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub slot: String,
    pub phase: Phase,
    pub tenant: Option<String>,
    pub spawner: Option<String>,
    pub class: String,
    pub url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendArgs, KubeBackend, SshBackend, KUBERNETES_CLASS, SSH_CLASS};
    use crate::cluster::MemoryCluster;
    use crate::config::Config;
    use dossier_crd::TenantSpec;
    use std::sync::Arc;

    fn session() -> Session {
        let config = Config::default();
        let builtin = KubeBackend::new(
            Arc::new(MemoryCluster::new()),
            BackendArgs::for_session(&config, "alice", ""),
            config.kubernetes.clone(),
            config.tenancy.clone(),
        );
        Session::new("", Box::new(builtin))
    }

    fn ssh() -> Box<dyn Backend> {
        let mut params = BackendArgs::default().to_parameters();
        params.insert("remote_host".into(), "login.example".into());
        Box::new(SshBackend::from_parameters(&params).unwrap())
    }

    #[test]
    fn test_new_session_is_unbound() {
        let session = session();
        assert_eq!(session.phase(), Phase::Unbound);
        assert!(session.is_idle());
        assert!(!session.is_confirmed());
        assert_eq!(session.backend().class(), KUBERNETES_CLASS);
    }

    #[test]
    fn test_override_and_revert() {
        let mut session = session();
        session
            .bind_tenant(Tenant::new("physics", TenantSpec::default()))
            .unwrap();
        session.override_backend("hpc", ssh());
        assert!(session.is_confirmed());
        assert!(session.is_overridden());
        assert_eq!(session.backend().class(), SSH_CLASS);
        assert_eq!(session.builtin().class(), KUBERNETES_CLASS);
        assert_eq!(session.spawner(), Some("hpc"));

        // a second override keeps the original built-in backend
        session.override_backend("hpc2", ssh());
        assert_eq!(session.builtin().class(), KUBERNETES_CLASS);

        session.use_builtin();
        assert!(!session.is_overridden());
        assert_eq!(session.backend().class(), KUBERNETES_CLASS);
        assert_eq!(session.spawner(), None);
        assert!(session.is_confirmed());
    }

    #[test]
    fn test_rebinding_another_tenant_drops_backend_choice() {
        let mut session = session();
        session
            .bind_tenant(Tenant::new("physics", TenantSpec::default()))
            .unwrap();
        session.override_backend("hpc", ssh());

        // same tenant again keeps everything
        session
            .bind_tenant(Tenant::new("physics", TenantSpec::default()))
            .unwrap();
        assert!(session.is_overridden());

        session
            .bind_tenant(Tenant::new("chem", TenantSpec::default()))
            .unwrap();
        assert!(!session.is_overridden());
        assert!(!session.is_confirmed());
        assert_eq!(session.phase(), Phase::TenantBound);
    }

    #[test]
    fn test_active_session_keeps_its_tenant() {
        let mut session = session();
        session
            .bind_tenant(Tenant::new("physics", TenantSpec::default()))
            .unwrap();
        session.confirm();
        session.mark_provisioning();
        assert!(!session.is_idle());

        let err = session
            .bind_tenant(Tenant::new("chem", TenantSpec::default()))
            .unwrap_err();
        assert!(matches!(err, DossierError::Conflict(_)));
        assert_eq!(session.tenant_name().as_deref(), Some("physics"));
    }

    #[test]
    fn test_reset_clears_binding() {
        let mut session = session();
        session
            .bind_tenant(Tenant::new("physics", TenantSpec::default()))
            .unwrap();
        session.override_backend("hpc", ssh());
        session.mark_provisioning();
        session.mark_ready(Endpoint {
            host: "10.0.0.1".into(),
            port: 8888,
        });
        assert_eq!(session.summary().url.as_deref(), Some("http://10.0.0.1:8888"));

        session.reset();
        assert!(session.tenant().is_none());
        assert!(!session.is_overridden());
        assert!(!session.is_confirmed());
        assert_eq!(session.phase(), Phase::Unbound);
        let summary = session.summary();
        assert_eq!(summary.class, KUBERNETES_CLASS);
        assert_eq!(summary.url, None);
        assert_eq!(summary.started_at, None);
    }
}
