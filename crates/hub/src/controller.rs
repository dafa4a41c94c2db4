//! Session lifecycle
//!
//! Drives a server slot from the first spawn request through tenant and
//! backend selection, namespace preparation and the options form up to a
//! running workload, and tears bindings down again on logout.
//!
//! Requests for the same slot are serialized by the slot's mutex. Distinct
//! slots only share the user table.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::backend::{
    Backend, BackendArgs, BackendRegistry, Endpoint, Parameters, WorkloadStatus, KUBERNETES_CLASS,
};
use crate::cluster::SharedCluster;
use crate::config::Config;
use crate::directory::Directory;
use crate::error::{DossierError, Result};
use crate::forms::{OptionsForm, UserOptions};
use crate::identity::HubUser;
use crate::namespace::ensure_namespace;
use crate::resolution::{Choice, Resolution};
use crate::session::{Phase, Session, SessionSummary};
use crate::spawners::BackendResolver;
use crate::tenancy::TenantResolver;

/// What a spawn request led to
#[derive(Debug, Clone, PartialEq)]
pub enum SpawnOutcome {
    /// The user belongs to several tenants
    NeedsTenant(Vec<Choice>),
    /// Several spawner definitions apply to the bound tenant
    NeedsBackend(Vec<Choice>),
    /// The tenant lets the user pick image or resources
    Options(OptionsForm),
    /// The workload is up
    Ready {
        endpoint: Endpoint,
        /// Path the proxy routes to the workload
        route: String,
    },
}

type SlotKey = (String, String);

pub struct SessionController {
    config: Arc<Config>,
    cluster: SharedCluster,
    tenants: TenantResolver,
    backends: BackendResolver,
    users: RwLock<HashMap<String, HubUser>>,
    slots: RwLock<HashMap<SlotKey, Arc<Mutex<Session>>>>,
}

impl SessionController {
    pub fn new(config: Arc<Config>, cluster: SharedCluster, registry: Arc<BackendRegistry>) -> Self {
        let directory = Directory::new(cluster.clone());
        Self {
            tenants: TenantResolver::new(directory.clone(), config.tenancy.default_tenant.clone()),
            backends: BackendResolver::new(directory, registry),
            config,
            cluster,
            users: RwLock::new(HashMap::new()),
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Record the latest identity of a user
    pub async fn remember(&self, user: &HubUser) {
        self.users
            .write()
            .await
            .insert(user.name.clone(), user.clone());
    }

    pub async fn known_user(&self, name: &str) -> Option<HubUser> {
        self.users.read().await.get(name).cloned()
    }

    fn builtin(&self, user: &str, slot: &str) -> Result<Box<dyn Backend>> {
        let params = BackendArgs::for_session(&self.config, user, slot).to_parameters();
        self.backends.registry().build(KUBERNETES_CLASS, &params)
    }

    async fn slot(&self, user: &HubUser, slot: &str) -> Result<Arc<Mutex<Session>>> {
        self.remember(user).await;
        let key = (user.name.clone(), slot.to_string());
        if let Some(session) = self.slots.read().await.get(&key) {
            return Ok(session.clone());
        }

        let mut slots = self.slots.write().await;
        match slots.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                debug!(user = %user.name, slot = %slot, "Creating session");
                let session = Session::new(slot, self.builtin(&user.name, slot)?);
                Ok(entry.insert(Arc::new(Mutex::new(session))).clone())
            }
        }
    }

    async fn user_slots(&self, name: &str) -> Vec<Arc<Mutex<Session>>> {
        let slots = self.slots.read().await;
        let mut owned: Vec<(&String, &Arc<Mutex<Session>>)> = slots
            .iter()
            .filter(|((user, _), _)| user == name)
            .map(|((_, slot), session)| (slot, session))
            .collect();
        owned.sort_by(|a, b| a.0.cmp(b.0));
        owned.into_iter().map(|(_, session)| session.clone()).collect()
    }

    /// Advance a slot as far as possible. `options` carries a submitted
    /// options form.
    pub async fn spawn(
        &self,
        user: &HubUser,
        slot: &str,
        options: Option<UserOptions>,
    ) -> Result<SpawnOutcome> {
        let session = self.slot(user, slot).await?;
        let mut session = session.lock().await;

        if let Some(endpoint) = session.endpoint().filter(|_| session.is_ready()) {
            return Ok(SpawnOutcome::Ready {
                endpoint: endpoint.clone(),
                route: session.backend().args().proxy_spec.clone(),
            });
        }

        if let Resolution::NeedsChoice(choices) = self.tenants.resolve(user, &mut session).await? {
            info!(user = %user.name, slot = %slot, candidates = choices.len(), "Tenant selection required");
            return Ok(SpawnOutcome::NeedsTenant(choices));
        }
        if let Resolution::NeedsChoice(choices) = self.backends.resolve(&mut session).await? {
            info!(user = %user.name, slot = %slot, candidates = choices.len(), "Spawner selection required");
            return Ok(SpawnOutcome::NeedsBackend(choices));
        }

        if let Some(form) = self.prepare(&mut session, options).await? {
            return Ok(SpawnOutcome::Options(form));
        }
        self.start(user, &mut session).await
    }

    /// Bind the tenant into a tenant-aware backend, create its namespace and
    /// apply submitted options. Returns the form when options are still
    /// needed.
    async fn prepare(
        &self,
        session: &mut Session,
        options: Option<UserOptions>,
    ) -> Result<Option<OptionsForm>> {
        let tenant = session
            .tenant()
            .cloned()
            .ok_or_else(|| DossierError::Conflict("No tenant bound".to_string()))?;

        let Some(aware) = session.backend_mut().tenant_aware_mut() else {
            return Ok(None);
        };
        let namespace = aware.bind_tenant(tenant);
        ensure_namespace(self.cluster.as_ref(), &namespace).await?;

        let Some(aware) = session.backend_mut().tenant_aware_mut() else {
            return Ok(None);
        };
        match options {
            Some(options) => {
                aware.apply_options(&options)?;
                Ok(None)
            }
            None => Ok(aware.options_form()),
        }
    }

    async fn start(&self, user: &HubUser, session: &mut Session) -> Result<SpawnOutcome> {
        session.mark_provisioning();
        let class = session.backend().class().to_string();
        info!(user = %user.name, slot = %session.slot(), class = %class, "Starting workload");

        match session.backend_mut().start().await {
            Ok(endpoint) => {
                info!(user = %user.name, slot = %session.slot(), url = %endpoint.url(), "Workload ready");
                session.mark_ready(endpoint.clone());
                Ok(SpawnOutcome::Ready {
                    endpoint,
                    route: session.backend().args().proxy_spec.clone(),
                })
            }
            Err(e) => {
                error!(user = %user.name, slot = %session.slot(), class = %class, error = %e, "Workload failed to start");
                session.mark_failed();
                Err(e)
            }
        }
    }

    /// Stop the workload of a slot, keeping its bindings
    pub async fn stop(&self, user: &HubUser, slot: &str) -> Result<()> {
        let session = self.slot(user, slot).await?;
        let mut session = session.lock().await;
        if session.is_idle() {
            return Ok(());
        }
        session.backend_mut().stop().await?;
        session.mark_stopped();
        info!(user = %user.name, slot = %slot, "Stopped workload");
        Ok(())
    }

    pub async fn tenant_choices(&self, user: &HubUser) -> Result<Vec<Choice>> {
        self.remember(user).await;
        self.tenants.candidates(user).await
    }

    pub async fn select_tenant(&self, user: &HubUser, slot: &str, chosen: &str) -> Result<String> {
        let session = self.slot(user, slot).await?;
        let mut session = session.lock().await;
        let tenant = self.tenants.select(user, &mut session, chosen).await?;
        Ok(kube::ResourceExt::name_any(&tenant))
    }

    pub async fn backend_choices(&self, user: &HubUser, slot: &str) -> Result<Vec<Choice>> {
        let session = self.slot(user, slot).await?;
        let session = session.lock().await;
        let tenant = session.tenant_name().ok_or_else(|| {
            DossierError::Conflict("Select a tenant before choosing a spawner".to_string())
        })?;
        self.backends.candidates(&tenant).await
    }

    pub async fn select_backend(&self, user: &HubUser, slot: &str, selection: &str) -> Result<String> {
        let session = self.slot(user, slot).await?;
        let mut session = session.lock().await;
        self.backends.select(&mut session, selection).await
    }

    /// Clear tenant bindings of every slot of the user. With shutdown on
    /// logout running workloads are stopped first, otherwise only idle slots
    /// are cleared. Cleared slots are dropped, and so is the user once no
    /// slot is left.
    pub async fn logout(&self, name: &str) -> Result<()> {
        let shutdown = self.config.tenancy.shutdown_on_logout;
        for session in self.user_slots(name).await {
            let mut session = session.lock().await;
            if shutdown && !session.is_idle() {
                if let Err(e) = session.backend_mut().stop().await {
                    warn!(user = %name, slot = %session.slot(), error = %e, "Failed to stop workload on logout");
                    continue;
                }
                session.mark_stopped();
            }
            if shutdown || session.is_idle() {
                session.reset();
                debug!(user = %name, slot = %session.slot(), "Cleared session on logout");
            }
        }
        self.forget_unbound(name).await;
        info!(user = %name, "Logged out");
        Ok(())
    }

    /// Drop the user's unbound slots nobody else holds
    async fn forget_unbound(&self, name: &str) {
        let mut slots = self.slots.write().await;
        slots.retain(|(user, _), session| {
            user != name
                || Arc::strong_count(session) > 1
                || session
                    .try_lock()
                    .map_or(true, |s| s.phase() != Phase::Unbound)
        });
        let emptied = !slots.keys().any(|(user, _)| user == name);
        drop(slots);
        if emptied {
            self.users.write().await.remove(name);
        }
    }

    /// Summaries of the user's slots. Ready slots are polled first.
    pub async fn sessions(&self, name: &str) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for session in self.user_slots(name).await {
            let mut session = session.lock().await;
            if session.is_ready() && session.backend_mut().poll().await? == WorkloadStatus::Stopped {
                info!(user = %name, slot = %session.slot(), "Workload is gone");
                session.mark_stopped();
            }
            summaries.push(session.summary());
        }
        Ok(summaries)
    }

    /// State of the slot's backend to persist across restarts
    pub async fn backend_state(&self, user: &HubUser, slot: &str) -> Result<Parameters> {
        let session = self.slot(user, slot).await?;
        let session = session.lock().await;
        Ok(session.backend().state())
    }

    pub async fn load_backend_state(&self, user: &HubUser, slot: &str, state: &Parameters) -> Result<()> {
        let session = self.slot(user, slot).await?;
        let mut session = session.lock().await;
        session.backend_mut().load_state(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use dossier_crd::{Tenant, TenantSpec};

    fn controller(cluster: &Arc<MemoryCluster>, config: Config) -> SessionController {
        let config = Arc::new(config);
        let registry = Arc::new(BackendRegistry::with_builtin(cluster.clone(), config.clone()));
        SessionController::new(config, cluster.clone(), registry)
    }

    #[tokio::test]
    async fn test_spawn_single_tenant_reaches_ready() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);

        let outcome = controller.spawn(&alice, "", None).await.unwrap();
        let SpawnOutcome::Ready { endpoint, route } = outcome else {
            panic!("expected a running workload, got {outcome:?}");
        };
        assert_eq!(route, "/user/alice/");
        assert_eq!(endpoint.port, 8888);
        assert!(cluster.namespace("physics-alice").is_some());
        assert!(cluster.pod("physics-alice", "dossier-alice").is_some());

        // spawning again returns the running workload
        let again = controller.spawn(&alice, "", None).await.unwrap();
        assert!(matches!(again, SpawnOutcome::Ready { endpoint: e, .. } if e == endpoint));
        assert_eq!(cluster.pod_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_with(Some(500));
        let controller = controller(&cluster, Config::default());
        let err = controller
            .spawn(&HubUser::new("alice", &["physics"]), "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DossierError::Transport(_)));
    }

    #[tokio::test]
    async fn test_options_form_then_submission() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut tenant = Tenant::new("physics", TenantSpec::default());
        tenant.metadata.annotations = Some(
            [("dossier.unito.it/image-policy".to_string(), "manual".to_string())]
                .into_iter()
                .collect(),
        );
        cluster.insert_tenant(tenant);
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);

        let outcome = controller.spawn(&alice, "", None).await.unwrap();
        assert!(matches!(outcome, SpawnOutcome::Options(_)));
        assert_eq!(cluster.pod_count(), 0);

        let options = UserOptions {
            image: Some("quay.io/jupyter/r-notebook".into()),
            ..Default::default()
        };
        let outcome = controller.spawn(&alice, "", Some(options)).await.unwrap();
        assert!(matches!(outcome, SpawnOutcome::Ready { .. }));
        let pod = cluster.pod("physics-alice", "dossier-alice").unwrap();
        assert_eq!(
            pod.spec.unwrap().containers[0].image.as_deref(),
            Some("quay.io/jupyter/r-notebook")
        );
    }

    #[tokio::test]
    async fn test_logout_keeps_running_sessions_without_shutdown() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);
        controller.spawn(&alice, "", None).await.unwrap();

        controller.logout("alice").await.unwrap();
        let summaries = controller.sessions("alice").await.unwrap();
        assert_eq!(summaries[0].phase, Phase::Ready);
        assert_eq!(summaries[0].tenant.as_deref(), Some("physics"));
        assert_eq!(cluster.pod_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_with_shutdown_stops_and_clears() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        let mut config = Config::default();
        config.tenancy.shutdown_on_logout = true;
        let controller = controller(&cluster, config);
        let alice = HubUser::new("alice", &["physics"]);
        controller.spawn(&alice, "", None).await.unwrap();

        controller.logout("alice").await.unwrap();
        assert_eq!(cluster.pod_count(), 0);
        assert!(controller.sessions("alice").await.unwrap().is_empty());
        assert!(controller.known_user("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_logout_keeps_slots_in_use() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);
        controller.spawn(&alice, "", None).await.unwrap();
        let held = controller.slot(&alice, "scratch").await.unwrap();

        controller.logout("alice").await.unwrap();
        let summaries = controller.sessions("alice").await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].phase, Phase::Unbound);
        drop(held);

        controller.logout("alice").await.unwrap();
        assert_eq!(controller.sessions("alice").await.unwrap().len(), 1);
        assert!(controller.known_user("alice").await.is_some());
    }

    #[tokio::test]
    async fn test_sessions_notice_vanished_workloads() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);
        controller.spawn(&alice, "gpu", None).await.unwrap();

        cluster.set_pod_phase("physics-alice", "dossier-alice-gpu", "Succeeded");
        let summaries = controller.sessions("alice").await.unwrap();
        assert_eq!(summaries[0].slot, "gpu");
        assert_eq!(summaries[0].phase, Phase::Stopped);
    }

    #[tokio::test]
    async fn test_respawn_after_workload_exits() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);
        controller.spawn(&alice, "", None).await.unwrap();

        cluster.set_pod_phase("physics-alice", "dossier-alice", "Succeeded");
        let summaries = controller.sessions("alice").await.unwrap();
        assert_eq!(summaries[0].phase, Phase::Stopped);

        let outcome = controller.spawn(&alice, "", None).await.unwrap();
        assert!(matches!(outcome, SpawnOutcome::Ready { .. }));
        assert_eq!(cluster.pod_count(), 1);
        let summaries = controller.sessions("alice").await.unwrap();
        assert_eq!(summaries[0].phase, Phase::Ready);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_no_pod_and_retries() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        cluster.start_pods_in("Failed");
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);

        let err = controller.spawn(&alice, "", None).await.unwrap_err();
        assert!(matches!(err, DossierError::Backend { .. }));
        assert_eq!(cluster.pod_count(), 0);
        assert_eq!(controller.sessions("alice").await.unwrap()[0].phase, Phase::Failed);

        cluster.start_pods_in("Running");
        let outcome = controller.spawn(&alice, "", None).await.unwrap();
        assert!(matches!(outcome, SpawnOutcome::Ready { .. }));
    }

    #[tokio::test]
    async fn test_backend_state_round_trip() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.insert_tenant(Tenant::new("physics", TenantSpec::default()));
        let controller = controller(&cluster, Config::default());
        let alice = HubUser::new("alice", &["physics"]);
        controller.spawn(&alice, "", None).await.unwrap();

        let state = controller.backend_state(&alice, "").await.unwrap();
        assert_eq!(state["namespace"], "physics-alice");

        let bob = HubUser::new("bob", &[]);
        controller.load_backend_state(&bob, "", &state).await.unwrap();
        assert_eq!(
            controller.backend_state(&bob, "").await.unwrap()["namespace"],
            "physics-alice"
        );
        assert!(controller.known_user("bob").await.is_some());
    }
}
