//! Common test utilities
#![allow(dead_code)] // Not every test file uses every helper

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dossier_crd::{Spawner, SpawnerSpec, Tenant, TenantSpec};
use dossier_hub::authenticator::{AllowList, SessionAuthenticator};
use dossier_hub::backend::{
    Backend, BackendArgs, BackendRegistry, Endpoint, Parameters, WorkloadStatus,
};
use dossier_hub::cluster::MemoryCluster;
use dossier_hub::config::Config;
use dossier_hub::controller::SessionController;
use dossier_hub::directory::Directory;
use dossier_hub::error::Result;
use dossier_hub::http::{router, AppState};
use dossier_hub::identity::AuthRecord;
use dossier_hub::views::HtmlRenderer;

/// Class reference of [`RecordingBackend`]
pub const RECORDING_CLASS: &str = "tests.RecordingSpawner";

/// Backend that only records what it was asked to do
pub struct RecordingBackend {
    args: BackendArgs,
    label: String,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Backend for RecordingBackend {
    fn class(&self) -> &str {
        RECORDING_CLASS
    }

    fn args(&self) -> &BackendArgs {
        &self.args
    }

    async fn start(&mut self) -> Result<Endpoint> {
        self.record("start");
        Ok(Endpoint {
            host: format!("{}.recording", self.label),
            port: 9999,
        })
    }

    async fn poll(&mut self) -> Result<WorkloadStatus> {
        Ok(WorkloadStatus::Running)
    }

    async fn stop(&mut self) -> Result<()> {
        self.record("stop");
        Ok(())
    }
}

impl RecordingBackend {
    fn record(&self, event: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}:{event}", self.label, self.args.user));
    }
}

pub struct TestHarness {
    pub cluster: Arc<MemoryCluster>,
    pub config: Arc<Config>,
    pub controller: Arc<SessionController>,
    pub state: AppState,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(mut config: Config) -> Self {
        config.auth.manage_groups = true;
        config.auth.cookie_secret = "integration-secret".to_string();
        config.auth.admin_groups.insert("hub-admins".to_string());
        let config = Arc::new(config);
        let cluster = Arc::new(MemoryCluster::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut registry = BackendRegistry::with_builtin(cluster.clone(), config.clone());
        let recorded = events.clone();
        registry.register(RECORDING_CLASS, move |params: &Parameters| {
            let label = params
                .get("label")
                .and_then(|v| v.as_str())
                .unwrap_or("recording")
                .to_string();
            Ok(Box::new(RecordingBackend {
                args: BackendArgs::from_parameters(RECORDING_CLASS, params)?,
                label,
                events: recorded.clone(),
            }) as Box<dyn Backend>)
        });

        let controller = Arc::new(SessionController::new(
            config.clone(),
            cluster.clone(),
            Arc::new(registry),
        ));
        let authenticator = SessionAuthenticator::new(
            Box::new(AllowList::from_config(&config.auth)),
            Directory::new(cluster.clone()),
            &config.auth,
        );
        let state = AppState {
            controller: controller.clone(),
            authenticator: Arc::new(authenticator),
            renderer: Arc::new(HtmlRenderer),
            config: config.clone(),
        };

        Self {
            cluster,
            config,
            controller,
            state,
            events,
        }
    }

    pub fn router(&self) -> axum::Router {
        router(self.state.clone())
    }

    pub fn add_tenant(&self, tenant: Tenant) -> &Self {
        self.cluster.insert_tenant(tenant);
        self
    }

    pub fn add_spawner(&self, spawner: Spawner) -> &Self {
        self.cluster.insert_spawner(spawner);
        self
    }

    pub fn remove_spawner(&self, name: &str) -> &Self {
        self.cluster.remove_spawner(name);
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// `Cookie` header value carrying a signed identity record
    pub fn cookie(&self, record: &AuthRecord) -> String {
        self.cookie_signed_with(record, &self.config.auth.cookie_secret)
    }

    pub fn cookie_signed_with(&self, record: &AuthRecord, secret: &str) -> String {
        format!("{}={}", self.config.auth.cookie_name, record.encode(secret))
    }
}

pub fn tenant(name: &str) -> Tenant {
    Tenant::new(name, TenantSpec::default())
}

pub fn annotated_tenant(name: &str, annotations: &[(&str, &str)]) -> Tenant {
    let mut tenant = tenant(name);
    tenant.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    );
    tenant
}

/// Spawner definition for the recording backend
pub fn recording_spawner(name: &str, tenants: Option<&[&str]>) -> Spawner {
    Spawner::new(
        name,
        SpawnerSpec {
            class: RECORDING_CLASS.to_string(),
            parameters: BTreeMap::from([("label".to_string(), serde_json::json!(name))]),
            tenants: tenants.map(|t| t.iter().map(|s| (*s).to_string()).collect()),
        },
    )
}
