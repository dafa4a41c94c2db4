mod common;

use common::{annotated_tenant, recording_spawner, tenant, TestHarness, RECORDING_CLASS};
use dossier_hub::config::Config;
use dossier_hub::controller::SpawnOutcome;
use dossier_hub::error::DossierError;
use dossier_hub::forms::UserOptions;
use dossier_hub::identity::HubUser;
use dossier_hub::session::Phase;

#[tokio::test]
async fn test_single_tenant_spawns_without_prompt() {
    let harness = TestHarness::new();
    harness.add_tenant(tenant("physics")).add_tenant(tenant("chem"));
    let alice = HubUser::new("alice", &["physics", "students"]);

    let outcome = harness.controller.spawn(&alice, "", None).await.unwrap();
    assert!(matches!(outcome, SpawnOutcome::Ready { ref route, .. } if route == "/user/alice/"));
    assert_eq!(harness.cluster.namespace_names(), vec!["physics-alice"]);
}

#[tokio::test]
async fn test_default_tenant_for_users_without_groups() {
    let mut config = Config::default();
    config.tenancy.default_tenant = Some("edu".to_string());
    let harness = TestHarness::with_config(config);
    harness.add_tenant(tenant("edu")).add_tenant(tenant("physics"));

    let guest = HubUser::new("guest", &[]);
    harness.controller.spawn(&guest, "", None).await.unwrap();
    let sessions = harness.controller.sessions("guest").await.unwrap();
    assert_eq!(sessions[0].tenant.as_deref(), Some("edu"));
    assert!(harness.cluster.namespace("edu-guest").is_some());
}

#[tokio::test]
async fn test_missing_default_tenant_is_reported() {
    let mut config = Config::default();
    config.tenancy.default_tenant = Some("edu".to_string());
    let harness = TestHarness::with_config(config);

    let err = harness
        .controller
        .spawn(&HubUser::new("guest", &[]), "", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DossierError::UndefinedDefaultTenant(ref name) if name == "edu"));
    assert_eq!(err.to_string(), "Tenant edu is not defined.");
}

#[tokio::test]
async fn test_no_tenant_and_no_default_is_forbidden() {
    let harness = TestHarness::new();
    harness.add_tenant(tenant("physics"));
    let err = harness
        .controller
        .spawn(&HubUser::new("bob", &["chem"]), "", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DossierError::Forbidden(_)));
    assert_eq!(harness.cluster.pod_count(), 0);
}

#[tokio::test]
async fn test_tenant_prompt_then_selection() {
    let harness = TestHarness::new();
    harness.add_tenant(tenant("beta")).add_tenant(tenant("alpha"));
    let alice = HubUser::new("alice", &["alpha", "beta"]);

    let SpawnOutcome::NeedsTenant(choices) = harness.controller.spawn(&alice, "", None).await.unwrap()
    else {
        panic!("expected a tenant prompt");
    };
    let names: Vec<_> = choices.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(harness.cluster.pod_count(), 0);

    // a tenant outside the eligible set is refused
    let err = harness
        .controller
        .select_tenant(&alice, "", "gamma")
        .await
        .unwrap_err();
    assert!(matches!(err, DossierError::Forbidden(_)));

    harness.controller.select_tenant(&alice, "", "beta").await.unwrap();
    let outcome = harness.controller.spawn(&alice, "", None).await.unwrap();
    assert!(matches!(outcome, SpawnOutcome::Ready { .. }));
    assert!(harness.cluster.pod("beta-alice", "dossier-alice").is_some());
}

#[tokio::test]
async fn test_selection_rechecks_current_membership() {
    let harness = TestHarness::new();
    harness.add_tenant(tenant("alpha")).add_tenant(tenant("beta"));
    let alice = HubUser::new("alice", &["alpha", "beta"]);
    harness.controller.spawn(&alice, "", None).await.unwrap();

    harness.cluster.remove_tenant("beta");
    let err = harness
        .controller
        .select_tenant(&alice, "", "beta")
        .await
        .unwrap_err();
    assert!(matches!(err, DossierError::Forbidden(_)));
    assert_eq!(err.to_string(), "User alice is not assigned to tenant beta");
    assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_spawner_prompt_lists_default_first() {
    let harness = TestHarness::new();
    harness
        .add_tenant(tenant("physics"))
        .add_spawner(recording_spawner("zeta", None))
        .add_spawner(recording_spawner("alpha", Some(&["physics"])))
        .add_spawner(recording_spawner("chem-only", Some(&["chem"])));
    let alice = HubUser::new("alice", &["physics"]);

    let SpawnOutcome::NeedsBackend(choices) = harness.controller.spawn(&alice, "", None).await.unwrap()
    else {
        panic!("expected a spawner prompt");
    };
    let names: Vec<_> = choices.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["default", "alpha", "zeta"]);
}

#[tokio::test]
async fn test_custom_backend_runs_the_workload() {
    let harness = TestHarness::new();
    harness
        .add_tenant(tenant("physics"))
        .add_spawner(recording_spawner("hpc", None))
        .add_spawner(recording_spawner("gpu", None));
    let alice = HubUser::new("alice", &["physics"]);

    harness.controller.spawn(&alice, "", None).await.unwrap();
    harness.controller.select_backend(&alice, "", "gpu").await.unwrap();
    let SpawnOutcome::Ready { endpoint, .. } = harness.controller.spawn(&alice, "", None).await.unwrap()
    else {
        panic!("expected a running workload");
    };

    assert_eq!(endpoint.host, "gpu.recording");
    assert_eq!(harness.events(), vec!["gpu:alice:start"]);
    assert_eq!(harness.cluster.pod_count(), 0);
    let sessions = harness.controller.sessions("alice").await.unwrap();
    assert_eq!(sessions[0].class, RECORDING_CLASS);
    assert_eq!(sessions[0].spawner.as_deref(), Some("gpu"));
}

#[tokio::test]
async fn test_unknown_spawner_selection() {
    let harness = TestHarness::new();
    harness
        .add_tenant(tenant("physics"))
        .add_spawner(recording_spawner("hpc", None))
        .add_spawner(recording_spawner("gpu", None));
    let alice = HubUser::new("alice", &["physics"]);
    harness.controller.spawn(&alice, "", None).await.unwrap();

    let err = harness
        .controller
        .select_backend(&alice, "", "quantum")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Spawner quantum is not defined.");
}

#[tokio::test]
async fn test_logout_with_shutdown_reverts_backend() {
    let mut config = Config::default();
    config.tenancy.shutdown_on_logout = true;
    let harness = TestHarness::with_config(config);
    harness
        .add_tenant(tenant("physics"))
        .add_spawner(recording_spawner("hpc", None));
    let alice = HubUser::new("alice", &["physics"]);

    harness.controller.spawn(&alice, "", None).await.unwrap();
    let before = harness.controller.sessions("alice").await.unwrap();
    assert_eq!(before[0].class, RECORDING_CLASS);
    assert_eq!(before[0].phase, Phase::Ready);

    harness.controller.logout("alice").await.unwrap();
    assert_eq!(harness.events(), vec!["hpc:alice:start", "hpc:alice:stop"]);
    assert!(harness.controller.sessions("alice").await.unwrap().is_empty());

    // the next login starts over from tenant resolution
    harness.remove_spawner("hpc");
    harness.controller.spawn(&alice, "", None).await.unwrap();
    let again = harness.controller.sessions("alice").await.unwrap();
    assert_eq!(again[0].class, dossier_hub::backend::KUBERNETES_CLASS);
    assert_eq!(again[0].spawner, None);
    assert_eq!(again[0].tenant.as_deref(), Some("physics"));
}

#[tokio::test]
async fn test_logout_clears_only_idle_slots() {
    let harness = TestHarness::new();
    harness.add_tenant(tenant("alpha")).add_tenant(tenant("beta"));
    let alice = HubUser::new("alice", &["alpha", "beta"]);

    // default slot runs, named slot is stuck at the tenant prompt
    harness.controller.select_tenant(&alice, "", "alpha").await.unwrap();
    harness.controller.spawn(&alice, "", None).await.unwrap();
    harness.controller.select_tenant(&alice, "scratch", "beta").await.unwrap();

    harness.controller.logout("alice").await.unwrap();
    let sessions = harness.controller.sessions("alice").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].slot, "");
    assert_eq!(sessions[0].tenant.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn test_manual_resources_are_range_checked() {
    let harness = TestHarness::new();
    let mut physics = annotated_tenant("physics", &[("dossier.unito.it/resource-policy", "manual")]);
    physics.spec = serde_json::from_value(serde_json::json!({
        "limitRanges": { "items": [{ "limits": [{
            "type": "Container",
            "default": { "cpu": "1" },
            "max": { "cpu": "2", "memory": "4Gi" }
        }] }] }
    }))
    .unwrap();
    harness.add_tenant(physics);
    let alice = HubUser::new("alice", &["physics"]);

    let SpawnOutcome::Options(form) = harness.controller.spawn(&alice, "", None).await.unwrap() else {
        panic!("expected the options form");
    };
    assert_eq!(form.resources[0].max, Some(2.0));

    let too_big = UserOptions {
        cpu: Some("8".into()),
        ..Default::default()
    };
    let err = harness
        .controller
        .spawn(&alice, "", Some(too_big))
        .await
        .unwrap_err();
    assert!(matches!(err, DossierError::InvalidInput { .. }));
    assert_eq!(harness.cluster.pod_count(), 0);

    let fits = UserOptions {
        cpu: Some("1500m".into()),
        memory: Some("2Gi".into()),
        ..Default::default()
    };
    harness.controller.spawn(&alice, "", Some(fits)).await.unwrap();
    let pod = harness.cluster.pod("physics-alice", "dossier-alice").unwrap();
    let limits = pod.spec.unwrap().containers[0]
        .resources
        .clone()
        .unwrap()
        .limits
        .unwrap();
    assert_eq!(limits["cpu"].0, "1.5");
    assert_eq!(limits["memory"].0, "2147483648");
}
