use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dossier_hub::authenticator::{AllowList, SessionAuthenticator};
use dossier_hub::backend::BackendRegistry;
use dossier_hub::cluster::{KubeCluster, SharedCluster};
use dossier_hub::config::Config;
use dossier_hub::controller::SessionController;
use dossier_hub::directory::Directory;
use dossier_hub::http::{router, AppState};
use dossier_hub::views::HtmlRenderer;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("dossier-hub {VERSION} - tenant-aware session spawning");
    println!();
    println!("USAGE:");
    println!("    dossier-hub [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config FILE  Configuration file (default: $DOSSIER_CONFIG or ~/.config/dossier/config.toml)");
    println!("    -v, --version      Print version");
    println!("    -h, --help         Print this help");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-v" => {
                println!("dossier-hub {VERSION}");
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                let path = args.next().context("--config requires a file path")?;
                config_path = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("Unknown argument: {other}"),
        }
    }

    let config = Arc::new(Config::load(config_path.as_deref())?);
    anyhow::ensure!(
        !config.auth.cookie_secret.is_empty(),
        "No cookie secret: set [auth] cookie_secret or $DOSSIER_COOKIE_SECRET"
    );
    info!(
        base_url = %config.server.normalized_base_url(),
        default_tenant = ?config.tenancy.default_tenant,
        manage_groups = config.auth.manage_groups,
        "Loaded configuration"
    );

    let timeout = Duration::from_secs(config.kubernetes.request_timeout_secs);
    let cluster: SharedCluster = Arc::new(
        KubeCluster::connect(timeout)
            .await
            .context("Failed to connect to the Kubernetes API")?,
    );

    let registry = Arc::new(BackendRegistry::with_builtin(cluster.clone(), config.clone()));
    info!(classes = ?registry.classes(), "Registered backends");

    let authenticator = SessionAuthenticator::new(
        Box::new(AllowList::from_config(&config.auth)),
        Directory::new(cluster.clone()),
        &config.auth,
    );
    let state = AppState {
        controller: Arc::new(SessionController::new(config.clone(), cluster, registry)),
        authenticator: Arc::new(authenticator),
        renderer: Arc::new(HtmlRenderer),
        config: config.clone(),
    };

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, version = VERSION, "Dossier hub listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
