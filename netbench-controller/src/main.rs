/**
 * NETBENCH CONTROLLER - Point d'entrée du contrôleur d'expériences
 *
 * RÔLE : Charge la configuration, choisit l'exécuteur de commandes (mnexec ou
 * local), monte l'orchestrateur et sert l'API REST.
 *
 * ARCHITECTURE : API REST -> Orchestrator -> (ListenerSupervisor, TrafficExecutor)
 * -> HostExecutor. Ctrl-C arrête l'expérience en cours et le listener.
 */

use anyhow::Context;
use netbench_controller::config::{load_config, ExecutorKind};
use netbench_controller::exec::{HostExecutor, LocalExecutor, MnexecExecutor};
use netbench_controller::health::HealthTracker;
use netbench_controller::http::{build_router, AppState};
use netbench_controller::orchestrator::Orchestrator;
use netbench_controller::store::ResultStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    let settings = cfg.orchestrator_settings().context("invalid configuration")?;

    let executor: Arc<dyn HostExecutor> = match cfg.executor.kind {
        ExecutorKind::Mnexec => Arc::new(
            MnexecExecutor::new(&cfg.executor.wrapper, cfg.executor.locator_patterns.clone())
                .context("invalid executor wrapper")?,
        ),
        ExecutorKind::Local => Arc::new(LocalExecutor::new(cfg.hosts.keys().cloned())),
    };
    info!(
        kind = ?cfg.executor.kind,
        hosts = cfg.hosts.len(),
        excluded = ?cfg.excluded,
        probe_host = %cfg.probe_host,
        "executor ready"
    );

    let store = Arc::new(ResultStore::new(cfg.results_path.clone()));
    info!(path = %store.path().display(), "result log");
    let orchestrator = Arc::new(Orchestrator::new(cfg.host_table(), settings, executor, store));

    let api_key = std::env::var("NETBENCH_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        info!("NETBENCH_API_KEY not set, API is open");
    }

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        orchestrator: orchestrator.clone(),
        health_tracker: HealthTracker::new(),
        api_key,
    };
    let app = build_router(app_state);

    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("cannot bind {}", cfg.listen))?;
    info!(addr = %cfg.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested, stopping experiment and listener");
            orchestrator.shutdown().await;
        })
        .await
        .context("server error")?;

    Ok(())
}
