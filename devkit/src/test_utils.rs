/*!
Test Harness pour le contrôleur netbench

Monte un orchestrateur complet (table de hosts de référence h1..h9, h6/h7
exclus, listener sur h7) au-dessus d'un ScriptedExecutor et d'un journal de
résultats temporaire, avec des durées compressées : slot de 200 ms, polling
de 10 ms.
*/

use crate::scripted_executor::ScriptedExecutor;
use anyhow::{bail, Result};
use netbench_controller::config::ControllerConfig;
use netbench_controller::health::HealthTracker;
use netbench_controller::hosts::StartRequest;
use netbench_controller::http::{build_router, AppState};
use netbench_controller::models::ThroughputResult;
use netbench_controller::orchestrator::{ExperimentError, Orchestrator, OrchestratorSettings};
use netbench_controller::store::ResultStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const FAST_SLOT: Duration = Duration::from_millis(200);

pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub executor: ScriptedExecutor,
    results_path: PathBuf,
    _dir: TempDir,
}

impl TestHarness {
    pub fn new(executor: ScriptedExecutor) -> Result<Self> {
        Self::with_settings(executor, Self::fast_settings())
    }

    pub fn with_settings(executor: ScriptedExecutor, settings: OrchestratorSettings) -> Result<Self> {
        init_tracing();

        let dir = TempDir::new()?;
        let results_path = dir.path().join("experiment_results.json");
        let cfg = ControllerConfig::default();
        let store = Arc::new(ResultStore::new(results_path.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            cfg.host_table(),
            settings,
            Arc::new(executor.clone()),
            store,
        ));

        Ok(Self {
            orchestrator,
            executor,
            results_path,
            _dir: dir,
        })
    }

    /// Reference configuration with every delay compressed for tests
    pub fn fast_settings() -> OrchestratorSettings {
        let cfg = ControllerConfig::default();
        let mut settings = match cfg.orchestrator_settings() {
            Ok(settings) => settings,
            Err(e) => panic!("default configuration must be valid: {e}"),
        };
        settings.slot = FAST_SLOT;
        settings.watchdog_margin = Duration::from_secs(2);
        settings.listener.settle = Duration::from_millis(10);
        settings.listener.stop_grace = Duration::from_millis(100);
        settings.listener.probe_timeout = Duration::from_secs(1);
        settings.listener.restart_pause = Duration::from_millis(10);
        settings.traffic.poll_interval = Duration::from_millis(10);
        settings.traffic.client_grace = Duration::from_secs(1);
        settings
    }

    pub fn results_path(&self) -> &PathBuf {
        &self.results_path
    }

    pub fn router(&self) -> axum::Router {
        build_router(AppState {
            orchestrator: self.orchestrator.clone(),
            health_tracker: HealthTracker::new(),
            api_key: None,
        })
    }

    /// `[(host, protocol, bitrate)]` -> start request body
    pub fn request(hosts: &[(&str, &str, &str)]) -> StartRequest {
        let hosts: serde_json::Map<String, serde_json::Value> = hosts
            .iter()
            .map(|(h, p, b)| (h.to_string(), json!({"protocol": p, "bitrate": b})))
            .collect();
        serde_json::from_value(json!({ "hosts": hosts })).unwrap_or_default()
    }

    pub async fn start(&self, hosts: &[(&str, &str, &str)]) -> Result<String, ExperimentError> {
        self.orchestrator.start(&Self::request(hosts)).await
    }

    pub async fn wait_until_idle(&self, timeout: Duration) -> Result<()> {
        let orchestrator = self.orchestrator.clone();
        self.wait_for("experiment idle", timeout, move || orchestrator.state().is_idle()).await
    }

    /// Polls `condition` every 5 ms until it holds or `timeout` expires
    pub async fn wait_for<F>(&self, what: &str, timeout: Duration, condition: F) -> Result<()>
    where
        F: Fn() -> bool,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bail!("timeout after {:?} waiting for {}", timeout, what)
    }

    pub async fn persisted(&self, experiment_id: &str) -> Result<Vec<ThroughputResult>> {
        Ok(self.orchestrator.query_results(Some(experiment_id)).await?)
    }

    pub async fn wait_for_persisted(&self, experiment_id: &str, count: usize, timeout: Duration) -> Result<Vec<ThroughputResult>> {
        let start = Instant::now();
        loop {
            let results = self.persisted(experiment_id).await?;
            if results.len() >= count {
                return Ok(results);
            }
            if start.elapsed() >= timeout {
                bail!("{} of {} results persisted for {} after {:?}", results.len(), count, experiment_id, timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Init logging pour tests (RUST_LOG, sortie capturée par le test runner)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init()
        .ok();
}
