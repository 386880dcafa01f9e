/**
 * LISTENER SUPERVISOR - Cycle de vie du serveur iperf3 partagé
 *
 * RÔLE :
 * Possède l'unique handle du listener iperf3 lancé sur le probe host pendant
 * une expérience. Aucun autre module ne touche au processus.
 *
 * FONCTIONNEMENT :
 * - start : nettoie un listener orphelin (pgrep/pkill sur `iperf3 -s -p <port>`,
 *   jamais sur les clients), lance `iperf3 -s`
 *   détaché dans son propre process group, attend le settle, vérifie qu'il vit
 * - stop  : idempotent ; SIGTERM au groupe, attente bornée, SIGKILL si besoin,
 *   puis pkill best-effort sur le probe host pour les instances orphelines
 */

use crate::exec::{BackgroundProcess, HostExecutor};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub probe_host: String,
    pub binary: String,
    pub port: u16,
    /// wait after launch before declaring the listener up
    pub settle: Duration,
    /// SIGTERM -> SIGKILL escalation delay
    pub stop_grace: Duration,
    pub probe_timeout: Duration,
    /// pause after killing a leftover listener
    pub restart_pause: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("measurement listener unavailable on {host}: {reason}")]
    ResourceUnavailable { host: String, reason: String },
}

struct ListenerHandle {
    id: Uuid,
    process: Box<dyn BackgroundProcess>,
    started_at: Instant,
}

pub struct ListenerSupervisor {
    executor: Arc<dyn HostExecutor>,
    settings: ListenerSettings,
    slot: Mutex<Option<ListenerHandle>>,
}

impl ListenerSupervisor {
    pub fn new(executor: Arc<dyn HostExecutor>, settings: ListenerSettings) -> Self {
        Self {
            executor,
            settings,
            slot: Mutex::new(None),
        }
    }

    /// Starts the shared listener and returns the identity of its handle.
    pub async fn start(&self) -> Result<Uuid, SupervisorError> {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            warn!(listener = %previous.id, "listener still registered, stopping it first");
            self.shutdown(previous).await;
        }

        self.clear_leftovers().await;

        let host = &self.settings.probe_host;
        let argv = vec![
            self.settings.binary.clone(),
            "-s".to_string(),
            "-p".to_string(),
            self.settings.port.to_string(),
        ];
        let mut process = self
            .executor
            .spawn_detached(host, &argv)
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        tokio::time::sleep(self.settings.settle).await;
        if !process.is_running() {
            return Err(self.unavailable("listener exited during start-up".into()));
        }

        let handle = ListenerHandle {
            id: Uuid::new_v4(),
            process,
            started_at: Instant::now(),
        };
        info!(
            listener = %handle.id,
            host = %host,
            port = self.settings.port,
            pid = ?handle.process.id(),
            "measurement listener started"
        );
        let id = handle.id;
        *slot = Some(handle);
        Ok(id)
    }

    /// Stops the listener. With `expected`, only a listener with that identity
    /// is stopped. Without a registered listener this is a no-op.
    pub async fn stop(&self, expected: Option<Uuid>) {
        let handle = {
            let mut slot = self.slot.lock().await;
            match (slot.as_ref(), expected) {
                (None, _) => return,
                (Some(h), Some(id)) if h.id != id => {
                    debug!(listener = %h.id, expected = %id, "listener belongs to another run, left running");
                    return;
                }
                _ => slot.take(),
            }
        };
        if let Some(handle) = handle {
            self.shutdown(handle).await;
        }
    }

    #[cfg(test)]
    async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    async fn shutdown(&self, mut handle: ListenerHandle) {
        let uptime = handle.started_at.elapsed();

        if handle.process.is_running() {
            if let Err(e) = handle.process.terminate() {
                warn!(listener = %handle.id, error = %e, "SIGTERM failed");
            }
            if !handle.process.wait_for_exit(self.settings.stop_grace).await {
                warn!(listener = %handle.id, grace = ?self.settings.stop_grace, "listener unresponsive, force killing");
                if let Err(e) = handle.process.kill() {
                    error!(listener = %handle.id, error = %e, "SIGKILL failed");
                }
                handle.process.wait_for_exit(self.settings.stop_grace).await;
            }
        }
        info!(listener = %handle.id, uptime_s = uptime.as_secs(), "measurement listener stopped");

        self.kill_by_name().await;
    }

    /// A listener left over by an unclean shutdown would hold the port.
    async fn clear_leftovers(&self) {
        let host = &self.settings.probe_host;
        let probe = vec!["pgrep".to_string(), "-f".to_string(), self.listener_pattern()];
        match self.executor.run(host, &probe, Some(self.settings.probe_timeout)).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                info!(host = %host, pids = %out.stdout.trim().replace('\n', ","), "leftover listener found, killing it");
                self.kill_by_name().await;
                tokio::time::sleep(self.settings.restart_pause).await;
            }
            Ok(_) => {}
            Err(e) => debug!(host = %host, error = %e, "leftover listener probe failed"),
        }
    }

    async fn kill_by_name(&self) {
        let host = &self.settings.probe_host;
        let argv = vec!["pkill".to_string(), "-f".to_string(), self.listener_pattern()];
        if let Err(e) = self.executor.run(host, &argv, Some(self.settings.probe_timeout)).await {
            debug!(host = %host, error = %e, "pkill on probe host failed");
        }
    }

    /// Matches the listener command line only; clients share the PID
    /// namespace and must survive.
    fn listener_pattern(&self) -> String {
        format!("{} -s -p {}", self.settings.binary, self.settings.port)
    }

    fn unavailable(&self, reason: String) -> SupervisorError {
        SupervisorError::ResourceUnavailable {
            host: self.settings.probe_host.clone(),
            reason,
        }
    }
}
