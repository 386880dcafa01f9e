use crate::hosts::HostTable;
use crate::orchestrator::OrchestratorSettings;
use crate::planner::DEFAULT_SLOT;
use crate::supervisor::ListenerSettings;
use crate::traffic::TrafficSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("probe host '{0}' is not declared in hosts")]
    UnknownProbeHost(String),
    #[error("slot duration must be greater than zero")]
    ZeroSlot,
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    pub listen: SocketAddr,
    pub results_path: PathBuf,
    /// host name -> address on the fabric
    pub hosts: BTreeMap<String, String>,
    pub excluded: Vec<String>,
    /// host running the shared iperf3 listener
    pub probe_host: String,
    pub measurement: MeasurementConf,
    pub executor: ExecutorConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MeasurementConf {
    pub binary: String,
    pub port: u16,
    pub slot_secs: u64,
    pub poll_interval_ms: u64,
    pub client_grace_secs: u64,
    pub settle_ms: u64,
    pub stop_grace_secs: u64,
    pub probe_timeout_secs: u64,
    pub restart_pause_ms: u64,
    pub watchdog_margin_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Mnexec,
    Local,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConf {
    pub kind: ExecutorKind,
    pub wrapper: String, // ex: "sudo mnexec -a {pid}"
    pub locator_patterns: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let hosts = [
            ("h1", "10.1.1.10"),
            ("h2", "10.1.1.20"),
            ("h3", "10.1.1.30"),
            ("h4", "10.2.1.10"),
            ("h5", "10.2.1.20"),
            ("h6", "10.3.1.10"),
            ("h7", "10.4.1.10"),
            ("h8", "10.4.1.20"),
            ("h9", "10.8.1.10"),
        ]
        .into_iter()
        .map(|(h, ip)| (h.to_string(), ip.to_string()))
        .collect();

        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5000)),
            results_path: PathBuf::from("experiment_results.json"),
            hosts,
            // h6 = controller, h7 = iperf3 listener
            excluded: vec!["h6".into(), "h7".into()],
            probe_host: "h7".into(),
            measurement: MeasurementConf::default(),
            executor: ExecutorConf::default(),
        }
    }
}

impl Default for MeasurementConf {
    fn default() -> Self {
        Self {
            binary: "iperf3".into(),
            port: 5201,
            slot_secs: DEFAULT_SLOT.as_secs(),
            poll_interval_ms: 500,
            client_grace_secs: 20,
            settle_ms: 1500,
            stop_grace_secs: 5,
            probe_timeout_secs: 2,
            restart_pause_ms: 1000,
            watchdog_margin_secs: 30,
        }
    }
}

impl Default for ExecutorConf {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::Mnexec,
            wrapper: "sudo mnexec -a {pid}".into(),
            locator_patterns: vec![
                "mininet:{host}".into(),
                "mnexec.*{host}".into(),
                "mininet.*{host}".into(),
            ],
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.hosts.contains_key(&self.probe_host) {
            return Err(ConfigError::UnknownProbeHost(self.probe_host.clone()));
        }
        if self.measurement.slot_secs == 0 {
            return Err(ConfigError::ZeroSlot);
        }
        if self.measurement.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    pub fn host_table(&self) -> HostTable {
        HostTable::new(&self.hosts, &self.excluded)
    }

    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        self.validate()?;
        let m = &self.measurement;
        let probe_address = self.hosts[&self.probe_host].clone();

        Ok(OrchestratorSettings {
            slot: Duration::from_secs(m.slot_secs),
            watchdog_margin: Duration::from_secs(m.watchdog_margin_secs),
            listener: ListenerSettings {
                probe_host: self.probe_host.clone(),
                binary: m.binary.clone(),
                port: m.port,
                settle: Duration::from_millis(m.settle_ms),
                stop_grace: Duration::from_secs(m.stop_grace_secs),
                probe_timeout: Duration::from_secs(m.probe_timeout_secs),
                restart_pause: Duration::from_millis(m.restart_pause_ms),
            },
            traffic: TrafficSettings {
                probe_address,
                binary: m.binary.clone(),
                port: m.port,
                poll_interval: Duration::from_millis(m.poll_interval_ms),
                client_grace: Duration::from_secs(m.client_grace_secs),
            },
        })
    }
}

pub async fn load_config() -> ControllerConfig {
    let path = std::env::var("NETBENCH_CONFIG").unwrap_or_else(|_| "netbench.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> ControllerConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "no config file, using built-in defaults");
        return ControllerConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return ControllerConfig::default();
    }
    match serde_yaml::from_str(&txt) {
        Ok(cfg) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using built-in defaults");
            ControllerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_describe_reference_fabric() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.hosts.len(), 9);
        assert_eq!(cfg.hosts["h7"], "10.4.1.10");
        cfg.validate().unwrap();

        let settings = cfg.orchestrator_settings().unwrap();
        assert_eq!(settings.slot, Duration::from_secs(30));
        assert_eq!(settings.traffic.probe_address, "10.4.1.10");
        assert_eq!(settings.traffic.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.listener.port, 5201);
    }

    #[tokio::test]
    async fn partial_yaml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("netbench.yaml");
        std::fs::write(
            &path,
            "probe_host: srv\nhosts:\n  a: 10.0.0.1\n  srv: 10.0.0.9\nexcluded: [srv]\nmeasurement:\n  slot_secs: 10\nexecutor:\n  kind: local\n",
        )
        .unwrap();

        let cfg = load_config_from(&path).await;
        assert_eq!(cfg.probe_host, "srv");
        assert_eq!(cfg.measurement.slot_secs, 10);
        assert_eq!(cfg.measurement.port, 5201);
        assert_eq!(cfg.executor.kind, ExecutorKind::Local);
        assert_eq!(cfg.executor.wrapper, "sudo mnexec -a {pid}");
        cfg.validate().unwrap();
    }

    #[tokio::test]
    async fn missing_or_invalid_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config_from(dir.path().join("absent.yaml")).await;
        assert_eq!(cfg.probe_host, "h7");

        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "hosts: [not, a, map").unwrap();
        let cfg = load_config_from(&path).await;
        assert_eq!(cfg.hosts.len(), 9);
    }

    #[test]
    fn probe_host_must_exist() {
        let cfg = ControllerConfig {
            probe_host: "h42".into(),
            ..ControllerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::UnknownProbeHost(h)) if h == "h42"));
        assert!(cfg.orchestrator_settings().is_err());
    }
}
