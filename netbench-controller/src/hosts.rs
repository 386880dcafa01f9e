use crate::models::{HostProfile, Protocol, TrafficConfig};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

/// Body of `POST /start_experiment`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub hosts: Option<BTreeMap<String, HostRequest>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostRequest {
    #[serde(default)]
    pub protocol: Option<String>,
    /// "10M", "500K" or a bare number of bits/sec
    #[serde(default)]
    pub bitrate: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("'hosts' with per-host configuration is required")]
    MissingHosts,
    #[error("unknown host '{0}'")]
    UnknownHost(String),
    #[error("invalid protocol for {host}: {reason}")]
    InvalidProtocol { host: String, reason: String },
    #[error("missing bitrate for {0}")]
    MissingBitrate(String),
    #[error("invalid bitrate for {0}")]
    InvalidBitrate(String),
}

/// Static host table, immutable after load.
#[derive(Debug, Clone, Default)]
pub struct HostTable {
    profiles: BTreeMap<String, HostProfile>,
    /// as configured, names without an address included
    excluded: Vec<String>,
}

impl HostTable {
    pub fn new(hosts: &BTreeMap<String, String>, excluded: &[String]) -> Self {
        let skip: HashSet<&str> = excluded.iter().map(String::as_str).collect();
        let profiles = hosts
            .iter()
            .map(|(name, address)| {
                let profile = HostProfile {
                    name: name.clone(),
                    address: address.clone(),
                    excluded: skip.contains(name.as_str()),
                };
                (name.clone(), profile)
            })
            .collect();
        let mut kept: Vec<String> = Vec::new();
        for name in excluded {
            if !kept.contains(name) {
                kept.push(name.clone());
            }
        }
        Self { profiles, excluded: kept }
    }

    pub fn address(&self, name: &str) -> Option<&str> {
        self.profiles.get(name).map(|p| p.address.as_str())
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.iter().any(|e| e == name)
    }

    /// Known and not excluded
    pub fn is_eligible(&self, name: &str) -> bool {
        self.profiles.contains_key(name) && !self.is_excluded(name)
    }

    pub fn available(&self) -> BTreeMap<String, String> {
        self.profiles
            .values()
            .filter(|p| self.is_eligible(&p.name))
            .map(|p| (p.name.clone(), p.address.clone()))
            .collect()
    }

    pub fn excluded(&self) -> Vec<String> {
        self.excluded.clone()
    }

    /// Checks a start request and keeps only eligible hosts. Excluded hosts
    /// are skipped silently, anything else unknown is rejected.
    pub fn validate(&self, request: &StartRequest) -> Result<BTreeMap<String, TrafficConfig>, RequestError> {
        let hosts = request.hosts.as_ref().ok_or(RequestError::MissingHosts)?;
        let mut accepted = BTreeMap::new();

        for (name, cfg) in hosts {
            if self.is_excluded(name) {
                continue;
            }
            if !self.is_eligible(name) {
                return Err(RequestError::UnknownHost(name.clone()));
            }

            let protocol = cfg
                .protocol
                .as_deref()
                .unwrap_or("")
                .parse::<Protocol>()
                .map_err(|reason| RequestError::InvalidProtocol {
                    host: name.clone(),
                    reason,
                })?;

            let bitrate = match &cfg.bitrate {
                None | Some(serde_json::Value::Null) => return Err(RequestError::MissingBitrate(name.clone())),
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(_) => return Err(RequestError::InvalidBitrate(name.clone())),
            };

            accepted.insert(name.clone(), TrafficConfig { protocol, bitrate });
        }

        Ok(accepted)
    }
}
