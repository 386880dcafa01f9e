use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Host of the fabric as declared in the static configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    pub name: String,
    pub address: String,
    pub excluded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(format!("unsupported protocol '{other}' (TCP/UDP)")),
        }
    }
}

/// Case-insensitive: older logs carry the protocol as the client sent it ("udp").
impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// Traffic requested for one host in a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficConfig {
    pub protocol: Protocol,
    /// Bitrate exactly as declared (ex: "10M"), handed verbatim to the client.
    pub bitrate: String,
}

/// One throughput measurement, as persisted in the result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputResult {
    pub experiment_id: String,
    pub hostname: String,
    #[serde(alias = "ip")]
    pub address: String,
    pub protocol: Protocol,
    pub bitrate: String,
    /// Mbps, never negative
    pub throughput: f64,
    pub start_time: String,
    pub end_time: String,
    /// seconds requested from the measurement client
    pub duration: u64,
}

/// Staggered slot assigned to one host. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub hostname: String,
    pub start_offset: Duration,
    pub run_duration: Duration,
}

impl ScheduleEntry {
    /// Whole seconds handed to the client (`-t`), at least one.
    pub fn run_seconds(&self) -> u64 {
        let secs = self.run_duration.as_secs();
        let secs = if self.run_duration.subsec_nanos() > 0 { secs + 1 } else { secs };
        secs.max(1)
    }
}

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
