use crate::models::now_rfc3339;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct ControllerHealth {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Liveness only: answers as long as the process serves requests.
    pub fn get_health(&self) -> ControllerHealth {
        ControllerHealth {
            status: "healthy",
            timestamp: now_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}
