//! Single source of truth for the running experiment.
//!
//! Every read and write goes through one `parking_lot::Mutex`, held only for
//! the check-and-set itself and never across I/O.

use crate::models::{now_rfc3339, ThroughputResult};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExperimentStatus {
    Idle,
    Running,
}

#[derive(Debug)]
struct Experiment {
    status: ExperimentStatus,
    id: Option<String>,
    start_time: Option<String>,
    active_hosts: Vec<String>,
    results: Vec<ThroughputResult>,
    cancel: CancellationToken,
}

impl Experiment {
    fn reset(&mut self) {
        self.status = ExperimentStatus::Idle;
        self.active_hosts.clear();
        self.results.clear();
        self.cancel.cancel();
    }

    fn is_current(&self, id: &str) -> bool {
        self.status == ExperimentStatus::Running && self.id.as_deref() == Some(id)
    }
}

/// Point-in-time view served by `/experiment_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSnapshot {
    pub running: bool,
    pub current_experiment_id: Option<String>,
    pub active_hosts: Vec<String>,
    pub start_time: Option<String>,
    pub results_count: usize,
}

#[derive(Debug)]
pub struct ExperimentState {
    inner: Mutex<Experiment>,
}

impl Default for ExperimentState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Experiment {
                status: ExperimentStatus::Idle,
                id: None,
                start_time: None,
                active_hosts: Vec::new(),
                results: Vec::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Admission gate: Idle -> Running. Hands back the new experiment's
    /// cancellation token, or `None` without touching anything when an
    /// experiment is already running.
    pub fn try_start(&self, id: &str) -> Option<CancellationToken> {
        let mut exp = self.inner.lock();
        if exp.status == ExperimentStatus::Running {
            return None;
        }
        exp.status = ExperimentStatus::Running;
        exp.id = Some(id.to_string());
        exp.start_time = Some(now_rfc3339());
        exp.active_hosts.clear();
        exp.results.clear();
        exp.cancel = CancellationToken::new();
        Some(exp.cancel.clone())
    }

    /// Running -> Idle, whatever experiment is running. Cancels its token so
    /// waiting tasks wake up.
    pub fn stop(&self) -> bool {
        let mut exp = self.inner.lock();
        if exp.status != ExperimentStatus::Running {
            return false;
        }
        exp.reset();
        true
    }

    /// Running -> Idle only if `id` is still the running experiment.
    pub fn finish(&self, id: &str) -> bool {
        let mut exp = self.inner.lock();
        if !exp.is_current(id) {
            return false;
        }
        exp.reset();
        true
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.inner.lock().is_current(id)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().status == ExperimentStatus::Idle
    }

    pub fn add_active_host(&self, id: &str, host: &str) {
        let mut exp = self.inner.lock();
        if exp.is_current(id) && !exp.active_hosts.iter().any(|h| h == host) {
            exp.active_hosts.push(host.to_string());
        }
    }

    /// Appends to the in-memory buffer; results of an experiment that is no
    /// longer running are dropped here (they still reach the durable log).
    pub fn record_result(&self, result: ThroughputResult) -> bool {
        let mut exp = self.inner.lock();
        if !exp.is_current(&result.experiment_id) {
            return false;
        }
        exp.results.push(result);
        true
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        let exp = self.inner.lock();
        ExperimentSnapshot {
            running: exp.status == ExperimentStatus::Running,
            current_experiment_id: exp.id.clone(),
            active_hosts: exp.active_hosts.clone(),
            start_time: exp.start_time.clone(),
            results_count: exp.results.len(),
        }
    }

    pub fn current_results(&self) -> (Option<String>, Vec<ThroughputResult>) {
        let exp = self.inner.lock();
        (exp.id.clone(), exp.results.clone())
    }
}
