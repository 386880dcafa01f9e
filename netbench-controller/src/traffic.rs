//! One task per scheduled host: wait the offset, run the iperf3 client,
//! parse, persist.
//!
//! Waiting -> Running -> Done, or Waiting -> Aborted when the experiment is
//! stopped before the offset elapses. A task past its last pre-execution
//! check always runs to completion (or timeout) and produces a result.

use crate::exec::HostExecutor;
use crate::models::{now_rfc3339, Protocol, ScheduleEntry, ThroughputResult, TrafficConfig};
use crate::parser::parse_throughput;
use crate::state::ExperimentState;
use crate::store::ResultStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TrafficSettings {
    /// address of the probe host the clients connect to
    pub probe_address: String,
    pub binary: String,
    pub port: u16,
    /// cancellation latency while waiting
    pub poll_interval: Duration,
    /// added to the run duration to bound the client command
    pub client_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct TrafficJob {
    pub experiment_id: String,
    pub entry: ScheduleEntry,
    pub address: String,
    pub traffic: TrafficConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(ThroughputResult),
    Aborted,
}

#[derive(Clone)]
pub struct TrafficExecutor {
    executor: Arc<dyn HostExecutor>,
    state: Arc<ExperimentState>,
    store: Arc<ResultStore>,
    settings: TrafficSettings,
}

impl TrafficExecutor {
    pub fn new(
        executor: Arc<dyn HostExecutor>,
        state: Arc<ExperimentState>,
        store: Arc<ResultStore>,
        settings: TrafficSettings,
    ) -> Self {
        Self {
            executor,
            state,
            store,
            settings,
        }
    }

    pub async fn run_job(&self, job: TrafficJob, cancel: CancellationToken) -> TaskOutcome {
        let host = job.entry.hostname.as_str();
        info!(
            experiment_id = %job.experiment_id,
            host,
            offset_s = job.entry.start_offset.as_secs_f64(),
            duration_s = job.entry.run_duration.as_secs_f64(),
            protocol = %job.traffic.protocol,
            bitrate = %job.traffic.bitrate,
            "traffic task scheduled"
        );

        if !self.wait_offset(&job, &cancel).await {
            info!(experiment_id = %job.experiment_id, host, "traffic task cancelled before start");
            return TaskOutcome::Aborted;
        }
        // last check before the point of no return
        if cancel.is_cancelled() || !self.state.is_running(&job.experiment_id) {
            info!(experiment_id = %job.experiment_id, host, "traffic task cancelled before start");
            return TaskOutcome::Aborted;
        }

        let start_time = now_rfc3339();
        let throughput = self.measure(&job).await;
        let end_time = now_rfc3339();

        let result = ThroughputResult {
            experiment_id: job.experiment_id.clone(),
            hostname: host.to_string(),
            address: job.address.clone(),
            protocol: job.traffic.protocol,
            bitrate: job.traffic.bitrate.clone(),
            throughput,
            start_time,
            end_time,
            duration: job.entry.run_seconds(),
        };

        if let Err(e) = self.store.append(&result).await {
            warn!(experiment_id = %job.experiment_id, host, error = %e, "failed to persist result");
        }
        if !self.state.record_result(result.clone()) {
            debug!(experiment_id = %job.experiment_id, host, "experiment already ended, result kept in log only");
        }
        info!(experiment_id = %job.experiment_id, host, throughput_mbps = throughput, "traffic task done");
        TaskOutcome::Completed(result)
    }

    /// Cooperative wait. False as soon as the experiment is no longer running.
    async fn wait_offset(&self, job: &TrafficJob, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + job.entry.start_offset;
        loop {
            if cancel.is_cancelled() || !self.state.is_running(&job.experiment_id) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let step = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(step) => {}
            }
        }
    }

    /// Client failures never escape: they are logged and measured as 0 Mbps.
    async fn measure(&self, job: &TrafficJob) -> f64 {
        let host = job.entry.hostname.as_str();
        let argv = self.client_argv(job);
        let timeout = job.entry.run_duration + self.settings.client_grace;
        debug!(experiment_id = %job.experiment_id, host, command = %argv.join(" "), "running client");

        match self.executor.run(host, &argv, Some(timeout)).await {
            Ok(out) => {
                if !out.stderr.trim().is_empty() {
                    let excerpt: String = out.stderr.chars().take(200).collect();
                    debug!(experiment_id = %job.experiment_id, host, stderr = %excerpt, "client diagnostics");
                }
                if out.success() {
                    parse_throughput(&out.stdout)
                } else {
                    warn!(
                        experiment_id = %job.experiment_id,
                        host,
                        exit_code = out.exit_code,
                        "client exited with failure, recording 0 Mbps"
                    );
                    0.0
                }
            }
            Err(e) => {
                warn!(experiment_id = %job.experiment_id, host, error = %e, "client could not run, recording 0 Mbps");
                0.0
            }
        }
    }

    pub fn client_argv(&self, job: &TrafficJob) -> Vec<String> {
        let mut argv = vec![
            self.settings.binary.clone(),
            "-c".to_string(),
            self.settings.probe_address.clone(),
            "-t".to_string(),
            job.entry.run_seconds().to_string(),
            "-p".to_string(),
            self.settings.port.to_string(),
            "-J".to_string(),
        ];
        if job.traffic.protocol == Protocol::Udp {
            argv.extend(["-u".to_string(), "-b".to_string(), job.traffic.bitrate.clone()]);
        }
        argv
    }
}
