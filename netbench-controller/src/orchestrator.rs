/**
 * ORCHESTRATOR - Pilotage d'une expérience de débit
 *
 * RÔLE :
 * Relie l'admission (state), le planning (planner), le listener partagé
 * (supervisor) et les tâches par host (traffic). Seul point d'entrée de l'API.
 *
 * FONCTIONNEMENT :
 * - start : conflit -> validation -> planning -> admission atomique, puis
 *   lance le driver détaché et rend la main (202)
 * - driver : listener -> une tâche par host -> attente bornée par le watchdog
 *   -> arrêt du listener -> retour à Idle, uniquement si l'expérience est
 *   toujours la sienne
 * - stop : Idle immédiat + annulation ; les clients déjà lancés terminent
 */

use crate::exec::HostExecutor;
use crate::hosts::{HostTable, RequestError, StartRequest};
use crate::models::ThroughputResult;
use crate::planner;
use crate::state::{ExperimentSnapshot, ExperimentState};
use crate::store::{ResultStore, StoreError};
use crate::supervisor::{ListenerSettings, ListenerSupervisor};
use crate::traffic::{TaskOutcome, TrafficExecutor, TrafficJob, TrafficSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub slot: Duration,
    /// added to the schedule length before the driver stops waiting
    pub watchdog_margin: Duration,
    pub listener: ListenerSettings,
    pub traffic: TrafficSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("{0}")]
    Validation(String),
    #[error("experiment already running")]
    Conflict,
    #[error("no experiment running")]
    NotRunning,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<RequestError> for ExperimentError {
    fn from(e: RequestError) -> Self {
        ExperimentError::Validation(e.to_string())
    }
}

pub struct Orchestrator {
    hosts: HostTable,
    state: Arc<ExperimentState>,
    store: Arc<ResultStore>,
    supervisor: ListenerSupervisor,
    traffic: TrafficExecutor,
    slot: Duration,
    watchdog_margin: Duration,
    last_id: Mutex<i128>,
    /// listener owned by the running experiment
    listener: Mutex<Option<(String, Uuid)>>,
}

impl Orchestrator {
    pub fn new(
        hosts: HostTable,
        settings: OrchestratorSettings,
        executor: Arc<dyn HostExecutor>,
        store: Arc<ResultStore>,
    ) -> Self {
        let state = Arc::new(ExperimentState::new());
        let traffic = TrafficExecutor::new(executor.clone(), state.clone(), store.clone(), settings.traffic);
        Self {
            hosts,
            state,
            store,
            supervisor: ListenerSupervisor::new(executor, settings.listener),
            traffic,
            slot: settings.slot,
            watchdog_margin: settings.watchdog_margin,
            last_id: Mutex::new(0),
            listener: Mutex::new(None),
        }
    }

    pub fn hosts(&self) -> &HostTable {
        &self.hosts
    }

    pub fn state(&self) -> &Arc<ExperimentState> {
        &self.state
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        self.state.snapshot()
    }

    pub fn current_results(&self) -> (Option<String>, Vec<ThroughputResult>) {
        self.state.current_results()
    }

    pub async fn query_results(&self, experiment_id: Option<&str>) -> Result<Vec<ThroughputResult>, StoreError> {
        self.store.query(experiment_id).await
    }

    /// Admits an experiment and launches its driver in the background.
    /// Returns the experiment id once admitted; the run itself is log-only.
    pub async fn start(self: &Arc<Self>, request: &StartRequest) -> Result<String, ExperimentError> {
        if !self.state.is_idle() {
            return Err(ExperimentError::Conflict);
        }

        let id = self.next_id();
        let jobs = self.plan_request(request, &id)?;
        if jobs.is_empty() {
            warn!(experiment_id = %id, "no eligible hosts in request, experiment not started");
            return Err(ExperimentError::Validation("no eligible hosts in request".into()));
        }
        let Some(cancel) = self.state.try_start(&id) else {
            return Err(ExperimentError::Conflict);
        };

        let total = planner::total_duration(jobs.iter().map(|j| &j.entry));
        info!(
            experiment_id = %id,
            hosts = ?jobs.iter().map(|j| j.entry.hostname.as_str()).collect::<Vec<_>>(),
            total_s = total.as_secs(),
            "experiment admitted"
        );

        let this = Arc::clone(self);
        let run_id = id.clone();
        tokio::spawn(async move { this.drive(run_id, jobs, total, cancel).await });
        Ok(id)
    }

    /// Stops the running experiment: waiting tasks abort, running clients
    /// finish and their results are still persisted.
    pub async fn stop(&self) -> Result<(), ExperimentError> {
        let id = self.state.snapshot().current_experiment_id;
        if !self.state.stop() {
            return Err(ExperimentError::NotRunning);
        }
        info!(experiment_id = ?id, "experiment stopped on request");

        let owned = {
            let mut slot = self.listener.lock();
            match slot.as_ref() {
                Some((owner, _)) if Some(owner) == id.as_ref() => slot.take(),
                _ => None,
            }
        };
        // no listener recorded yet: the driver stops it once start-up returns
        if let Some((_, listener)) = owned {
            self.supervisor.stop(Some(listener)).await;
        }
        Ok(())
    }

    /// Process exit: stop whatever runs and release the listener.
    pub async fn shutdown(&self) {
        if self.state.stop() {
            info!("running experiment stopped for shutdown");
        }
        self.listener.lock().take();
        self.supervisor.stop(None).await;
    }

    async fn drive(self: Arc<Self>, id: String, jobs: Vec<TrafficJob>, total: Duration, cancel: CancellationToken) {
        let listener = match self.supervisor.start().await {
            Ok(listener) => listener,
            Err(e) => {
                error!(experiment_id = %id, error = %e, "experiment aborted before any traffic");
                self.state.finish(&id);
                return;
            }
        };
        if !self.claim_listener(&id, listener) {
            info!(experiment_id = %id, "experiment stopped during listener start-up");
            self.supervisor.stop(Some(listener)).await;
            return;
        }

        let mut tasks = JoinSet::new();
        for job in jobs {
            self.state.add_active_host(&id, &job.entry.hostname);
            let traffic = self.traffic.clone();
            let token = cancel.clone();
            tasks.spawn(async move { traffic.run_job(job, token).await });
        }

        let watchdog = total + self.watchdog_margin;
        let joined = tokio::time::timeout(watchdog, async {
            let (mut completed, mut aborted) = (0usize, 0usize);
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(TaskOutcome::Completed(_)) => completed += 1,
                    Ok(TaskOutcome::Aborted) => aborted += 1,
                    Err(e) => error!(experiment_id = %id, error = %e, "traffic task panicked"),
                }
            }
            (completed, aborted)
        })
        .await;

        match joined {
            Ok((completed, aborted)) => {
                info!(experiment_id = %id, completed, aborted, "all traffic tasks finished");
            }
            Err(_) => {
                warn!(
                    experiment_id = %id,
                    remaining = tasks.len(),
                    watchdog_s = watchdog.as_secs(),
                    "watchdog expired, remaining tasks left to finish on their own"
                );
                tasks.detach_all();
            }
        }

        let owned = {
            let mut slot = self.listener.lock();
            match slot.as_ref() {
                Some((owner, _)) if *owner == id => slot.take(),
                _ => None,
            }
        };
        if owned.is_some() {
            self.supervisor.stop(Some(listener)).await;
        }

        if self.state.finish(&id) {
            info!(experiment_id = %id, "experiment completed");
        } else {
            info!(experiment_id = %id, "experiment ended after a stop request");
        }
    }

    /// Records `listener` as owned by `id` if `id` is still running.
    /// The check and the record share the slot lock with `stop`.
    fn claim_listener(&self, id: &str, listener: Uuid) -> bool {
        let mut slot = self.listener.lock();
        if !self.state.is_running(id) {
            return false;
        }
        *slot = Some((id.to_string(), listener));
        true
    }

    /// `exp_<unix millis>`, strictly increasing within the process.
    fn next_id(&self) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let mut last = self.last_id.lock();
        *last = now.max(*last + 1);
        format!("exp_{}", *last)
    }

    /// Validated request turned into one job per eligible host, in schedule order.
    fn plan_request(&self, request: &StartRequest, id: &str) -> Result<Vec<TrafficJob>, ExperimentError> {
        let accepted = self.hosts.validate(request)?;
        let names: Vec<&str> = accepted.keys().map(String::as_str).collect();
        let jobs = planner::plan(&names, self.slot)
            .into_iter()
            .filter_map(|entry| {
                let address = self.hosts.address(&entry.hostname)?.to_string();
                let traffic = accepted.get(&entry.hostname)?.clone();
                Some(TrafficJob {
                    experiment_id: id.to_string(),
                    entry,
                    address,
                    traffic,
                })
            })
            .collect();
        Ok(jobs)
    }
}
