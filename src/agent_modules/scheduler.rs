//! The agent's control loop.
//!
//! Every cycle writes the heartbeat, honours the pause switch and runs the
//! probe → record → evaluate pipeline for each host that is due. Errors and
//! panics for one host stay inside that host's task; errors for the cycle
//! itself are caught by [`Scheduler::supervise`], which backs off and
//! restarts the loop.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::agent_modules::prober::Prober;
use crate::alerting::evaluation_service::{EvaluationError, EvaluationService};
use crate::db::entities::{alert, host};
use crate::db::services::{host_service, probe_service, settings_service, RunState};

pub const DEFAULT_CYCLE_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_FAILURE_BACKOFF_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub cycle_interval: Duration,
    pub failure_backoff: Duration,
    /// `None` restarts forever.
    pub max_restarts: Option<u32>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(DEFAULT_CYCLE_INTERVAL_SECONDS),
            failure_backoff: Duration::from_secs(DEFAULT_FAILURE_BACKOFF_SECONDS),
            max_restarts: None,
        }
    }
}

/// Failure confined to a single host for a single cycle.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Failed to record probe outcome: {0}")]
    Persistence(#[from] DbErr),
    #[error("Failed to evaluate alerts: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("Host task did not complete: {0}")]
    Panicked(#[from] JoinError),
}

/// Failure that aborts the whole cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Failed to write heartbeat: {0}")]
    Heartbeat(#[source] DbErr),
    #[error("Failed to read run state: {0}")]
    RunState(#[source] DbErr),
    #[error("Failed to list enabled hosts: {0}")]
    HostListing(#[source] DbErr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Shutdown,
    RestartsExhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub paused: bool,
    pub hosts_considered: usize,
    pub hosts_due: usize,
    /// Hosts whose full pipeline completed.
    pub hosts_probed: usize,
    pub host_failures: usize,
    pub alerts_emitted: usize,
}

/// A host is due once its interval has elapsed since the last probe.
/// Never-probed hosts are always due.
pub fn is_due(last_probe_at: Option<DateTime<Utc>>, interval_seconds: i64, now: DateTime<Utc>) -> bool {
    match last_probe_at {
        None => true,
        Some(last) => now >= last + ChronoDuration::seconds(interval_seconds),
    }
}

#[derive(Clone)]
pub struct Scheduler {
    db: DatabaseConnection,
    prober: Arc<dyn Prober>,
    evaluator: EvaluationService,
    settings: SchedulerSettings,
    // Shared by clones so a supervisor restart remembers the last state.
    last_run_state: Arc<Mutex<Option<RunState>>>,
}

impl Scheduler {
    pub fn new(db: DatabaseConnection, prober: Arc<dyn Prober>, settings: SchedulerSettings) -> Self {
        let evaluator = EvaluationService::new(db.clone());
        Self {
            db,
            prober,
            evaluator,
            settings,
            last_run_state: Arc::new(Mutex::new(None)),
        }
    }

    /// One pass of the loop. Stops picking new hosts once `shutdown` is set;
    /// a host already in flight is always finished.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<CycleSummary, CycleError> {
        let now = Utc::now();
        settings_service::write_heartbeat(&self.db, now)
            .await
            .map_err(CycleError::Heartbeat)?;

        let state = settings_service::get_run_state(&self.db)
            .await
            .map_err(CycleError::RunState)?;
        self.note_run_state(state);

        let mut summary = CycleSummary::default();
        if state == RunState::Paused {
            summary.paused = true;
            return Ok(summary);
        }

        let hosts = host_service::get_enabled_hosts(&self.db)
            .await
            .map_err(CycleError::HostListing)?;
        summary.hosts_considered = hosts.len();

        for host in &hosts {
            if *shutdown.borrow() {
                info!("Shutdown requested. Not starting any further hosts this cycle.");
                break;
            }
            if !is_due(host.last_probe_at, host_service::effective_interval(host), now) {
                continue;
            }
            summary.hosts_due += 1;
            self.run_host(host, &mut summary).await;
        }

        Ok(summary)
    }

    /// Probes every enabled host once, due or not. No heartbeat is written
    /// and the pause switch is ignored.
    pub async fn probe_all_once(&self) -> Result<CycleSummary, CycleError> {
        let hosts = host_service::get_enabled_hosts(&self.db)
            .await
            .map_err(CycleError::HostListing)?;

        let mut summary = CycleSummary {
            hosts_considered: hosts.len(),
            hosts_due: hosts.len(),
            ..Default::default()
        };
        for host in &hosts {
            self.run_host(host, &mut summary).await;
        }
        Ok(summary)
    }

    /// Probe, record, evaluate. The outcome is committed before evaluation
    /// so the evaluator always sees it.
    pub async fn process_host(&self, host: &host::Model) -> Result<Vec<alert::Model>, HostError> {
        let report = self.prober.probe(&host.address).await;
        let outcome = probe_service::record_probe_outcome(&self.db, host.id, &report, Utc::now()).await?;
        debug!(
            host_id = host.id,
            host = %host.name,
            outcome_id = outcome.id,
            success = report.success,
            latency_ms = ?report.latency_ms,
            attempts = report.attempts,
            "Probe recorded."
        );

        Ok(self.evaluator.evaluate_host(host).await?)
    }

    /// Runs [`Scheduler::process_host`] on its own task so a panic stays
    /// with this host.
    async fn run_host(&self, host: &host::Model, summary: &mut CycleSummary) {
        let worker = self.clone();
        let owned_host = host.clone();
        let outcome = tokio::spawn(async move { worker.process_host(&owned_host).await })
            .await
            .unwrap_or_else(|join_error| Err(HostError::from(join_error)));

        match outcome {
            Ok(alerts) => {
                summary.hosts_probed += 1;
                summary.alerts_emitted += alerts.len();
            }
            Err(e) => {
                summary.host_failures += 1;
                error!(
                    host_id = host.id,
                    host = %host.name,
                    address = %host.address,
                    error = %e,
                    "Failed to process host. Skipping it until the next cycle."
                );
            }
        }
    }

    fn note_run_state(&self, state: RunState) {
        let mut last = self
            .last_run_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(previous) if previous == state => {
                if state == RunState::Paused {
                    debug!("Agent is paused. Skipping host processing.");
                }
            }
            Some(previous) => info!(from = %previous, to = %state, "Run state changed."),
            None => info!(state = %state, "Initial run state."),
        }
        *last = Some(state);
    }

    /// Cycles until `shutdown` is set or a cycle fails.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), CycleError> {
        info!(
            cycle_interval_seconds = self.settings.cycle_interval.as_secs_f64(),
            "Scheduler loop started."
        );
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let summary = self.run_cycle(&shutdown).await?;
            if !summary.paused {
                debug!(
                    hosts_considered = summary.hosts_considered,
                    hosts_due = summary.hosts_due,
                    hosts_probed = summary.hosts_probed,
                    host_failures = summary.host_failures,
                    alerts_emitted = summary.alerts_emitted,
                    "Cycle complete."
                );
            }

            if sleep_or_shutdown(self.settings.cycle_interval, &mut shutdown).await {
                return Ok(());
            }
        }
    }

    /// Keeps [`Scheduler::run`] alive. Each run happens in its own task so a
    /// panic is contained like any other cycle failure.
    pub async fn supervise(&self, mut shutdown: watch::Receiver<bool>) -> SupervisorExit {
        let mut restarts: u32 = 0;
        loop {
            let runner = self.clone();
            let task_shutdown = shutdown.clone();
            let handle = tokio::spawn(async move { runner.run(task_shutdown).await });

            match handle.await {
                Ok(Ok(())) => {
                    info!("Scheduler stopped on shutdown request.");
                    return SupervisorExit::Shutdown;
                }
                Ok(Err(e)) => error!(error = %e, "Scheduler cycle failed."),
                Err(join_error) => error!(error = ?join_error, "Scheduler task panicked."),
            }

            if let Some(max) = self.settings.max_restarts {
                if restarts >= max {
                    error!(restarts, "Restart limit reached. Giving up.");
                    return SupervisorExit::RestartsExhausted;
                }
            }
            restarts += 1;

            warn!(
                restart = restarts,
                backoff_seconds = self.settings.failure_backoff.as_secs_f64(),
                "Restarting scheduler after backoff."
            );
            if sleep_or_shutdown(self.settings.failure_backoff, &mut shutdown).await {
                info!("Shutdown requested during backoff.");
                return SupervisorExit::Shutdown;
            }
        }
    }
}

/// Resolves once shutdown is requested. A dropped sender counts as a request.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Returns `true` if the sleep was cut short by shutdown.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = wait_for_shutdown(shutdown) => true,
    }
}
