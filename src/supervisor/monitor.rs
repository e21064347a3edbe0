//! Monitor Loop
//!
//! Periodic cycle: open a datastore session, fetch alarmed processes,
//! restart each one and clear its alarm on success, then sleep.
//! State is published on a watch channel (Idle -> Cycling -> Idle, and
//! Stopped once shutdown is honoured).

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::orchestrator::{RestartOrchestrator, RestartPolicy};
use super::process_control::SystemProcessControl;
use super::strategy::RestartStrategyChain;
use crate::config::{AppConfig, MonitorConfig};
use crate::coordination::ShutdownToken;
use crate::domain::{
    AlarmRecord, MonitorState, RestartAttemptResult, StateTransition, StrategyKind,
};
use crate::error::MonitorError;
use crate::repository::{AlarmConnection, AlarmRepository, MySqlAlarmRepository};

/// Timing and concurrency knobs for the loop
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Sleep after a completed cycle (default: 300s)
    pub interval: Duration,
    /// Sleep after a datastore failure (default: 60s)
    pub db_retry_delay: Duration,
    pub policy: RestartPolicy,
    /// Restarts allowed to run at once within a cycle (default: 1)
    pub parallelism: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            interval: config.interval(),
            db_retry_delay: config.db_retry_delay(),
            policy: RestartPolicy::from(config),
            parallelism: config.parallelism.max(1),
        }
    }
}

/// What happened to one alarmed process in a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Restarted and alarm cleared
    Restarted { strategy: StrategyKind, attempts: u32 },
    /// Every round failed; alarm left set
    RestartFailed {
        attempts: u32,
        last_error: Option<String>,
    },
    /// No process row for the id; alarm left set
    Unresolved,
    /// Name lookup query failed; alarm left set
    ResolutionFailed { reason: String },
    /// Restart succeeded but the alarm could not be cleared
    ClearFailed { strategy: StrategyKind, reason: String },
    /// Handling panicked (lookup, restart task or clear) or was cancelled
    Crashed { reason: String },
    /// Shutdown arrived before the restart started
    Skipped,
}

impl ProcessOutcome {
    pub fn alarm_cleared(&self) -> bool {
        matches!(self, ProcessOutcome::Restarted { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub process_id: i64,
    pub process_name: Option<String>,
    #[serde(flatten)]
    pub outcome: ProcessOutcome,
}

impl ProcessReport {
    /// The error this outcome stands for, if any
    pub fn error(&self) -> Option<MonitorError> {
        let name = || self.process_name.clone().unwrap_or_default();
        match &self.outcome {
            ProcessOutcome::Restarted { .. } | ProcessOutcome::Skipped => None,
            ProcessOutcome::Unresolved => Some(MonitorError::NameResolution {
                process_id: self.process_id,
            }),
            ProcessOutcome::RestartFailed { attempts, .. } => {
                Some(MonitorError::RestartExhausted {
                    process_name: name(),
                    attempts: *attempts,
                })
            }
            ProcessOutcome::ResolutionFailed { reason }
            | ProcessOutcome::ClearFailed { reason, .. } => {
                Some(MonitorError::RepositoryUnavailable(reason.clone()))
            }
            ProcessOutcome::Crashed { reason } => Some(MonitorError::Internal(format!(
                "restart of {} {}",
                name(),
                reason
            ))),
        }
    }
}

/// Summary of one cycle, printed by `procwatch once`
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the session could not be opened or the alarm query failed
    pub repository_error: Option<String>,
    pub processes: Vec<ProcessReport>,
}

impl CycleReport {
    fn begin() -> Self {
        let now = Utc::now();
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            repository_error: None,
            processes: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn datastore_ok(&self) -> bool {
        self.repository_error.is_none()
    }

    pub fn restarted(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| p.outcome.alarm_cleared())
            .count()
    }

    pub fn outcome_for(&self, process_id: i64) -> Option<&ProcessOutcome> {
        self.processes
            .iter()
            .find(|p| p.process_id == process_id)
            .map(|p| &p.outcome)
    }
}

/// A resolved record waiting for its restart task
struct PendingRestart {
    process_id: i64,
    process_name: String,
    handle: JoinHandle<Option<RestartAttemptResult>>,
}

pub struct MonitorLoop {
    repository: Arc<dyn AlarmRepository>,
    orchestrator: Arc<RestartOrchestrator>,
    settings: MonitorSettings,
    shutdown: ShutdownToken,
    state_tx: watch::Sender<MonitorState>,
}

impl MonitorLoop {
    pub fn new(
        repository: Arc<dyn AlarmRepository>,
        orchestrator: Arc<RestartOrchestrator>,
        settings: MonitorSettings,
        shutdown: ShutdownToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(MonitorState::Idle);
        Self {
            repository,
            orchestrator,
            settings,
            shutdown,
            state_tx,
        }
    }

    /// Production wiring: MySQL repository and host process control
    pub fn from_config(config: &AppConfig, shutdown: ShutdownToken) -> Self {
        let repository = MySqlAlarmRepository::new(&config.database);
        info!("Using datastore {}", repository.target());

        let control = Arc::new(
            SystemProcessControl::new(config.monitor.respawn_grace())
                .with_command_timeout(config.monitor.command_timeout()),
        );
        let orchestrator = RestartOrchestrator::new(RestartStrategyChain::standard(control))
            .with_shutdown(shutdown.clone());

        Self::new(
            Arc::new(repository),
            Arc::new(orchestrator),
            MonitorSettings::from(&config.monitor),
            shutdown,
        )
    }

    pub fn state(&self) -> MonitorState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state_tx.subscribe()
    }

    /// Sleep before the next cycle: the short backoff after a datastore
    /// failure, the regular interval otherwise
    pub fn next_delay(&self, report: &CycleReport) -> Duration {
        if report.datastore_ok() {
            self.settings.interval
        } else {
            self.settings.db_retry_delay
        }
    }

    /// Run cycles until shutdown is requested, then move to `Stopped`
    pub async fn run(&self) {
        info!("Starting Process Monitor");
        let mut shutdown = self.shutdown.clone();

        while !shutdown.is_shutdown_requested() {
            let report = self.run_cycle().await;
            let delay = self.next_delay(&report);

            if report.datastore_ok() {
                info!("Sleeping for {} seconds before next check", delay.as_secs());
            } else {
                error!(
                    "Failed to reach database. Retrying in {} seconds...",
                    delay.as_secs()
                );
            }

            if !shutdown.sleep(delay).await {
                break;
            }
        }

        self.transition(MonitorState::Stopped, "shutdown requested");
    }

    /// Run exactly one cycle. The session is released on every path.
    pub async fn run_cycle(&self) -> CycleReport {
        let report = CycleReport::begin();
        let span = info_span!("cycle", cycle_id = %report.cycle_id);

        self.transition(MonitorState::Cycling, "tick");
        let report = self.cycle(report).instrument(span).await.finish();
        self.transition(MonitorState::Idle, "cycle complete");

        report
    }

    async fn cycle(&self, mut report: CycleReport) -> CycleReport {
        let mut conn = match self.repository.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Database connection failed: {}", e);
                report.repository_error = Some(e.to_string());
                return report;
            }
        };

        match conn.fetch_alarmed().await {
            Ok(records) => {
                info!("Found {} processes in alarm state", records.len());
                report.processes = self.handle_alarms(conn.as_mut(), records).await;
            }
            Err(e) => {
                error!("Error querying STATUS_PROCESS table: {}", e);
                report.repository_error = Some(e.to_string());
            }
        }

        if let Err(e) = conn.close().await {
            warn!("Failed to close datastore session: {}", e);
        }

        report
    }

    async fn handle_alarms(
        &self,
        conn: &mut dyn AlarmConnection,
        records: Vec<AlarmRecord>,
    ) -> Vec<ProcessReport> {
        let mut reports = Vec::with_capacity(records.len());
        let mut pending = Vec::new();
        let permits = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));

        for record in records {
            let process_id = record.process_id;
            let lookup = AssertUnwindSafe(conn.resolve_name(process_id))
                .catch_unwind()
                .await;
            let process_name = match lookup {
                Ok(Ok(Some(name))) if !name.trim().is_empty() => name,
                Ok(Ok(_)) => {
                    warn!("Could not find name for process_id {}", process_id);
                    reports.push(ProcessReport {
                        process_id,
                        process_name: None,
                        outcome: ProcessOutcome::Unresolved,
                    });
                    continue;
                }
                Ok(Err(e)) => {
                    error!("Error querying PROCESE table: {}", e);
                    reports.push(ProcessReport {
                        process_id,
                        process_name: None,
                        outcome: ProcessOutcome::ResolutionFailed {
                            reason: e.to_string(),
                        },
                    });
                    continue;
                }
                Err(panic) => {
                    let reason = panic_message(panic);
                    error!("Name lookup for process_id {} crashed: {}", process_id, reason);
                    reports.push(ProcessReport {
                        process_id,
                        process_name: None,
                        outcome: ProcessOutcome::Crashed { reason },
                    });
                    continue;
                }
            };

            info!(
                "Process {} ({}) is in alarm state",
                process_id, process_name
            );
            pending.push(self.spawn_restart(process_id, process_name, permits.clone()));
        }

        // Clears go out over this session one at a time, in fetch order
        for restart in pending {
            let outcome = match restart.handle.await {
                Ok(Some(result)) => {
                    let settled = AssertUnwindSafe(self.settle(conn, restart.process_id, &result))
                        .catch_unwind()
                        .await;
                    settled.unwrap_or_else(|panic| {
                        let reason = panic_message(panic);
                        error!(
                            "Settling restart of {} crashed: {}",
                            restart.process_name, reason
                        );
                        ProcessOutcome::Crashed { reason }
                    })
                }
                Ok(None) => {
                    info!(
                        "Skipping restart of {} due to shutdown",
                        restart.process_name
                    );
                    ProcessOutcome::Skipped
                }
                Err(e) => {
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        e.to_string()
                    };
                    error!(
                        "Restart task for {} crashed: {}",
                        restart.process_name, reason
                    );
                    ProcessOutcome::Crashed { reason }
                }
            };

            reports.push(ProcessReport {
                process_id: restart.process_id,
                process_name: Some(restart.process_name),
                outcome,
            });
        }

        reports
    }

    fn spawn_restart(
        &self,
        process_id: i64,
        process_name: String,
        permits: Arc<Semaphore>,
    ) -> PendingRestart {
        let orchestrator = self.orchestrator.clone();
        let policy = self.settings.policy;
        let shutdown = self.shutdown.clone();
        let name = process_name.clone();

        let handle = tokio::spawn(
            async move {
                let _permit = permits.acquire_owned().await.ok()?;
                if shutdown.is_shutdown_requested() {
                    return None;
                }
                Some(orchestrator.restart_with(&name, &policy).await)
            }
            .in_current_span(),
        );

        PendingRestart {
            process_id,
            process_name,
            handle,
        }
    }

    /// Clear the alarm only for a successful restart
    async fn settle(
        &self,
        conn: &mut dyn AlarmConnection,
        process_id: i64,
        result: &RestartAttemptResult,
    ) -> ProcessOutcome {
        let strategy = match (result.succeeded, result.strategy_used) {
            (true, Some(strategy)) => strategy,
            _ => {
                error!("Failed to restart process {}", result.process_name);
                return ProcessOutcome::RestartFailed {
                    attempts: result.attempts_made,
                    last_error: result.last_failure().map(|f| f.error.to_string()),
                };
            }
        };

        match conn.clear_alarm(process_id).await {
            Ok(()) => {
                info!("Updated alarm status for process_id {}", process_id);
                ProcessOutcome::Restarted {
                    strategy,
                    attempts: result.attempts_made,
                }
            }
            Err(e) => {
                error!("Error updating alarm status: {}", e);
                ProcessOutcome::ClearFailed {
                    strategy,
                    reason: e.to_string(),
                }
            }
        }
    }

    fn transition(&self, to: MonitorState, reason: &str) {
        let from = self.state();
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!("Ignoring invalid state transition {} -> {}", from, to);
            return;
        }

        let event = StateTransition::new(from, to, reason);
        debug!(from = %event.from, to = %event.to, reason = %event.reason, "State transition");
        self.state_tx.send_replace(to);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use crate::domain::MonitoredProcess;
    use crate::repository::MemoryAlarmRepository;
    use crate::supervisor::process_control::MockProcessControl;

    fn monitor_with(
        repo: &MemoryAlarmRepository,
        control: MockProcessControl,
        shutdown: &GracefulShutdown,
    ) -> MonitorLoop {
        let chain = RestartStrategyChain::standard(Arc::new(control));
        MonitorLoop::new(
            Arc::new(repo.clone()),
            Arc::new(RestartOrchestrator::new(chain)),
            MonitorSettings::default(),
            shutdown.token(),
        )
    }

    #[test]
    fn test_settings_from_config() {
        let config = MonitorConfig {
            interval: 30,
            db_retry_delay: 5,
            parallelism: 0,
            ..MonitorConfig::default()
        };
        let settings = MonitorSettings::from(&config);
        assert_eq!(settings.interval, Duration::from_secs(30));
        assert_eq!(settings.db_retry_delay, Duration::from_secs(5));
        assert_eq!(settings.parallelism, 1);
    }

    #[tokio::test]
    async fn test_next_delay_uses_backoff_after_outage() {
        let repo = MemoryAlarmRepository::new();
        let shutdown = GracefulShutdown::new();
        let monitor = monitor_with(&repo, MockProcessControl::new(), &shutdown);

        let healthy = monitor.run_cycle().await;
        assert_eq!(monitor.next_delay(&healthy), Duration::from_secs(300));

        repo.set_unavailable(true);
        let failed = monitor.run_cycle().await;
        assert!(!failed.datastore_ok());
        assert_eq!(monitor.next_delay(&failed), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cycle_returns_to_idle_and_releases_session() {
        let repo = MemoryAlarmRepository::new();
        repo.insert(MonitoredProcess::new(1, "apache2"), true);

        let mut control = MockProcessControl::new();
        control
            .expect_service_manager_restart()
            .times(1)
            .returning(|_| Ok(()));

        let shutdown = GracefulShutdown::new();
        let monitor = monitor_with(&repo, control, &shutdown);
        let report = monitor.run_cycle().await;

        assert_eq!(monitor.state(), MonitorState::Idle);
        assert_eq!(report.restarted(), 1);
        assert_eq!(repo.open_connections(), 0);
        assert!(report.processes[0].error().is_none());
    }

    #[tokio::test]
    async fn test_pending_restarts_skipped_after_shutdown() {
        let repo = MemoryAlarmRepository::new();
        repo.insert(MonitoredProcess::new(1, "apache2"), true);

        let mut control = MockProcessControl::new();
        control.expect_service_manager_restart().never();

        let shutdown = GracefulShutdown::new();
        let monitor = monitor_with(&repo, control, &shutdown);
        shutdown.request_shutdown(ShutdownSignal::Internal);

        let report = monitor.run_cycle().await;
        assert_eq!(report.outcome_for(1), Some(&ProcessOutcome::Skipped));
        assert!(repo.alarm(1).map(|r| r.alarm_flag).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_blank_name_is_unresolved() {
        let repo = MemoryAlarmRepository::new();
        repo.insert(MonitoredProcess::new(4, "   "), true);

        let mut control = MockProcessControl::new();
        control.expect_service_manager_restart().never();

        let shutdown = GracefulShutdown::new();
        let report = monitor_with(&repo, control, &shutdown).run_cycle().await;

        assert_eq!(report.outcome_for(4), Some(&ProcessOutcome::Unresolved));
        assert!(matches!(
            report.processes[0].error(),
            Some(MonitorError::NameResolution { process_id: 4 })
        ));
        assert!(repo.clear_calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_already_requested() {
        let repo = MemoryAlarmRepository::new();
        let shutdown = GracefulShutdown::new();
        let monitor = monitor_with(&repo, MockProcessControl::new(), &shutdown);

        shutdown.request_shutdown(ShutdownSignal::Interrupt);
        monitor.run().await;

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(repo.connects(), 0);
    }

    #[test]
    fn test_report_serializes_outcome_tag() {
        let report = ProcessReport {
            process_id: 3,
            process_name: Some("sshd".into()),
            outcome: ProcessOutcome::RestartFailed {
                attempts: 3,
                last_error: Some("not running".into()),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "restart_failed");
        assert_eq!(json["attempts"], 3);
        assert_eq!(json["process_name"], "sshd");
    }
}
