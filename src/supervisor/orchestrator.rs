//! Restart Orchestrator
//!
//! Drives the strategy chain for one process through a bounded number of
//! rounds. Restarts of the same process name never overlap.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::strategy::RestartStrategyChain;
use crate::config::MonitorConfig;
use crate::coordination::ShutdownToken;
use crate::domain::{RestartAttemptResult, StrategyFailure};

/// Bounds for one restart sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Rounds through the full chain (default: 3)
    pub max_attempts: u32,
    /// Wait after a failed round (default: 2s)
    pub per_attempt_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_delay: Duration::from_secs(2),
        }
    }
}

impl From<&MonitorConfig> for RestartPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            max_attempts: config.max_restart_attempts,
            per_attempt_delay: config.restart_delay(),
        }
    }
}

type NameLocks = DashMap<String, Arc<Mutex<()>>>;

/// Holds a per-name lock slot; drops the map entry once nobody else wants it
struct NameLease<'a> {
    locks: &'a NameLocks,
    name: String,
    lock: Arc<Mutex<()>>,
}

impl<'a> NameLease<'a> {
    fn acquire(locks: &'a NameLocks, name: &str) -> Self {
        let lock = locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self {
            locks,
            name: name.to_string(),
            lock,
        }
    }
}

impl Drop for NameLease<'_> {
    fn drop(&mut self) {
        // Map entry plus this lease
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

pub struct RestartOrchestrator {
    chain: RestartStrategyChain,
    locks: NameLocks,
    shutdown: Option<ShutdownToken>,
}

impl RestartOrchestrator {
    pub fn new(chain: RestartStrategyChain) -> Self {
        Self {
            chain,
            locks: DashMap::new(),
            shutdown: None,
        }
    }

    /// Cut the inter-round wait short when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Number of names with a restart running or waiting
    pub fn active_names(&self) -> usize {
        self.locks.len()
    }

    pub async fn restart_with(
        &self,
        process_name: &str,
        policy: &RestartPolicy,
    ) -> RestartAttemptResult {
        self.restart(process_name, policy.max_attempts, policy.per_attempt_delay)
            .await
    }

    /// Run up to `max_attempts` rounds of the chain for `process_name`.
    ///
    /// Each round tries every strategy in chain order and stops at the first
    /// success. Failed rounds are followed by `per_attempt_delay`, except the
    /// last one.
    pub async fn restart(
        &self,
        process_name: &str,
        max_attempts: u32,
        per_attempt_delay: Duration,
    ) -> RestartAttemptResult {
        let lease = NameLease::acquire(&self.locks, process_name);
        let _guard = lease.lock.lock().await;

        let started_at = Utc::now();
        let mut failures = Vec::new();
        let mut attempts_made = 0;

        info!("Attempting to restart process: {}", process_name);

        for round in 1..=max_attempts {
            attempts_made = round;

            for strategy in self.chain.iter() {
                let kind = strategy.kind();
                match strategy.attempt(process_name).await {
                    Ok(()) => {
                        info!(
                            "Successfully restarted {} using method {} ({})",
                            process_name,
                            kind.ordinal(),
                            kind
                        );
                        return RestartAttemptResult {
                            process_name: process_name.to_string(),
                            succeeded: true,
                            strategy_used: Some(kind),
                            attempts_made,
                            failures,
                            started_at,
                            finished_at: Utc::now(),
                        };
                    }
                    Err(e) => {
                        warn!(
                            "Method {} failed to restart {}: {}",
                            kind.ordinal(),
                            process_name,
                            e.clone().with_strategy(kind)
                        );
                        failures.push(StrategyFailure {
                            round,
                            strategy: kind,
                            error: e,
                        });
                    }
                }
            }

            if round < max_attempts {
                warn!(
                    "Attempt {}/{} to restart {} failed. Retrying...",
                    round, max_attempts, process_name
                );
                if !self.wait(per_attempt_delay).await {
                    info!(
                        "Shutdown requested, abandoning restart of {} after {} attempts",
                        process_name, round
                    );
                    break;
                }
            }
        }

        error!(
            "Failed to restart {} after {} attempts",
            process_name, attempts_made
        );

        RestartAttemptResult {
            process_name: process_name.to_string(),
            succeeded: false,
            strategy_used: None,
            attempts_made,
            failures,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Returns `false` if shutdown interrupted the wait
    async fn wait(&self, delay: Duration) -> bool {
        match &self.shutdown {
            Some(token) => token.clone().sleep(delay).await,
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{GracefulShutdown, ShutdownSignal};
    use crate::domain::StrategyKind;
    use crate::error::StrategyError;
    use crate::supervisor::process_control::{ControlError, MockProcessControl};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn refused(command: &str) -> ControlError {
        ControlError::Failed {
            command: command.to_string(),
            status: "exit status: 1".to_string(),
            stderr: String::new(),
        }
    }

    fn all_failing(rounds: usize) -> MockProcessControl {
        let mut control = MockProcessControl::new();
        control
            .expect_service_manager_restart()
            .times(rounds)
            .returning(|_| Err(refused("systemctl")));
        control
            .expect_service_script_restart()
            .times(rounds)
            .returning(|_| Err(refused("service")));
        control
            .expect_find_pids()
            .times(rounds)
            .returning(|_| Ok(vec![]));
        control
    }

    fn orchestrator(control: MockProcessControl) -> RestartOrchestrator {
        RestartOrchestrator::new(RestartStrategyChain::standard(Arc::new(control)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_strategy_success() {
        let mut control = MockProcessControl::new();
        control
            .expect_service_manager_restart()
            .times(1)
            .returning(|_| Ok(()));
        control.expect_service_script_restart().never();
        control.expect_find_pids().never();

        let result = orchestrator(control)
            .restart("apache2", 3, Duration::from_secs(2))
            .await;

        assert!(result.succeeded);
        assert_eq!(result.strategy_used, Some(StrategyKind::ServiceManager));
        assert_eq!(result.attempts_made, 1);
        assert!(result.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_to_service_script() {
        let mut control = MockProcessControl::new();
        control
            .expect_service_manager_restart()
            .times(1)
            .returning(|_| Err(refused("systemctl")));
        control
            .expect_service_script_restart()
            .times(1)
            .returning(|_| Ok(()));

        let result = orchestrator(control)
            .restart("nginx", 3, Duration::from_secs(2))
            .await;

        assert!(result.succeeded);
        assert_eq!(result.strategy_used, Some(StrategyKind::ServiceScript));
        assert_eq!(
            result.strategies_tried(),
            vec![StrategyKind::ServiceManager, StrategyKind::ServiceScript]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_max_attempts() {
        let started = tokio::time::Instant::now();
        let result = orchestrator(all_failing(3))
            .restart("sshd", 3, Duration::from_secs(2))
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.attempts_made, 3);
        assert_eq!(result.failures.len(), 9);

        // Every round runs the full chain in order
        for (i, failure) in result.failures.iter().enumerate() {
            assert_eq!(failure.round, (i / 3) as u32 + 1);
            assert_eq!(failure.strategy, StrategyKind::ALL[i % 3]);
        }
        assert_eq!(
            result.last_failure().map(|f| f.error.clone()),
            Some(StrategyError::NotRunning)
        );

        // Two waits, none after the final round
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_in_later_round() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut control = MockProcessControl::new();
        control
            .expect_service_manager_restart()
            .times(2)
            .returning(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(refused("systemctl"))
                } else {
                    Ok(())
                }
            });
        control
            .expect_service_script_restart()
            .times(1)
            .returning(|_| Err(refused("service")));
        control
            .expect_find_pids()
            .times(1)
            .returning(|_| Ok(vec![]));

        let result = orchestrator(control)
            .restart("cron", 3, Duration::from_secs(2))
            .await;

        assert!(result.succeeded);
        assert_eq!(result.attempts_made, 2);
        assert_eq!(result.failures.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_retry_wait() {
        let shutdown = GracefulShutdown::new();
        let orchestrator = orchestrator(all_failing(1)).with_shutdown(shutdown.token());
        shutdown.request_shutdown(ShutdownSignal::Internal);

        let result = orchestrator
            .restart("sshd", 3, Duration::from_secs(60))
            .await;

        assert!(!result.succeeded);
        assert_eq!(result.attempts_made, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_entry_released_after_restart() {
        let mut control = MockProcessControl::new();
        control
            .expect_service_manager_restart()
            .returning(|_| Ok(()));

        let orchestrator = orchestrator(control);
        orchestrator
            .restart_with("apache2", &RestartPolicy::default())
            .await;
        assert_eq!(orchestrator.active_names(), 0);
    }

    #[test]
    fn test_policy_from_config() {
        let config = MonitorConfig {
            max_restart_attempts: 5,
            restart_delay: 7,
            ..MonitorConfig::default()
        };
        let policy = RestartPolicy::from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.per_attempt_delay, Duration::from_secs(7));
    }
}
