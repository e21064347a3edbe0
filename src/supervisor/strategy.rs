//! Restart strategies and the fixed chain that orders them

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::process_control::ProcessControl;
use crate::domain::StrategyKind;
use crate::error::StrategyError;

/// One restart technique
#[async_trait]
pub trait RestartStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Try to restart `process_name` once
    async fn attempt(&self, process_name: &str) -> Result<(), StrategyError>;
}

/// `systemctl restart <name>`
pub struct ServiceManagerRestart {
    control: Arc<dyn ProcessControl>,
}

impl ServiceManagerRestart {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl RestartStrategy for ServiceManagerRestart {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ServiceManager
    }

    async fn attempt(&self, process_name: &str) -> Result<(), StrategyError> {
        self.control
            .service_manager_restart(process_name)
            .await
            .map_err(|e| StrategyError::Command(e.to_string()))
    }
}

/// `service <name> restart`
pub struct ServiceScriptRestart {
    control: Arc<dyn ProcessControl>,
}

impl ServiceScriptRestart {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl RestartStrategy for ServiceScriptRestart {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ServiceScript
    }

    async fn attempt(&self, process_name: &str) -> Result<(), StrategyError> {
        self.control
            .service_script_restart(process_name)
            .await
            .map_err(|e| StrategyError::Command(e.to_string()))
    }
}

/// SIGKILL every instance matching the name, then launch the bare name.
///
/// The name is used as the executable with no arguments, working directory
/// or environment. Processes that need any of those fail with
/// `RelaunchFailed`.
pub struct KillAndRespawn {
    control: Arc<dyn ProcessControl>,
}

impl KillAndRespawn {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl RestartStrategy for KillAndRespawn {
    fn kind(&self) -> StrategyKind {
        StrategyKind::KillAndRespawn
    }

    async fn attempt(&self, process_name: &str) -> Result<(), StrategyError> {
        // An empty pattern matches every process on the host
        if process_name.trim().is_empty() {
            return Err(StrategyError::NotRunning);
        }

        let pids = self
            .control
            .find_pids(process_name)
            .await
            .map_err(|e| StrategyError::Command(e.to_string()))?;

        if pids.is_empty() {
            return Err(StrategyError::NotRunning);
        }

        let mut first_failure = None;
        for pid in pids {
            debug!(process_name, pid, "Sending SIGKILL");
            if let Err(e) = self.control.kill(pid).await {
                warn!("Failed to kill pid {} for {}: {}", pid, process_name, e);
                first_failure.get_or_insert(StrategyError::TerminateFailed {
                    pid,
                    reason: e.to_string(),
                });
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        self.control
            .spawn(process_name)
            .await
            .map_err(|e| StrategyError::RelaunchFailed(e.to_string()))
    }
}

/// Strategies in the order every round tries them
pub struct RestartStrategyChain {
    strategies: Vec<Box<dyn RestartStrategy>>,
}

impl RestartStrategyChain {
    /// service-manager, then service-script, then kill-and-respawn
    pub fn standard(control: Arc<dyn ProcessControl>) -> Self {
        Self {
            strategies: vec![
                Box::new(ServiceManagerRestart::new(control.clone())),
                Box::new(ServiceScriptRestart::new(control.clone())),
                Box::new(KillAndRespawn::new(control)),
            ],
        }
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn RestartStrategy + 'static)> + '_ {
        self.strategies.iter().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
