use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StrategyError;

/// Restart techniques, in the order the chain always tries them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// `systemctl restart <name>`
    ServiceManager,
    /// `service <name> restart`
    ServiceScript,
    /// SIGKILL the running instance and launch the bare name again
    KillAndRespawn,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::ServiceManager,
        StrategyKind::ServiceScript,
        StrategyKind::KillAndRespawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ServiceManager => "service-manager",
            StrategyKind::ServiceScript => "service-script",
            StrategyKind::KillAndRespawn => "kill-and-respawn",
        }
    }

    /// 1-based position in the chain.
    pub fn ordinal(&self) -> usize {
        match self {
            StrategyKind::ServiceManager => 1,
            StrategyKind::ServiceScript => 2,
            StrategyKind::KillAndRespawn => 3,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed strategy invocation within a restart sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    pub round: u32,
    pub strategy: StrategyKind,
    #[serde(serialize_with = "serialize_reason")]
    pub error: StrategyError,
}

fn serialize_reason<S: serde::Serializer>(
    error: &StrategyError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Outcome of one `restart` invocation.
///
/// Transient: built by the orchestrator, consumed by the monitor loop in the
/// same cycle and then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct RestartAttemptResult {
    pub process_name: String,
    pub succeeded: bool,
    pub strategy_used: Option<StrategyKind>,
    /// Rounds started, including the successful one.
    pub attempts_made: u32,
    pub failures: Vec<StrategyFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RestartAttemptResult {
    pub fn last_failure(&self) -> Option<&StrategyFailure> {
        self.failures.last()
    }

    /// Strategies invoked, in invocation order (failures plus the winner).
    pub fn strategies_tried(&self) -> Vec<StrategyKind> {
        let mut tried: Vec<StrategyKind> = self.failures.iter().map(|f| f.strategy).collect();
        if let Some(kind) = self.strategy_used {
            tried.push(kind);
        }
        tried
    }
}
