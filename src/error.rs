use thiserror::Error;

use crate::domain::StrategyKind;

/// Main error type for the restart daemon
#[derive(Error, Debug)]
pub enum MonitorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Datastore errors
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("No process record for process_id {process_id}")]
    NameResolution { process_id: i64 },

    // Restart errors
    #[error("Strategy {strategy} failed: {source}")]
    StrategyFailed {
        strategy: StrategyKind,
        #[source]
        source: StrategyError,
    },

    #[error("Restart of {process_name} exhausted after {attempts} attempts")]
    RestartExhausted { process_name: String, attempts: u32 },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for MonitorError {
    fn from(err: sqlx::Error) -> Self {
        MonitorError::RepositoryUnavailable(err.to_string())
    }
}

/// Result type alias for MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Reasons a single restart technique can fail for a single round
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// The external tool could not be run or reported a non-zero outcome.
    #[error("{0}")]
    Command(String),

    /// No live process matched the name.
    #[error("not running")]
    NotRunning,

    #[error("terminate pid {pid} failed: {reason}")]
    TerminateFailed { pid: u32, reason: String },

    /// The old instance is gone but the bare-name launch did not stick.
    #[error("relaunch failed: {0}")]
    RelaunchFailed(String),
}

impl StrategyError {
    pub fn with_strategy(self, strategy: StrategyKind) -> MonitorError {
        MonitorError::StrategyFailed {
            strategy,
            source: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_errors_map_to_repository_unavailable() {
        let err: MonitorError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, MonitorError::RepositoryUnavailable(_)));
    }

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let err = MonitorError::InvalidConfig(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Invalid configuration: a; b");
    }

    #[test]
    fn test_strategy_error_display() {
        assert_eq!(StrategyError::NotRunning.to_string(), "not running");

        let err = StrategyError::RelaunchFailed("exit status 127".into())
            .with_strategy(StrategyKind::KillAndRespawn);
        assert_eq!(
            err.to_string(),
            "Strategy kill-and-respawn failed: relaunch failed: exit status 127"
        );
    }
}
