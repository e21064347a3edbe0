use serde::{Deserialize, Serialize};
use std::fmt;

/// Monitor loop state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorState {
    /// Waiting for the next tick
    Idle,
    /// Processing the current alarm set
    Cycling,
    /// Shutdown requested and honoured; terminal
    Stopped,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Idle => "IDLE",
            MonitorState::Cycling => "CYCLING",
            MonitorState::Stopped => "STOPPED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: MonitorState) -> bool {
        use MonitorState::*;

        match (self, target) {
            (Idle, Cycling) => true,
            (Cycling, Idle) => true,

            // Shutdown may land at any point outside of Stopped itself
            (Idle, Stopped) => true,
            (Cycling, Stopped) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Stopped)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for MonitorState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "IDLE" => Ok(MonitorState::Idle),
            "CYCLING" => Ok(MonitorState::Cycling),
            "STOPPED" => Ok(MonitorState::Stopped),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// State transition event (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: MonitorState,
    pub to: MonitorState,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateTransition {
    pub fn new(from: MonitorState, to: MonitorState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(MonitorState::Idle.can_transition_to(MonitorState::Cycling));
        assert!(MonitorState::Cycling.can_transition_to(MonitorState::Idle));
        assert!(MonitorState::Cycling.can_transition_to(MonitorState::Stopped));
        assert!(MonitorState::Idle.can_transition_to(MonitorState::Stopped));
    }

    #[test]
    fn test_stopped_is_terminal() {
        assert!(MonitorState::Stopped.is_terminal());
        assert!(!MonitorState::Stopped.can_transition_to(MonitorState::Idle));
        assert!(!MonitorState::Stopped.can_transition_to(MonitorState::Cycling));
    }

    #[test]
    fn test_round_trip_names() {
        for state in [MonitorState::Idle, MonitorState::Cycling, MonitorState::Stopped] {
            assert_eq!(MonitorState::try_from(state.as_str()), Ok(state));
        }
        assert!(MonitorState::try_from("sleeping").is_err());
    }
}
