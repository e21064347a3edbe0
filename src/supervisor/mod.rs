//! Supervisor Layer for Alarm-Driven Restarts
//!
//! This module provides the restart machinery:
//! - Process control over systemctl, service scripts and signals
//! - Restart strategy chain
//! - Orchestrator for bounded restart rounds
//! - Monitor loop driving periodic alarm cycles

pub mod monitor;
pub mod orchestrator;
pub mod process_control;
pub mod strategy;

pub use monitor::{CycleReport, MonitorLoop, MonitorSettings, ProcessOutcome, ProcessReport};
pub use orchestrator::{RestartOrchestrator, RestartPolicy};
pub use process_control::{ControlError, ControlResult, ProcessControl, SystemProcessControl};
pub use strategy::{
    KillAndRespawn, RestartStrategy, RestartStrategyChain, ServiceManagerRestart,
    ServiceScriptRestart,
};
