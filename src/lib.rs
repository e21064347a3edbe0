pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod logging;
pub mod repository;
pub mod supervisor;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal, ShutdownToken};
pub use domain::{AlarmRecord, MonitorState, MonitoredProcess, RestartAttemptResult, StrategyKind};
pub use error::{MonitorError, Result, StrategyError};
pub use repository::{AlarmConnection, AlarmRepository, MemoryAlarmRepository, MySqlAlarmRepository};
pub use supervisor::{
    CycleReport, MonitorLoop, ProcessControl, RestartOrchestrator, RestartPolicy,
    RestartStrategyChain, SystemProcessControl,
};
