//! Coordination Layer
//!
//! Shutdown signalling shared by the monitor loop, the orchestrator and the
//! binary's signal handlers.

pub mod shutdown;

pub use shutdown::{install_signal_handlers, GracefulShutdown, ShutdownSignal, ShutdownToken};
