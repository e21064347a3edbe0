//! Graceful Shutdown Handler
//!
//! A shutdown request lets the in-flight cycle finish its running restarts,
//! skips processes that have not started yet, and wakes any idle sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM (service manager stop)
    Terminate,
    /// Requested from inside the process (one-shot runs, tests)
    Internal,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminate"),
            ShutdownSignal::Internal => write!(f, "internal"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    shutdown_requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = watch::channel(None);
        Self {
            shutdown_requested: AtomicBool::new(false),
            signal_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    /// Create a token that can be used to observe shutdown from async tasks
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view of the shutdown state
#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.signal_rx.borrow_and_update() {
                return signal;
            }
            if self.signal_rx.changed().await.is_err() {
                // Coordinator dropped without a request: nothing will ever arrive
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_shutdown_requested() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }
}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown_sigterm = shutdown.clone();
        let shutdown_sigint = shutdown;

        // Handle SIGTERM
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM");
                    shutdown_sigterm.request_shutdown(ShutdownSignal::Terminate);
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        });

        // Handle SIGINT (Ctrl+C)
        tokio::spawn(async move {
            match signal(SignalKind::interrupt()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGINT");
                    shutdown_sigint.request_shutdown(ShutdownSignal::Interrupt);
                }
                Err(e) => error!("Failed to install SIGINT handler: {}", e),
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                return;
            }
            info!("Received Ctrl+C");
            shutdown.request_shutdown(ShutdownSignal::Interrupt);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "interrupt");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "terminate");
        assert_eq!(ShutdownSignal::Internal.to_string(), "internal");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.token();

        assert!(!shutdown.is_shutdown_requested());
        assert!(!token.is_shutdown_requested());

        shutdown.request_shutdown(ShutdownSignal::Interrupt);
        assert!(shutdown.is_shutdown_requested());
        assert!(token.is_shutdown_requested());

        // Duplicate request keeps the first signal
        shutdown.request_shutdown(ShutdownSignal::Terminate);
        let mut token = shutdown.token();
        assert_eq!(token.wait_for_shutdown().await, ShutdownSignal::Interrupt);
    }

    #[test]
    fn test_wait_is_pending_until_requested() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.token();
        let mut wait = task::spawn(token.wait_for_shutdown());

        assert_pending!(wait.poll());
        shutdown.request_shutdown(ShutdownSignal::Terminate);
        assert!(wait.is_woken());
        assert_ready_eq!(wait.poll(), ShutdownSignal::Terminate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_shutdown() {
        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.token();

        assert!(token.sleep(Duration::from_secs(300)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_interrupted_by_shutdown() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let mut token = shutdown.token();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.request_shutdown(ShutdownSignal::Terminate);
        });

        let started = tokio::time::Instant::now();
        assert!(!token.sleep(Duration::from_secs(300)).await);
        assert!(started.elapsed() < Duration::from_secs(300));
    }
}
