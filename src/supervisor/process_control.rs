//! OS process-control primitives used by the restart strategies
//!
//! `SystemProcessControl` shells out to `systemctl`, `service` and `pgrep`,
//! sends SIGKILL through `nix`, and launches executables with
//! `tokio::process`.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Failure of one OS-level operation
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("could not run {program}: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("signal to pid {pid} failed: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("could not launch {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{executable} exited with {status} within {grace_ms}ms of launch")]
    ExitedEarly {
        executable: String,
        status: String,
        grace_ms: u128,
    },
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Process-control surface consumed from the OS
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Ask the service supervisor to restart the unit named `unit`
    async fn service_manager_restart(&self, unit: &str) -> ControlResult<()>;

    /// Restart through the legacy start/stop script interface
    async fn service_script_restart(&self, service: &str) -> ControlResult<()>;

    /// PIDs whose command line matches `pattern`; empty when none do
    async fn find_pids(&self, pattern: &str) -> ControlResult<Vec<u32>>;

    /// Forcibly terminate `pid`
    async fn kill(&self, pid: u32) -> ControlResult<()>;

    /// Launch `executable` with no arguments
    async fn spawn(&self, executable: &str) -> ControlResult<()>;
}

/// `ProcessControl` backed by the local host
#[derive(Debug, Clone)]
pub struct SystemProcessControl {
    respawn_grace: Duration,
    command_timeout: Duration,
}

impl SystemProcessControl {
    /// `respawn_grace` is how long a launched process must stay up (or exit 0)
    /// for the launch to count as successful
    pub fn new(respawn_grace: Duration) -> Self {
        Self {
            respawn_grace,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Upper bound for a single `systemctl`/`service`/`pgrep` run
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

impl Default for SystemProcessControl {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

async fn run_tool(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> ControlResult<std::process::Output> {
    debug!(program, ?args, "running");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, output).await {
        Ok(result) => result.map_err(|source| ControlError::Unavailable {
            program: program.to_string(),
            source,
        }),
        Err(_) => {
            warn!(program, ?args, "Command timed out after {:?}", timeout);
            Err(ControlError::Failed {
                command: format!("{} {}", program, args.join(" ")),
                status: format!("timed out after {}s", timeout.as_secs_f32()),
                stderr: String::new(),
            })
        }
    }
}

fn failed(program: &str, args: &[&str], output: &std::process::Output) -> ControlError {
    ControlError::Failed {
        command: format!("{} {}", program, args.join(" ")),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

async fn run_checked(program: &str, args: &[&str], timeout: Duration) -> ControlResult<()> {
    let output = run_tool(program, args, timeout).await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(failed(program, args, &output))
    }
}

/// Parse `pgrep` output, dropping our own PID
fn parse_pids(stdout: &str, own_pid: u32) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != own_pid)
        .collect()
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn service_manager_restart(&self, unit: &str) -> ControlResult<()> {
        run_checked("systemctl", &["restart", unit], self.command_timeout).await
    }

    async fn service_script_restart(&self, service: &str) -> ControlResult<()> {
        run_checked("service", &[service, "restart"], self.command_timeout).await
    }

    async fn find_pids(&self, pattern: &str) -> ControlResult<Vec<u32>> {
        let args = ["-f", pattern];
        let output = run_tool("pgrep", &args, self.command_timeout).await?;

        // pgrep: 0 = matches, 1 = no match, anything else is an error
        match output.status.code() {
            Some(0) => Ok(parse_pids(
                &String::from_utf8_lossy(&output.stdout),
                std::process::id(),
            )),
            Some(1) => Ok(Vec::new()),
            _ => Err(failed("pgrep", &args, &output)),
        }
    }

    #[cfg(unix)]
    async fn kill(&self, pid: u32) -> ControlResult<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ControlError::Signal {
            pid,
            reason: "pid out of range".to_string(),
        })?;

        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            // Already gone between lookup and kill
            Err(Errno::ESRCH) => {
                debug!(pid, "process exited before SIGKILL");
                Ok(())
            }
            Err(e) => Err(ControlError::Signal {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    async fn kill(&self, pid: u32) -> ControlResult<()> {
        Err(ControlError::Signal {
            pid,
            reason: "signals not supported on this platform".to_string(),
        })
    }

    async fn spawn(&self, executable: &str) -> ControlResult<()> {
        let mut cmd = Command::new(executable);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Keep the relaunched process out of our process group so a Ctrl+C
        // aimed at the daemon does not take it down too
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ControlError::Spawn {
            executable: executable.to_string(),
            source,
        })?;

        match tokio::time::timeout(self.respawn_grace, child.wait()).await {
            // Still running after the grace period: detach and reap later
            Err(_) => {
                debug!(executable, pid = ?child.id(), "relaunched process is running");
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        warn!("Failed to reap relaunched process: {}", e);
                    }
                });
                Ok(())
            }
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(ControlError::ExitedEarly {
                executable: executable.to_string(),
                status: status.to_string(),
                grace_ms: self.respawn_grace.as_millis(),
            }),
            Ok(Err(source)) => Err(ControlError::Spawn {
                executable: executable.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pids_skips_own_pid_and_noise() {
        let pids = parse_pids("101\n  202 \nnot-a-pid\n303\n", 202);
        assert_eq!(pids, vec![101, 303]);
    }

    #[test]
    fn test_parse_pids_empty_output() {
        assert!(parse_pids("", 1).is_empty());
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_fails() {
        let control = SystemProcessControl::default();
        let err = control
            .spawn("/nonexistent/procwatch-test-binary")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_reports_early_failure() {
        let control = SystemProcessControl::new(Duration::from_secs(5));
        let err = control.spawn("false").await.unwrap_err();
        assert!(matches!(err, ControlError::ExitedEarly { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_accepts_clean_exit() {
        let control = SystemProcessControl::new(Duration::from_secs(5));
        assert!(control.spawn("true").await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_command_is_cut_off() {
        let started = std::time::Instant::now();
        let err = run_checked("sleep", &["30"], Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::Failed { ref status, .. } if status.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unknown_tool_is_unavailable() {
        let err = run_checked("procwatch-no-such-tool", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_vanished_pid_is_ok() {
        // Spawn and reap a short-lived child so its PID is known to be gone
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        let control = SystemProcessControl::default();
        assert!(control.kill(pid).await.is_ok());
    }
}
