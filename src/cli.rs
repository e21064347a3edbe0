use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;
use crate::supervisor::CycleReport;

#[derive(Parser, Debug)]
#[command(name = "procwatch")]
#[command(author, version)]
#[command(about = "Alarm-driven process restart daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path (created with defaults if missing)
    #[arg(short, long, env = "PROCWATCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the monitor until interrupted (default)
    Run,
    /// Run a single cycle and print what happened
    Once {
        /// Print the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

/// Human-readable cycle summary for `procwatch once`
pub fn render_report(report: &CycleReport) -> String {
    let mut out = format!("Cycle {}\n", report.cycle_id);

    if let Some(err) = &report.repository_error {
        out.push_str(&format!("  datastore unavailable: {}\n", err));
        return out;
    }

    if report.processes.is_empty() {
        out.push_str("  no processes in alarm state\n");
        return out;
    }

    for process in &report.processes {
        let name = process.process_name.as_deref().unwrap_or("?");
        let status = match process.error() {
            None if process.outcome.alarm_cleared() => "restarted, alarm cleared".to_string(),
            None => "skipped".to_string(),
            Some(err) => err.to_string(),
        };
        out.push_str(&format!("  [{}] {}: {}\n", process.process_id, name, status));
    }

    out.push_str(&format!(
        "  {}/{} restarted\n",
        report.restarted(),
        report.processes.len()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["procwatch"]).unwrap();
        assert_eq!(cli.command(), Commands::Run);
        assert_eq!(cli.config, PathBuf::from("config.ini"));
    }

    #[test]
    fn test_once_with_json() {
        let cli =
            Cli::try_parse_from(["procwatch", "--config", "/etc/procwatch.ini", "once", "--json"])
                .unwrap();
        assert_eq!(cli.command(), Commands::Once { json: true });
        assert_eq!(cli.config, PathBuf::from("/etc/procwatch.ini"));
    }

    #[test]
    fn test_init_config_force() {
        let cli = Cli::try_parse_from(["procwatch", "init-config", "--force"]).unwrap();
        assert_eq!(cli.command(), Commands::InitConfig { force: true });
    }
}
