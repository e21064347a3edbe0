use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};

/// Default location of the configuration file (relative to the working directory)
pub const DEFAULT_CONFIG_PATH: &str = "config.ini";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default, alias = "DATABASE")]
    pub database: DatabaseConfig,
    #[serde(default, alias = "MONITOR")]
    pub monitor: MonitorConfig,
    #[serde(default, alias = "LOGGING")]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Schema holding `PROCESE` and `STATUS_PROCESS`
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Seconds to wait for a connection before giving up on the cycle
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_database() -> String {
    "process_monitor".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: default_password(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between cycles
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Rounds through the strategy chain per restart
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    /// Seconds between failed rounds
    #[serde(default = "default_restart_delay")]
    pub restart_delay: u64,
    /// Seconds to wait after a datastore failure before reconnecting
    #[serde(default = "default_db_retry_delay")]
    pub db_retry_delay: u64,
    /// Maximum restarts running at the same time within one cycle
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Milliseconds a relaunched process must stay up to count as started
    #[serde(default = "default_respawn_grace_ms")]
    pub respawn_grace_ms: u64,
    /// Seconds a `systemctl`/`service` invocation may run before it is killed
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
}

fn default_interval() -> u64 {
    300
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_restart_delay() -> u64 {
    2
}

fn default_db_retry_delay() -> u64 {
    60
}

fn default_parallelism() -> usize {
    1
}

fn default_respawn_grace_ms() -> u64 {
    500
}

fn default_command_timeout() -> u64 {
    120
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_delay: default_restart_delay(),
            db_retry_delay: default_db_retry_delay(),
            parallelism: default_parallelism(),
            respawn_grace_ms: default_respawn_grace_ms(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay)
    }

    pub fn db_retry_delay(&self) -> Duration {
        Duration::from_secs(self.db_retry_delay)
    }

    pub fn respawn_grace(&self) -> Duration {
        Duration::from_millis(self.respawn_grace_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the daily rolling log file
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Enable JSON formatted console logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            json: false,
        }
    }
}

/// Result of [`AppConfig::load_or_create`]
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    /// The file did not exist and was generated from defaults
    pub created: bool,
}

impl AppConfig {
    /// Load configuration from `path`, generating a default file first if it is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<LoadedConfig> {
        let path = path.as_ref();
        let created = if path.exists() {
            false
        } else {
            write_default_config(path)?;
            true
        };

        let config = Self::load_from(path)?;
        if let Err(errors) = config.validate() {
            return Err(MonitorError::InvalidConfig(errors));
        }

        Ok(LoadedConfig {
            config,
            path: path.to_path_buf(),
            created,
        })
    }

    /// Load configuration from an INI file and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = Config::builder()
            .add_source(
                File::from(path.as_ref().to_path_buf())
                    .format(FileFormat::Ini)
                    .required(true),
            )
            // Override with environment variables (PROCWATCH_MONITOR__INTERVAL, etc.)
            .add_source(
                Environment::with_prefix("PROCWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.host.trim().is_empty() {
            errors.push("DATABASE.host must not be empty".to_string());
        }

        if self.database.database.trim().is_empty() {
            errors.push("DATABASE.database must not be empty".to_string());
        }

        if self.database.connect_timeout == 0 {
            errors.push("DATABASE.connect_timeout must be at least 1 second".to_string());
        }

        if self.monitor.interval == 0 {
            errors.push("MONITOR.interval must be at least 1 second".to_string());
        }

        if self.monitor.max_restart_attempts == 0 {
            errors.push("MONITOR.max_restart_attempts must be at least 1".to_string());
        }

        if self.monitor.db_retry_delay == 0 {
            errors.push("MONITOR.db_retry_delay must be at least 1 second".to_string());
        }

        if self.monitor.parallelism == 0 {
            errors.push("MONITOR.parallelism must be at least 1".to_string());
        }

        if self.monitor.command_timeout == 0 {
            errors.push("MONITOR.command_timeout must be at least 1 second".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Render this configuration in the on-disk INI layout
    pub fn to_ini(&self) -> String {
        format!(
            "[DATABASE]\n\
             host = {}\n\
             port = {}\n\
             database = {}\n\
             user = {}\n\
             password = {}\n\
             connect_timeout = {}\n\
             \n\
             [MONITOR]\n\
             interval = {}\n\
             max_restart_attempts = {}\n\
             restart_delay = {}\n\
             db_retry_delay = {}\n\
             parallelism = {}\n\
             respawn_grace_ms = {}\n\
             command_timeout = {}\n\
             \n\
             [LOGGING]\n\
             level = {}\n\
             dir = {}\n\
             json = {}\n",
            self.database.host,
            self.database.port,
            self.database.database,
            self.database.user,
            self.database.password,
            self.database.connect_timeout,
            self.monitor.interval,
            self.monitor.max_restart_attempts,
            self.monitor.restart_delay,
            self.monitor.db_retry_delay,
            self.monitor.parallelism,
            self.monitor.respawn_grace_ms,
            self.monitor.command_timeout,
            self.logging.level,
            self.logging.dir.display(),
            self.logging.json,
        )
    }
}

/// Write the default configuration to `path`, creating parent directories
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, AppConfig::default().to_ini())?;
    Ok(())
}
