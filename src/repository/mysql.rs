use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Row};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{AlarmConnection, AlarmRepository};
use crate::config::DatabaseConfig;
use crate::domain::AlarmRecord;
use crate::error::{MonitorError, Result};

/// MySQL storage adapter.
///
/// Opens a fresh connection per session; no pool is kept between cycles.
#[derive(Clone)]
pub struct MySqlAlarmRepository {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
    target: String,
}

impl MySqlAlarmRepository {
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        Self {
            options,
            connect_timeout: Duration::from_secs(config.connect_timeout),
            target: format!("{}@{}:{}/{}", config.user, config.host, config.port, config.database),
        }
    }

    /// `user@host:port/database`, safe to log
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl AlarmRepository for MySqlAlarmRepository {
    async fn connect(&self) -> Result<Box<dyn AlarmConnection>> {
        let conn = tokio::time::timeout(self.connect_timeout, self.options.connect())
            .await
            .map_err(|_| {
                MonitorError::RepositoryUnavailable(format!(
                    "connection to {} timed out after {:?}",
                    self.target, self.connect_timeout
                ))
            })??;

        debug!(target_db = %self.target, "Connected to MySQL");
        Ok(Box::new(MySqlAlarmConnection { conn }))
    }
}

struct MySqlAlarmConnection {
    conn: MySqlConnection,
}

#[async_trait]
impl AlarmConnection for MySqlAlarmConnection {
    #[instrument(skip(self))]
    async fn fetch_alarmed(&mut self) -> Result<Vec<AlarmRecord>> {
        // CAST keeps decoding independent of the exact integer column types
        let rows = sqlx::query(
            r#"
            SELECT CAST(process_id AS SIGNED) AS process_id, CAST(alarma AS SIGNED) AS alarma, notes
            FROM STATUS_PROCESS
            WHERE alarma = 1
            "#,
        )
        .fetch_all(&mut self.conn)
        .await?;

        rows.iter()
            .map(|r| -> Result<AlarmRecord> {
                Ok(AlarmRecord {
                    process_id: r.try_get("process_id")?,
                    alarm_flag: r.try_get::<i64, _>("alarma")? != 0,
                    notes: r.try_get("notes")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn resolve_name(&mut self, process_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT process_name FROM PROCESE WHERE process_id = ?")
            .bind(process_id)
            .fetch_optional(&mut self.conn)
            .await?;

        match row {
            Some(r) => Ok(r.try_get::<Option<String>, _>("process_name")?),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn clear_alarm(&mut self, process_id: i64) -> Result<()> {
        // Dropping an uncommitted transaction rolls it back
        let mut tx = self.conn.begin().await?;
        let result = sqlx::query("UPDATE STATUS_PROCESS SET alarma = 0 WHERE process_id = ?")
            .bind(process_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(process_id, rows = result.rows_affected(), "Alarm cleared");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_hides_password() {
        let config = DatabaseConfig {
            host: "db.internal".into(),
            port: 3307,
            database: "process_monitor".into(),
            user: "monitor".into(),
            password: "hunter2".into(),
            connect_timeout: 5,
        };

        let repo = MySqlAlarmRepository::new(&config);
        assert_eq!(repo.target(), "monitor@db.internal:3307/process_monitor");
        assert!(!repo.target().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_repository_unavailable() {
        let config = DatabaseConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_timeout: 2,
            ..DatabaseConfig::default()
        };

        let repo = MySqlAlarmRepository::new(&config);
        match repo.connect().await {
            Err(MonitorError::RepositoryUnavailable(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connection to port 1 should fail"),
        }
    }
}
