//! Alarm Repository
//!
//! Access layer over the two datastore tables. A repository hands out
//! connection-scoped sessions; every alarm query and update runs on a
//! session, and a session is released on `close` or drop.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;

use crate::domain::AlarmRecord;
use crate::error::Result;

pub use memory::MemoryAlarmRepository;
pub use mysql::MySqlAlarmRepository;

/// Source of datastore sessions
#[async_trait]
pub trait AlarmRepository: Send + Sync {
    /// Open a session. Fails with `RepositoryUnavailable`.
    async fn connect(&self) -> Result<Box<dyn AlarmConnection>>;
}

/// One open datastore session
#[async_trait]
pub trait AlarmConnection: Send {
    /// All status records with the alarm flag set
    async fn fetch_alarmed(&mut self) -> Result<Vec<AlarmRecord>>;

    /// Process name for an id; `None` when no process record exists
    async fn resolve_name(&mut self, process_id: i64) -> Result<Option<String>>;

    /// Clear the alarm flag in one atomic update.
    ///
    /// Clearing an already-clear (or absent) record succeeds without change.
    async fn clear_alarm(&mut self, process_id: i64) -> Result<()>;

    /// Release the session
    async fn close(self: Box<Self>) -> Result<()>;
}
