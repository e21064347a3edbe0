//! In-memory alarm repository.
//!
//! Mirrors the two datastore tables in process memory for the test suites.
//! Supports outage injection and records every `clear_alarm` call.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{AlarmConnection, AlarmRepository};
use crate::domain::{AlarmRecord, MonitoredProcess};
use crate::error::{MonitorError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    processes: BTreeMap<i64, String>,
    alarms: BTreeMap<i64, AlarmRecord>,
    unavailable: bool,
    fail_fetch: bool,
    fail_resolve: HashSet<i64>,
    fail_clear: HashSet<i64>,
    clear_calls: Vec<i64>,
    connects: usize,
    open_connections: usize,
}

/// Shared handle to an in-memory datastore; clones see the same tables
#[derive(Debug, Clone, Default)]
pub struct MemoryAlarmRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAlarmRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }

    /// Insert a process row and its status row
    pub fn insert(&self, process: MonitoredProcess, alarm_flag: bool) {
        let mut state = self.lock();
        let record = AlarmRecord {
            process_id: process.process_id,
            alarm_flag,
            notes: None,
        };
        state.alarms.insert(process.process_id, record);
        state.processes.insert(process.process_id, process.process_name);
    }

    /// Insert a status row without a matching process row
    pub fn insert_orphan_alarm(&self, process_id: i64) {
        self.lock()
            .alarms
            .insert(process_id, AlarmRecord::alarmed(process_id));
    }

    /// Raise or clear an alarm the way an external producer would
    pub fn set_alarm(&self, process_id: i64, alarm_flag: bool) {
        let mut state = self.lock();
        state
            .alarms
            .entry(process_id)
            .or_insert_with(|| AlarmRecord::healthy(process_id))
            .alarm_flag = alarm_flag;
    }

    pub fn alarm(&self, process_id: i64) -> Option<AlarmRecord> {
        self.lock().alarms.get(&process_id).cloned()
    }

    /// Refuse new connections and fail every query
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Accept connections but fail `fetch_alarmed`
    pub fn set_fetch_failure(&self, fail: bool) {
        self.lock().fail_fetch = fail;
    }

    /// Fail `resolve_name` for one id
    pub fn fail_resolve_for(&self, process_id: i64) {
        self.lock().fail_resolve.insert(process_id);
    }

    /// Fail `clear_alarm` for one id; the flag is left untouched
    pub fn fail_clear_for(&self, process_id: i64) {
        self.lock().fail_clear.insert(process_id);
    }

    /// Every `clear_alarm` call, in order
    pub fn clear_calls(&self) -> Vec<i64> {
        self.lock().clear_calls.clone()
    }

    /// Total sessions ever opened
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Sessions opened and not yet released
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // A panicking test thread must not wedge the other assertions
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn outage() -> MonitorError {
    MonitorError::RepositoryUnavailable("in-memory datastore marked unavailable".to_string())
}

#[async_trait]
impl AlarmRepository for MemoryAlarmRepository {
    async fn connect(&self) -> Result<Box<dyn AlarmConnection>> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(outage());
        }
        state.connects += 1;
        state.open_connections += 1;

        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            released: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    released: bool,
}

impl MemoryConnection {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let mut state = lock(&self.state);
            state.open_connections = state.open_connections.saturating_sub(1);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl AlarmConnection for MemoryConnection {
    async fn fetch_alarmed(&mut self) -> Result<Vec<AlarmRecord>> {
        let state = lock(&self.state);
        if state.unavailable {
            return Err(outage());
        }
        if state.fail_fetch {
            return Err(MonitorError::RepositoryUnavailable(
                "simulated STATUS_PROCESS query failure".to_string(),
            ));
        }

        Ok(state
            .alarms
            .values()
            .filter(|r| r.alarm_flag)
            .cloned()
            .collect())
    }

    async fn resolve_name(&mut self, process_id: i64) -> Result<Option<String>> {
        let state = lock(&self.state);
        if state.unavailable || state.fail_resolve.contains(&process_id) {
            return Err(MonitorError::RepositoryUnavailable(format!(
                "simulated PROCESE query failure for {process_id}"
            )));
        }

        Ok(state.processes.get(&process_id).cloned())
    }

    async fn clear_alarm(&mut self, process_id: i64) -> Result<()> {
        let mut state = lock(&self.state);
        if state.unavailable {
            return Err(outage());
        }

        state.clear_calls.push(process_id);
        if state.fail_clear.contains(&process_id) {
            return Err(MonitorError::RepositoryUnavailable(format!(
                "simulated STATUS_PROCESS update failure for {process_id}"
            )));
        }
        if let Some(record) = state.alarms.get_mut(&process_id) {
            record.alarm_flag = false;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Release happens in Drop
        drop(self);
        Ok(())
    }
}
