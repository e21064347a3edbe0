use serde::{Deserialize, Serialize};

/// Identity record of a monitored process (`PROCESE` table).
///
/// Maintained by an external registration process; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredProcess {
    pub process_id: i64,
    pub process_name: String,
}

impl MonitoredProcess {
    pub fn new(process_id: i64, process_name: impl Into<String>) -> Self {
        Self {
            process_id,
            process_name: process_name.into(),
        }
    }
}

/// Mutable status record of a monitored process (`STATUS_PROCESS` table).
///
/// `alarm_flag = true` means the process needs a restart. The daemon never
/// creates or deletes these rows, it only clears the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub process_id: i64,
    pub alarm_flag: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AlarmRecord {
    pub fn alarmed(process_id: i64) -> Self {
        Self {
            process_id,
            alarm_flag: true,
            notes: None,
        }
    }

    pub fn healthy(process_id: i64) -> Self {
        Self {
            process_id,
            alarm_flag: false,
            notes: None,
        }
    }
}
