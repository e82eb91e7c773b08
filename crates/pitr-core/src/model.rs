//! Connection descriptors and replication coordinates shared across the PITR engine.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which MySQL-family server we are talking to. Affects tool resolution and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    MySql,
    MariaDb,
}

/// Connection descriptor for one server instance. Immutable for the lifetime of a `DbProgram`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub instance_id: u64,
    pub db_type: DbType,
}

impl DbInfo {
    /// The singleflight coalescing key for this instance: its id in hex.
    pub fn instance_key(&self) -> String {
        format!("{:x}", self.instance_id)
    }
}

/// One binary log, either as reported by the server or as discovered on local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogFile {
    pub name: String,
    /// Numeric ordering key. Never compare names lexicographically: sequences
    /// roll past 999999 and `"binlog.1000000"` would otherwise sort before
    /// `"binlog.999999"`.
    pub sequence: i64,
    pub size: i64,
    pub first_event_time: Option<DateTime<Local>>,
    pub downloaded: bool,
}

impl BinlogFile {
    pub fn new(name: impl Into<String>, sequence: i64, size: i64) -> Self {
        Self {
            name: name.into(),
            sequence,
            size,
            first_event_time: None,
            downloaded: false,
        }
    }
}

/// A replication coordinate: the point a backup or restore anchors to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogInfo {
    /// Exact on-disk name, e.g. `"binlog.000042"`. Kept verbatim (not
    /// recomputed from `sequence`) so zero-padding survives.
    pub file_name: String,
    pub sequence: i64,
    pub position: i64,
}

/// External entity the engine reads but never writes: a row from the caller's backup history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbBackupHistory {
    pub db_instance_id: u64,
    pub db_backup_id: u64,
    pub db_name: String,
    pub uuid: String,
}

/// A replay plan: the span to apply and the local binlog files that cover it, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreInfo {
    pub start_position: i64,
    pub target_position: i64,
    /// Binlog file names, ascending by sequence, contiguous.
    pub binlog_names: Vec<String>,
}

impl RestoreInfo {
    pub fn binlog_paths(&self, binlog_dir: &std::path::Path) -> Vec<PathBuf> {
        self.binlog_names
            .iter()
            .map(|name| binlog_dir.join(name))
            .collect()
    }
}
