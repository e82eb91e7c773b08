//! `DbProgram`: the per-connection facade tying together the server's
//! connection descriptor, an injected SQL executor and process runner, the
//! on-disk layout, and the shared singleflight-backed sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use pitr_core::error::Result;
use pitr_core::model::{BinlogFile, DbInfo, RestoreInfo};
use pitr_core::path::BackupPath;
use pitr_core::sql::SqlExecutor;
use pitr_shared::config::MysqlBin;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::backup::{run_backup, BackupResult};
use crate::restore::RestoreEngine;
use crate::runner::ProcessRunner;
use crate::server::{check_binlog_enabled, check_binlog_row_format};
use crate::sync::SyncEngine;

/// Created per connection; stateless across calls except for the
/// process-wide [`SyncEngine`] it shares with every other `DbProgram`
/// instance for the same `InstanceId`. Borrows its `SqlExecutor`, it does
/// not close it — closing the underlying connection is the caller's job.
pub struct DbProgram {
    db: DbInfo,
    bin: MysqlBin,
    sql: Arc<dyn SqlExecutor>,
    paths: BackupPath,
    runner: Arc<dyn ProcessRunner>,
    sync_engine: Arc<SyncEngine>,
    restore_engine: RestoreEngine,
}

impl DbProgram {
    pub fn new(
        db: DbInfo,
        bin: MysqlBin,
        sql: Arc<dyn SqlExecutor>,
        paths: BackupPath,
        runner: Arc<dyn ProcessRunner>,
        sync_engine: Arc<SyncEngine>,
    ) -> Self {
        let restore_engine = RestoreEngine::new(runner.clone());
        Self {
            db,
            bin,
            sql,
            paths,
            runner,
            sync_engine,
            restore_engine,
        }
    }

    pub fn db(&self) -> &DbInfo {
        &self.db
    }

    /// Requires `log_bin = ON` and `binlog_format = ROW` before any sync,
    /// backup, or replay is attempted.
    #[instrument(skip(self), fields(instance_id = self.db.instance_id))]
    pub async fn check_replication_prerequisites(&self) -> Result<()> {
        check_binlog_enabled(self.sql.as_ref()).await?;
        check_binlog_row_format(self.sql.as_ref()).await
    }

    /// Ensures the binlogs covering the requested span are present locally,
    /// coalescing with any other in-flight fetch on this instance.
    pub async fn fetch_binlogs(
        &self,
        download_latest_binlog_file: bool,
        earliest_backup_sequence: i64,
        latest_binlog_sequence: i64,
        cancel: CancellationToken,
    ) -> Result<Vec<BinlogFile>> {
        self.sync_engine
            .fetch_binlogs(
                self.db.clone(),
                self.bin.clone(),
                self.paths.clone(),
                self.sql.clone(),
                download_latest_binlog_file,
                earliest_backup_sequence,
                latest_binlog_sequence,
                cancel,
            )
            .await
    }

    /// Runs `mysqldump` for `db_name` and commits the dump under `backup_id`.
    pub async fn backup(
        &self,
        db_name: &str,
        backup_id: u64,
        cancel: &CancellationToken,
    ) -> Result<BackupResult> {
        run_backup(
            &self.runner,
            &self.db,
            &self.bin,
            &self.paths,
            db_name,
            backup_id,
            cancel,
        )
        .await
    }

    /// Pipes a committed dump file into `mysql --database <target_db>`.
    pub async fn restore_base(
        &self,
        target_db: &str,
        dump_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.restore_engine
            .restore_base(&self.db, &self.bin, target_db, dump_path, cancel)
            .await
    }

    /// Replays `info`'s span from `source_db` into `target_db`, resolving
    /// `lower_case_table_names` first.
    pub async fn replay(
        &self,
        source_db: &str,
        target_db: &str,
        info: &RestoreInfo,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let binlog_dir = self.paths.binlog_dir(self.db.instance_id);
        self.restore_engine
            .replay(
                self.sql.as_ref(),
                &self.db,
                &self.bin,
                source_db,
                target_db,
                &binlog_dir,
                info,
                cancel,
            )
            .await
    }

    /// Locally decodes `paths` to find the first event at or after
    /// `target_time`, resolving the restore's `TargetPosition`.
    pub async fn resolve_target_position(
        &self,
        paths: &[PathBuf],
        target_time: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        self.runner
            .event_position_at_or_after(&self.bin, paths, target_time, cancel)
            .await
    }
}
