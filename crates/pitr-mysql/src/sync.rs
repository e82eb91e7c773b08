//! Binlog catalog synchronization: window selection, per-file download with
//! atomic rename, and singleflight coalescing of concurrent fetch requests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pitr_core::error::{PitrError, Result};
use pitr_core::model::{BinlogFile, DbInfo};
use pitr_core::path::BackupPath;
use pitr_core::sql::SqlExecutor;
use pitr_shared::config::MysqlBin;
use tokio_util::sync::CancellationToken;

use tracing::{info, instrument, warn};

use crate::runner::ProcessRunner;
use crate::server::sorted_binlog_files_on_server;
use crate::singleflight::Singleflight;

/// The outcome of one fetch round: the window's files (downloaded or not)
/// and whether this particular round actually downloaded the latest file.
#[derive(Debug, Clone)]
pub struct RoundResult {
    pub files: Vec<BinlogFile>,
    pub downloaded_latest: bool,
}

/// Coalesces concurrent `fetch_binlogs` calls per instance and drives the
/// per-file download/validate/rename pipeline.
pub struct SyncEngine {
    runner: Arc<dyn ProcessRunner>,
    singleflight: Singleflight<Result<RoundResult>>,
}

impl SyncEngine {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            singleflight: Singleflight::new(),
        }
    }

    /// Ensures the binlogs covering `[earliest_backup_sequence or
    /// latest_binlog_sequence, server-latest]` are present locally.
    ///
    /// If the caller needs the currently-active (growing) file and the
    /// coalesced round they shared did not download it, a dedicated second
    /// round is run with `download_latest_binlog_file=true`; per the
    /// source's behavior this method then returns that second round's files
    /// alone, not a merge of both rounds.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, db, bin, paths, sql, cancel), fields(instance_id = db.instance_id))]
    pub async fn fetch_binlogs(
        &self,
        db: DbInfo,
        bin: MysqlBin,
        paths: BackupPath,
        sql: Arc<dyn SqlExecutor>,
        download_latest_binlog_file: bool,
        earliest_backup_sequence: i64,
        latest_binlog_sequence: i64,
        cancel: CancellationToken,
    ) -> Result<Vec<BinlogFile>> {
        let key = db.instance_key();

        let round = self
            .run_round_coalesced(
                &key,
                db.clone(),
                bin.clone(),
                paths.clone(),
                sql.clone(),
                download_latest_binlog_file,
                earliest_backup_sequence,
                latest_binlog_sequence,
                cancel.clone(),
            )
            .await?;

        if download_latest_binlog_file && !round.downloaded_latest {
            info!("shared round did not cover the latest binlog file, starting a second round");
            let second = self
                .run_round_coalesced(
                    &key,
                    db,
                    bin,
                    paths,
                    sql,
                    true,
                    earliest_backup_sequence,
                    latest_binlog_sequence,
                    cancel,
                )
                .await?;
            return Ok(second.files);
        }

        Ok(round.files)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_round_coalesced(
        &self,
        key: &str,
        db: DbInfo,
        bin: MysqlBin,
        paths: BackupPath,
        sql: Arc<dyn SqlExecutor>,
        download_latest_binlog_file: bool,
        earliest_backup_sequence: i64,
        latest_binlog_sequence: i64,
        cancel: CancellationToken,
    ) -> Result<RoundResult> {
        let runner = self.runner.clone();
        self.singleflight
            .run(key, move || {
                run_fetch_round(
                    runner,
                    db,
                    bin,
                    paths,
                    sql,
                    download_latest_binlog_file,
                    earliest_backup_sequence,
                    latest_binlog_sequence,
                    cancel,
                )
            })
            .await
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_fetch_round(
    runner: Arc<dyn ProcessRunner>,
    db: DbInfo,
    bin: MysqlBin,
    paths: BackupPath,
    sql: Arc<dyn SqlExecutor>,
    download_latest_binlog_file: bool,
    earliest_backup_sequence: i64,
    latest_binlog_sequence: i64,
    cancel: CancellationToken,
) -> Result<RoundResult> {
    let server_files = sorted_binlog_files_on_server(sql.as_ref()).await?;
    let window = select_window(&server_files, earliest_backup_sequence, latest_binlog_sequence)?;
    info!(window_size = window.len(), "resolved binlog download window");
    let binlog_dir = paths.ensure_binlog_dir(db.instance_id).await?;
    let latest_name = server_files.last().map(|f| f.name.clone());

    let mut downloaded_latest = false;
    let mut results = Vec::with_capacity(window.len());

    for mut file in window {
        let is_latest = latest_name.as_deref() == Some(file.name.as_str());
        if is_latest && !download_latest_binlog_file {
            results.push(file);
            continue;
        }

        download_one(&runner, &db, &bin, &binlog_dir, &mut file, is_latest, &cancel).await?;
        if is_latest {
            downloaded_latest = true;
        }
        results.push(file);
    }

    Ok(RoundResult {
        files: results,
        downloaded_latest,
    })
}

/// Locates the suffix of `server_files` to download: just past the locally
/// known `latest_binlog_sequence`, or from `earliest_backup_sequence` if the
/// former is absent. Neither present is `NotFound`.
fn select_window(
    server_files: &[BinlogFile],
    earliest_backup_sequence: i64,
    latest_binlog_sequence: i64,
) -> Result<Vec<BinlogFile>> {
    let start_index = if let Some(i) = server_files
        .iter()
        .position(|f| f.sequence == latest_binlog_sequence)
    {
        i + 1
    } else if let Some(i) = server_files
        .iter()
        .position(|f| f.sequence == earliest_backup_sequence)
    {
        i
    } else {
        return Err(PitrError::NotFound(format!(
            "no binlog file on server matches latest_binlog_sequence={latest_binlog_sequence} \
             or earliest_backup_sequence={earliest_backup_sequence}"
        )));
    };

    let start_index = start_index.min(server_files.len());
    Ok(server_files[start_index..].to_vec())
}

async fn download_one(
    runner: &Arc<dyn ProcessRunner>,
    db: &DbInfo,
    bin: &MysqlBin,
    binlog_dir: &Path,
    file: &mut BinlogFile,
    is_latest: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let temp_path = binlog_dir.join(format!("tmp-{}", file.name));
    let _cleanup = TempFileGuard(temp_path.clone());

    runner
        .fetch_remote_binlog(db, bin, binlog_dir, &file.name, cancel)
        .await?;

    let metadata = tokio::fs::metadata(&temp_path)
        .await
        .map_err(|e| PitrError::FileSystem(format!("stat {temp_path:?}: {e}")))?;
    let downloaded_size = metadata.len() as i64;

    if !is_latest && downloaded_size != file.size {
        warn!(
            file = %file.name,
            downloaded_size,
            expected_size = file.size,
            "downloaded binlog size does not match server"
        );
        return Err(PitrError::SizeMismatch {
            file: file.name.clone(),
            downloaded: downloaded_size,
            expected: file.size,
        });
    }
    if is_latest {
        file.size = downloaded_size;
    }

    let final_path = binlog_dir.join(&file.name);
    tokio::fs::rename(&temp_path, &final_path)
        .await
        .map_err(|e| PitrError::FileSystem(format!("rename {temp_path:?} -> {final_path:?}: {e}")))?;

    file.first_event_time = Some(runner.first_event_time(bin, &final_path, cancel).await?);
    file.downloaded = true;

    Ok(())
}

/// Removes the temp file on drop, covering every exit path (success,
/// download failure, size mismatch). A no-op if the file was already
/// renamed away.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
