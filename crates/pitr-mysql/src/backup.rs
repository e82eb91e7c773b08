//! Logical backup engine: `mysqldump` into a per-backup temp file, parse its
//! `CHANGE MASTER TO` header for the anchoring binlog coordinate, then commit
//! the file under its final name.

use std::sync::Arc;

use pitr_core::error::{PitrError, Result};
use pitr_core::model::{BinlogInfo, DbInfo};
use pitr_core::parser::{parse_dump_header_coordinates, DUMP_HEADER_LINE_LIMIT};
use pitr_core::path::BackupPath;
use pitr_shared::config::MysqlBin;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::runner::ProcessRunner;

/// A completed logical backup: where its dump file ended up and the binlog
/// coordinate it was taken at, for the restore engine to anchor replay on.
#[derive(Debug, Clone)]
pub struct BackupResult {
    pub dump_path: std::path::PathBuf,
    pub coordinates: BinlogInfo,
}

/// Runs `mysqldump` for `db_name` into `<backup_dir>/backup.tmp`, reads the
/// `CHANGE MASTER TO` coordinates out of its header, then renames it to
/// `<backup_dir>/<uuid>.sql`. The temp file is removed on any failure so a
/// partial dump never masquerades as a completed one.
#[instrument(skip(runner, db, bin, cancel), fields(instance_id = db.instance_id, backup_id))]
pub async fn run_backup(
    runner: &Arc<dyn ProcessRunner>,
    db: &DbInfo,
    bin: &MysqlBin,
    paths: &BackupPath,
    db_name: &str,
    backup_id: u64,
    cancel: &CancellationToken,
) -> Result<BackupResult> {
    let backup_dir = paths.ensure_backup_dir(db.instance_id, backup_id).await?;
    let temp_path = backup_dir.join("backup.tmp");

    let outcome = do_backup(runner, db, bin, db_name, &temp_path, &backup_dir, cancel).await;

    match outcome {
        Ok(result) => {
            info!(dump_path = ?result.dump_path, "backup committed");
            Ok(result)
        }
        Err(err) => {
            error!(error = %err, "backup failed, removing temp dump file");
            let _ = tokio::fs::remove_file(&temp_path).await;
            Err(err)
        }
    }
}

async fn do_backup(
    runner: &Arc<dyn ProcessRunner>,
    db: &DbInfo,
    bin: &MysqlBin,
    db_name: &str,
    temp_path: &std::path::Path,
    backup_dir: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<BackupResult> {
    runner.dump(db, bin, db_name, temp_path, cancel).await?;

    let coordinates = coordinates_from_dump_header(temp_path).await?;

    let file_name = format!("{}.sql", uuid::Uuid::new_v4());
    let final_path = backup_dir.join(&file_name);
    tokio::fs::rename(temp_path, &final_path)
        .await
        .map_err(|e| PitrError::FileSystem(format!("rename {temp_path:?} -> {final_path:?}: {e}")))?;

    Ok(BackupResult {
        dump_path: final_path,
        coordinates,
    })
}

/// Reads the header lines of a dump file looking for the `CHANGE MASTER TO`
/// sentinel; stops scanning well short of the full file since the
/// coordinates always live in the first handful of lines.
async fn coordinates_from_dump_header(dump_path: &std::path::Path) -> Result<BinlogInfo> {
    let file = tokio::fs::File::open(dump_path)
        .await
        .map_err(|e| PitrError::FileSystem(format!("open {dump_path:?}: {e}")))?;
    let mut reader = BufReader::new(file).lines();

    let mut header_lines = Vec::new();
    while header_lines.len() < DUMP_HEADER_LINE_LIMIT {
        match reader
            .next_line()
            .await
            .map_err(|e| PitrError::FileSystem(e.to_string()))?
        {
            Some(line) => header_lines.push(line),
            None => break,
        }
    }

    parse_dump_header_coordinates(header_lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockProcessRunner;
    use pitr_core::model::DbType;
    use std::io::Write;

    fn db_info() -> DbInfo {
        DbInfo {
            host: "127.0.0.1".into(),
            port: 3306,
            username: "root".into(),
            password: "secret".into(),
            instance_id: 1,
            db_type: DbType::MySql,
        }
    }

    fn dump_header() -> &'static str {
        "-- MySQL dump\n\
         -- Position to start replication or point-in-time recovery from\n\
         --\n\
         CHANGE MASTER TO MASTER_LOG_FILE='binlog.000042', MASTER_LOG_POS=1943;\n"
    }

    #[tokio::test]
    async fn backup_commits_dump_and_parses_coordinates() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BackupPath::new(tmp.path());

        let mut runner = MockProcessRunner::new();
        runner.expect_dump().returning(|_, _, _, dest, _| {
            let mut file = std::fs::File::create(dest).unwrap();
            file.write_all(dump_header().as_bytes()).unwrap();
            Ok(())
        });

        let result = run_backup(
            &(Arc::new(runner) as Arc<dyn ProcessRunner>),
            &db_info(),
            &MysqlBin::default(),
            &paths,
            "app_db",
            7,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.coordinates.file_name, "binlog.000042");
        assert_eq!(result.coordinates.position, 1943);
        assert!(result.dump_path.exists());
        assert!(!paths.backup_dir(1, 7).join("backup.tmp").exists());
    }

    #[tokio::test]
    async fn failed_dump_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BackupPath::new(tmp.path());

        let mut runner = MockProcessRunner::new();
        runner
            .expect_dump()
            .returning(|_, _, _, _, _| Err(PitrError::ToolInvocation("mysqldump failed".into())));

        let err = run_backup(
            &(Arc::new(runner) as Arc<dyn ProcessRunner>),
            &db_info(),
            &MysqlBin::default(),
            &paths,
            "app_db",
            7,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PitrError::ToolInvocation(_)));
        assert!(!paths.backup_dir(1, 7).join("backup.tmp").exists());
    }

    #[tokio::test]
    async fn missing_coordinates_in_dump_header_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BackupPath::new(tmp.path());

        let mut runner = MockProcessRunner::new();
        runner.expect_dump().returning(|_, _, _, dest, _| {
            std::fs::write(dest, "-- MySQL dump\n-- nothing useful here\n").unwrap();
            Ok(())
        });

        let err = run_backup(
            &(Arc::new(runner) as Arc<dyn ProcessRunner>),
            &db_info(),
            &MysqlBin::default(),
            &paths,
            "app_db",
            7,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PitrError::Parse(_)));
        assert!(!paths.backup_dir(1, 7).join("backup.tmp").exists());
    }

    #[tokio::test]
    async fn coordinates_past_the_line_limit_are_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = BackupPath::new(tmp.path());

        let mut runner = MockProcessRunner::new();
        runner.expect_dump().returning(|_, _, _, dest, _| {
            // Sentinel plus 105 filler lines before the CHANGE MASTER TO
            // line: the real coordinates fall past the 100-line read bound,
            // so this must never parse successfully.
            let mut header = String::from(
                "-- Position to start replication or point-in-time recovery from\n",
            );
            for _ in 0..105 {
                header.push_str("-- filler\n");
            }
            header.push_str(
                "CHANGE MASTER TO MASTER_LOG_FILE='binlog.000042', MASTER_LOG_POS=1943;\n",
            );
            std::fs::write(dest, header).unwrap();
            Ok(())
        });

        let err = run_backup(
            &(Arc::new(runner) as Arc<dyn ProcessRunner>),
            &db_info(),
            &MysqlBin::default(),
            &paths,
            "app_db",
            7,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PitrError::Parse(_)));
        assert!(!paths.backup_dir(1, 7).join("backup.tmp").exists());
    }
}
