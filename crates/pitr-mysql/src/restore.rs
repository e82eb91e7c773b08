//! Restore/replay engine: base restore from a dump file, then binlog replay
//! between two positions with `lower_case_table_names`-aware database rewriting.

use std::path::Path;
use std::sync::Arc;

use pitr_core::error::{PitrError, Result};
use pitr_core::model::{DbInfo, RestoreInfo};
use pitr_core::sql::SqlExecutor;
use pitr_shared::config::MysqlBin;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::runner::{ProcessRunner, ReplayPlan};
use crate::server::server_variable;

/// Drives base restore and binlog replay through an injected [`ProcessRunner`].
pub struct RestoreEngine {
    runner: Arc<dyn ProcessRunner>,
}

impl RestoreEngine {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Pipes `dump_path` into `mysql --database <target_db>`.
    #[instrument(skip(self, db, bin, cancel), fields(instance_id = db.instance_id))]
    pub async fn restore_base(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        target_db: &str,
        dump_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.runner
            .restore_base(db, bin, target_db, dump_path, cancel)
            .await
    }

    /// Resolves `lower_case_table_names`, builds the rewrite plan, and pipes
    /// `mysqlbinlog | mysql` over `info`'s span.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, sql, db, bin, cancel, info), fields(instance_id = db.instance_id))]
    pub async fn replay(
        &self,
        sql: &dyn SqlExecutor,
        db: &DbInfo,
        bin: &MysqlBin,
        source_db: &str,
        target_db: &str,
        binlog_dir: &Path,
        info: &RestoreInfo,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lower_case_table_names = server_variable(sql, "lower_case_table_names").await?;
        let rewrite_from = rewrite_source_name(&lower_case_table_names, source_db)?;
        info!(
            rewrite_from = %rewrite_from,
            rewrite_to = %target_db,
            "replaying binlogs"
        );

        let plan = ReplayPlan {
            target_db: target_db.to_string(),
            rewrite_from,
            rewrite_to: target_db.to_string(),
            start_position: info.start_position,
            target_position: info.target_position,
            binlog_paths: info.binlog_paths(binlog_dir),
        };

        self.runner.replay(db, bin, &plan, cancel).await
    }
}

/// Maps `lower_case_table_names` to how the source database name must be
/// spelled in `--rewrite-db`, per the server's own on-disk/compare rules.
fn rewrite_source_name(lower_case_table_names: &str, source_db: &str) -> Result<String> {
    match lower_case_table_names {
        "0" => Ok(source_db.to_string()),
        "1" => Ok(source_db.to_lowercase()),
        "2" => Ok(source_db.to_lowercase()),
        other => Err(PitrError::Config(format!(
            "unsupported lower_case_table_names value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockProcessRunner;
    use pitr_core::model::DbType;
    use pitr_core::sql::{MockSqlExecutor, QueryResult, SqlValue};
    use std::sync::Mutex;

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

    fn restore_info() -> RestoreInfo {
        RestoreInfo {
            start_position: 120,
            target_position: 5000,
            binlog_names: vec!["binlog.000001".into(), "binlog.000002".into()],
        }
    }

    fn mock_lower_case_table_names(value: &'static str) -> MockSqlExecutor {
        let mut sql = MockSqlExecutor::new();
        sql.expect_query().returning(move |_| {
            Ok(QueryResult {
                columns: vec!["Variable_name".into(), "Value".into()],
                rows: vec![[
                    (
                        "Variable_name".to_string(),
                        SqlValue::Str("lower_case_table_names".into()),
                    ),
                    ("Value".to_string(), SqlValue::Str(value.to_string())),
                ]
                .into_iter()
                .collect()],
            })
        });
        sql
    }

    #[tokio::test]
    async fn mode_zero_rewrites_verbatim() {
        let sql = mock_lower_case_table_names("0");
        let captured_plan = Arc::new(Mutex::new(None));
        let mut runner = MockProcessRunner::new();
        runner.expect_replay().returning({
            let captured_plan = captured_plan.clone();
            move |_, _, plan, _| {
                *captured_plan.lock().unwrap() = Some(plan.clone());
                Ok(())
            }
        });

        let engine = RestoreEngine::new(Arc::new(runner));
        engine
            .replay(
                &sql,
                &db_info(),
                &MysqlBin::default(),
                "OrigDB",
                "PitrDB",
                Path::new("/var/lib/pitr/instance-1/binlog"),
                &restore_info(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let plan = captured_plan.lock().unwrap().clone().unwrap();
        assert_eq!(plan.rewrite_from, "OrigDB");
        assert_eq!(plan.rewrite_to, "PitrDB");
        assert_eq!(plan.binlog_paths.len(), 2);
    }

    #[tokio::test]
    async fn mode_one_lowercases_source() {
        let sql = mock_lower_case_table_names("1");
        let captured_plan = Arc::new(Mutex::new(None));
        let mut runner = MockProcessRunner::new();
        runner.expect_replay().returning({
            let captured_plan = captured_plan.clone();
            move |_, _, plan, _| {
                *captured_plan.lock().unwrap() = Some(plan.clone());
                Ok(())
            }
        });

        let engine = RestoreEngine::new(Arc::new(runner));
        engine
            .replay(
                &sql,
                &db_info(),
                &MysqlBin::default(),
                "OrigDB",
                "PitrDB",
                Path::new("/var/lib/pitr/instance-1/binlog"),
                &restore_info(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(captured_plan.lock().unwrap().clone().unwrap().rewrite_from, "origdb");
    }

    #[tokio::test]
    async fn mode_two_lowercases_source_too() {
        let sql = mock_lower_case_table_names("2");
        let mut runner = MockProcessRunner::new();
        runner
            .expect_replay()
            .returning(|_, _, _, _| Ok(()));

        let engine = RestoreEngine::new(Arc::new(runner));
        engine
            .replay(
                &sql,
                &db_info(),
                &MysqlBin::default(),
                "OrigDB",
                "PitrDB",
                Path::new("/var/lib/pitr/instance-1/binlog"),
                &restore_info(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unsupported_mode_fails_before_any_process_starts() {
        let sql = mock_lower_case_table_names("7");
        // No expectation configured for `replay`: if the engine called it,
        // this mock would panic, failing the test.
        let runner = MockProcessRunner::new();

        let engine = RestoreEngine::new(Arc::new(runner));
        let err = engine
            .replay(
                &sql,
                &db_info(),
                &MysqlBin::default(),
                "OrigDB",
                "PitrDB",
                Path::new("/var/lib/pitr/instance-1/binlog"),
                &restore_info(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PitrError::Config(_)));
    }

    #[tokio::test]
    async fn restore_base_delegates_to_runner() {
        let mut runner = MockProcessRunner::new();
        runner.expect_restore_base().returning(|_, _, target, _, _| {
            assert_eq!(target, "PitrDB");
            Ok(())
        });

        let engine = RestoreEngine::new(Arc::new(runner));
        engine
            .restore_base(
                &db_info(),
                &MysqlBin::default(),
                "PitrDB",
                Path::new("/var/lib/pitr/instance-1/backup-1/abc.sql"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }
}
