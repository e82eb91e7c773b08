//! The process-runner surface the rest of the engine is driven through.
//!
//! Each method corresponds to one `mysql`/`mysqldump`/`mysqlbinlog`
//! invocation shape from the component design, rather than exposing raw
//! [`tokio::process::Command`] plumbing — that keeps the trait mockable so
//! the branching logic in [`crate::sync`], [`crate::backup`], and
//! [`crate::restore`] can be exercised without real binaries.
//!
//! The exact flag sequences themselves are built by plain, non-async
//! functions returning [`CommandSpec`] below, so the command-line shape for
//! each tool invocation can be asserted on directly without spawning a child
//! process.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use pitr_core::error::{PitrError, Result};
use pitr_core::model::DbInfo;
use pitr_shared::config::MysqlBin;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::process::{run_inherited, run_piped, StreamingChild};

/// A fully-resolved replay plan: the rewrite mapping and span to apply, plus
/// the local binlog files covering it in ascending, contiguous `sequence` order.
#[derive(Debug, Clone)]
pub struct ReplayPlan {
    pub target_db: String,
    pub rewrite_from: String,
    pub rewrite_to: String,
    pub start_position: i64,
    pub target_position: i64,
    pub binlog_paths: Vec<PathBuf>,
}

#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// `mysqlbinlog --read-from-remote-server --raw` into `<binlog_dir>/tmp-<file_name>`.
    async fn fetch_remote_binlog(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        binlog_dir: &Path,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Local decode of `path`; returns the timestamp of its first real event.
    async fn first_event_time(
        &self,
        bin: &MysqlBin,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DateTime<Local>>;

    /// Local decode of `paths` seeking the first event at or after `target_time`.
    async fn event_position_at_or_after(
        &self,
        bin: &MysqlBin,
        paths: &[PathBuf],
        target_time: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> Result<i64>;

    /// `mysqldump --single-transaction --master-data=2 --databases <db_name>` into `dest`.
    async fn dump(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        db_name: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Pipes `dump_path` into `mysql --database <target_db>`.
    async fn restore_base(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        target_db: &str,
        dump_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Pipes `mysqlbinlog ... | mysql ...` per `plan`.
    async fn replay(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        plan: &ReplayPlan,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// The real [`ProcessRunner`], spawning actual `mysql`/`mysqldump`/`mysqlbinlog` children.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

fn format_start_datetime(time: DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A spawn-free description of a child-process invocation: the program, its
/// arguments in order, and the environment variables set on top of the
/// parent's. Kept separate from [`tokio::process::Command`] so the exact
/// flag sequence each tool is invoked with can be asserted on in a plain
/// unit test, without spawning anything.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CommandSpec {
    fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn into_command(self) -> Command {
        let mut command = Command::new(self.program);
        command.args(self.args);
        for (key, value) in self.envs {
            command.env(key, value);
        }
        command
    }
}

/// `mysqlbinlog --read-from-remote-server --raw --result-file <binlog_dir>/tmp- <file_name>`.
///
/// Never passes the password as a CLI flag: `mysqlbinlog` emits a "password
/// on command line" warning on stderr that would otherwise pollute error
/// text, so the password is supplied via `MYSQL_PWD` instead.
fn fetch_remote_binlog_command(
    db: &DbInfo,
    bin: &MysqlBin,
    binlog_dir: &Path,
    file_name: &str,
) -> CommandSpec {
    let prefix = binlog_dir.join("tmp-");
    CommandSpec::new(&bin.mysqlbinlog_path)
        .env("MYSQL_PWD", &db.password)
        .arg("--read-from-remote-server")
        .arg("--verify-binlog-checksum")
        .arg("--raw")
        .arg(format!("--host={}", db.host))
        .arg(format!("--port={}", db.port))
        .arg(format!("--user={}", db.username))
        .arg("--result-file")
        .arg(path_arg(&prefix))
        .arg(file_name)
}

/// Plain `mysqlbinlog <path>`, decoding the local file's events to text.
fn first_event_time_command(bin: &MysqlBin, path: &Path) -> CommandSpec {
    CommandSpec::new(&bin.mysqlbinlog_path).arg(path_arg(path))
}

/// `mysqlbinlog --base64-output=DECODE-ROWS --start-datetime <time> <paths...>`.
fn event_position_command(bin: &MysqlBin, paths: &[PathBuf], target_time: DateTime<Local>) -> CommandSpec {
    let mut spec = CommandSpec::new(&bin.mysqlbinlog_path)
        .arg("--base64-output=DECODE-ROWS")
        .arg("--start-datetime")
        .arg(format_start_datetime(target_time));
    for path in paths {
        spec = spec.arg(path_arg(path));
    }
    spec
}

/// `mysqldump --host --port --user --password=<pw> --add-drop-database
/// --result-file <dest> --single-transaction --master-data=2 --databases <db_name>`.
fn dump_command(db: &DbInfo, bin: &MysqlBin, db_name: &str, dest: &Path) -> CommandSpec {
    CommandSpec::new(&bin.mysqldump_path)
        .arg(format!("--host={}", db.host))
        .arg(format!("--port={}", db.port))
        .arg(format!("--user={}", db.username))
        .arg(format!("--password={}", db.password))
        .arg("--add-drop-database")
        .arg("--result-file")
        .arg(path_arg(dest))
        .arg("--single-transaction")
        .arg("--master-data=2")
        .arg("--databases")
        .arg(db_name)
}

/// `mysql --host --port --database <target_db> --user --password=<pw>`, fed the dump file on stdin.
fn restore_base_command(db: &DbInfo, bin: &MysqlBin, target_db: &str) -> CommandSpec {
    CommandSpec::new(&bin.mysql_path)
        .arg(format!("--host={}", db.host))
        .arg(format!("--port={}", db.port))
        .arg("--database")
        .arg(target_db)
        .arg(format!("--user={}", db.username))
        .arg(format!("--password={}", db.password))
}

/// `mysqlbinlog --verify-binlog-checksum --disable-log-bin --rewrite-db=<from>-><to>
/// --database=<target> --start-position=<S> --stop-position=<T> <paths...>`.
fn replay_producer_command(bin: &MysqlBin, plan: &ReplayPlan) -> CommandSpec {
    let mut spec = CommandSpec::new(&bin.mysqlbinlog_path)
        .arg("--verify-binlog-checksum")
        .arg("--disable-log-bin")
        .arg(format!(
            "--rewrite-db={}->{}",
            plan.rewrite_from, plan.rewrite_to
        ))
        .arg(format!("--database={}", plan.target_db))
        .arg(format!("--start-position={}", plan.start_position))
        .arg(format!("--stop-position={}", plan.target_position));
    for path in &plan.binlog_paths {
        spec = spec.arg(path_arg(path));
    }
    spec
}

/// `mysql --host --port --user [--password=<pw>]`, the `--password` flag
/// omitted entirely when `db.password` is empty.
fn replay_consumer_command(db: &DbInfo, bin: &MysqlBin) -> CommandSpec {
    let mut spec = CommandSpec::new(&bin.mysql_path)
        .arg(format!("--host={}", db.host))
        .arg(format!("--port={}", db.port))
        .arg(format!("--user={}", db.username));
    if !db.password.is_empty() {
        spec = spec.arg(format!("--password={}", db.password));
    }
    spec
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    #[instrument(skip(self, db, bin, cancel))]
    async fn fetch_remote_binlog(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        binlog_dir: &Path,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(host = %db.host, "fetching remote binlog");
        let command = fetch_remote_binlog_command(db, bin, binlog_dir, file_name).into_command();
        run_inherited(command, cancel).await
    }

    async fn first_event_time(
        &self,
        bin: &MysqlBin,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DateTime<Local>> {
        let command = first_event_time_command(bin, path).into_command();
        let mut child = StreamingChild::spawn(command, cancel.clone())?;

        let mut found = None;
        while let Some(line) = child.next_line().await? {
            if let Some(time) = pitr_core::parser::parse_event_time_line(&line)? {
                found = Some(time);
                break;
            }
        }
        child.kill_and_discard().await;

        found.ok_or_else(|| PitrError::Parse(format!("no event-time line found in {path:?}")))
    }

    async fn event_position_at_or_after(
        &self,
        bin: &MysqlBin,
        paths: &[PathBuf],
        target_time: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let command = event_position_command(bin, paths, target_time).into_command();
        let mut child = StreamingChild::spawn(command, cancel.clone())?;

        let mut lines = Vec::new();
        while let Some(line) = child.next_line().await? {
            lines.push(line);
        }
        child.finish(None).await?;

        pitr_core::parser::binlog_event_position_at_or_after_time(lines, target_time)
    }

    #[instrument(skip(self, db, bin, cancel))]
    async fn dump(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        db_name: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(host = %db.host, dest = ?dest, "running mysqldump");
        let command = dump_command(db, bin, db_name, dest).into_command();
        run_inherited(command, cancel).await
    }

    async fn restore_base(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        target_db: &str,
        dump_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let dump_file = tokio::fs::File::open(dump_path)
            .await
            .map_err(|e| PitrError::FileSystem(format!("open {dump_path:?}: {e}")))?
            .into_std()
            .await;

        let mut command = restore_base_command(db, bin, target_db).into_command();
        command.stdin(Stdio::from(dump_file));
        run_inherited(command, cancel).await
    }

    #[instrument(skip(self, db, bin, plan, cancel), fields(target_db = %plan.target_db))]
    async fn replay(
        &self,
        db: &DbInfo,
        bin: &MysqlBin,
        plan: &ReplayPlan,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(
            binlog_count = plan.binlog_paths.len(),
            start = plan.start_position,
            stop = plan.target_position,
            "replaying binlogs into mysql"
        );
        let producer = replay_producer_command(bin, plan).into_command();
        let consumer = replay_consumer_command(db, bin).into_command();
        run_piped(producer, consumer, cancel).await
    }
}
