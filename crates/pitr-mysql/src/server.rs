//! Server metadata client: `SHOW BINARY LOGS` / `SHOW VARIABLES LIKE …` through
//! an injected [`SqlExecutor`], plus a `sqlx::Pool<MySql>`-backed implementation
//! of that trait.

use async_trait::async_trait;
use pitr_core::binlog_name::parse_binlog_name;
use pitr_core::error::{PitrError, Result};
use pitr_core::model::BinlogFile;
use pitr_core::sql::{QueryResult, SqlExecutor, SqlRow, SqlValue};
use sqlx::mysql::MySql;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::HashMap;

/// [`SqlExecutor`] backed by a live `sqlx::Pool<MySql>`.
pub struct SqlxExecutor {
    pool: sqlx::Pool<MySql>,
}

impl SqlxExecutor {
    pub fn new(pool: sqlx::Pool<MySql>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::Pool<MySql> {
        &self.pool
    }
}

#[async_trait]
impl SqlExecutor for SqlxExecutor {
    async fn query(&self, sql: &str) -> Result<QueryResult> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PitrError::ServerQuery(e.to_string()))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut decoded_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut decoded: SqlRow = HashMap::new();
            for col in row.columns() {
                let raw = row
                    .try_get_raw(col.ordinal())
                    .map_err(|e| PitrError::ServerQuery(e.to_string()))?;
                decoded.insert(col.name().to_string(), decode_value(raw)?);
            }
            decoded_rows.push(decoded);
        }

        Ok(QueryResult {
            columns,
            rows: decoded_rows,
        })
    }
}

fn decode_value(raw: sqlx::mysql::MySqlValueRef<'_>) -> Result<SqlValue> {
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let owned = ValueRef::to_owned(&raw);
    let is_integer = matches!(
        type_name.as_str(),
        "TINYINT"
            | "SMALLINT"
            | "MEDIUMINT"
            | "INT"
            | "BIGINT"
            | "TINYINT UNSIGNED"
            | "SMALLINT UNSIGNED"
            | "MEDIUMINT UNSIGNED"
            | "INT UNSIGNED"
            | "BIGINT UNSIGNED"
    );
    if is_integer {
        let value: i64 = sqlx::Decode::<MySql>::decode(owned.as_ref())
            .map_err(|e| PitrError::ServerQuery(format!("decode {type_name} failed: {e}")))?;
        return Ok(SqlValue::UInt(value as u64));
    }
    let value: String = sqlx::Decode::<MySql>::decode(owned.as_ref())
        .map_err(|e| PitrError::ServerQuery(format!("decode {type_name} as string failed: {e}")))?;
    Ok(SqlValue::Str(value))
}

/// Runs `SHOW BINARY LOGS` and returns the files sorted ascending by sequence.
///
/// Requires both `Log_name` and `File_size` columns; a row missing either, or
/// whose name does not parse as `<base>.<seq>`, is a parse failure.
pub async fn sorted_binlog_files_on_server(sql: &dyn SqlExecutor) -> Result<Vec<BinlogFile>> {
    let result = sql.query("SHOW BINARY LOGS").await?;
    if !result.has_column("Log_name") || !result.has_column("File_size") {
        return Err(PitrError::ServerQuery(
            "SHOW BINARY LOGS did not return Log_name and File_size columns".to_string(),
        ));
    }

    let mut files = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let name = row
            .get("Log_name")
            .and_then(SqlValue::as_str)
            .ok_or_else(|| {
                PitrError::ServerQuery("Log_name column is not a string".to_string())
            })?;
        let size = row
            .get("File_size")
            .and_then(SqlValue::as_u64)
            .ok_or_else(|| {
                PitrError::ServerQuery("File_size column is not numeric".to_string())
            })?;
        let parsed = parse_binlog_name(name)?;
        files.push(BinlogFile::new(name, parsed.sequence, size as i64));
    }

    files.sort_by_key(|f| f.sequence);
    Ok(files)
}

/// Runs `SHOW VARIABLES LIKE '<name>'` and returns its `Value`.
///
/// Exactly one row whose `Variable_name` equals `name` is expected; zero rows
/// is a "no such variable" error.
pub async fn server_variable(sql: &dyn SqlExecutor, name: &str) -> Result<String> {
    let escaped = name.replace('\'', "''");
    let result = sql
        .query(&format!("SHOW VARIABLES LIKE '{escaped}'"))
        .await?;

    for row in &result.rows {
        let var_name = row.get("Variable_name").and_then(SqlValue::as_str);
        if var_name == Some(name) {
            return row
                .get("Value")
                .and_then(SqlValue::as_str)
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    PitrError::ServerQuery(format!("variable {name} has no Value column"))
                });
        }
    }

    Err(PitrError::ServerQuery(format!("no such variable: {name}")))
}

/// Requires `log_bin = ON` (case-insensitive).
pub async fn check_binlog_enabled(sql: &dyn SqlExecutor) -> Result<()> {
    let value = server_variable(sql, "log_bin").await?;
    if value.eq_ignore_ascii_case("on") {
        Ok(())
    } else {
        Err(PitrError::Config(format!(
            "binary logging is disabled on the server (log_bin = {value})"
        )))
    }
}

/// Requires `binlog_format = ROW` (case-insensitive).
pub async fn check_binlog_row_format(sql: &dyn SqlExecutor) -> Result<()> {
    let value = server_variable(sql, "binlog_format").await?;
    if value.eq_ignore_ascii_case("row") {
        Ok(())
    } else {
        Err(PitrError::Config(format!(
            "binlog_format must be ROW, server reports {value}"
        )))
    }
}
