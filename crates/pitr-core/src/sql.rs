//! The SQL query interface the engine is driven through.
//!
//! The engine never assumes a particular SQL client; it is handed anything
//! implementing [`SqlExecutor`]. `pitr-mysql` provides an implementation over
//! `sqlx::Pool<MySql>`; tests provide a `mockall`-generated one.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A loosely-typed column value, enough to decode `SHOW` statement output.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Str(String),
    UInt(u64),
    Null,
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SqlValue::UInt(v) => Some(*v),
            SqlValue::Str(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }
}

/// One result row, keyed by column name.
pub type SqlRow = HashMap<String, SqlValue>;

/// The result of a query: the column names (in server order) and the decoded rows.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<SqlRow>,
}

impl QueryResult {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Abstraction over "run this SQL and give me rows back" that the engine is driven through.
///
/// The `mock` feature (enabled by downstream crates only under
/// `[dev-dependencies]`) generates `MockSqlExecutor` so the engine's branching
/// logic can be exercised without a live server.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn query(&self, sql: &str) -> Result<QueryResult>;
}
