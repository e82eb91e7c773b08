//! `pitr` — convenience façade that re-exports `pitr-core`, `pitr-shared`,
//! and `pitr-mysql`, with no binary target of its own.

#![deny(missing_docs)]

/// Data model, error taxonomy, parsers, and path layout — no I/O.
#[doc(inline)]
pub use pitr_core as core;

/// Configuration and logging bootstrap.
#[doc(inline)]
pub use pitr_shared as shared;

/// The backup/sync/restore engine itself.
#[doc(inline)]
pub use pitr_mysql as mysql;

pub use pitr_core::*;
pub use pitr_mysql::*;
pub use pitr_shared::*;
