//! MySQL/MariaDB backup, binlog sync, and point-in-time restore engine.
//!
//! Built around a small set of injected seams — [`pitr_core::sql::SqlExecutor`]
//! and [`runner::ProcessRunner`] — so the engine's branching logic is testable
//! without a live server or real `mysql*` binaries.

pub mod backup;
pub mod process;
pub mod program;
pub mod restore;
pub mod runner;
pub mod server;
pub mod singleflight;
pub mod sync;

pub use backup::{run_backup, BackupResult};
pub use program::DbProgram;
pub use restore::RestoreEngine;
pub use runner::{ProcessRunner, ReplayPlan, TokioProcessRunner};
pub use server::SqlxExecutor;
pub use singleflight::Singleflight;
pub use sync::{RoundResult, SyncEngine};
