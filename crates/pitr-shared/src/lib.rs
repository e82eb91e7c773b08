//! Ambient infrastructure shared by the PITR engine: configuration and logging bootstrap.

pub mod config;
pub mod observability;

pub use config::*;
pub use observability::*;
