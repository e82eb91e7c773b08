//! Deterministic on-disk layout rooted at an injected `BackupPath`.
//!
//! This layout is a contract with the restore engine: a restore reads files
//! written by a past backup, so the derivation here must never change shape
//! without a migration.

use std::path::{Path, PathBuf};

/// Derives the fixed directory layout for one server instance under a shared backup root.
#[derive(Debug, Clone)]
pub struct BackupPath {
    root: PathBuf,
}

impl BackupPath {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<BackupPath>/instance-<instanceId>`
    pub fn instance_root(&self, instance_id: u64) -> PathBuf {
        self.root.join(format!("instance-{instance_id}"))
    }

    /// `<instance root>/binlog`
    pub fn binlog_dir(&self, instance_id: u64) -> PathBuf {
        self.instance_root(instance_id).join("binlog")
    }

    /// `<instance root>/backup-<backupId>`
    pub fn backup_dir(&self, instance_id: u64, backup_id: u64) -> PathBuf {
        self.instance_root(instance_id)
            .join(format!("backup-{backup_id}"))
    }

    /// Creates `binlog_dir(instance_id)` if absent, returning its path.
    pub async fn ensure_binlog_dir(&self, instance_id: u64) -> crate::error::Result<PathBuf> {
        let dir = self.binlog_dir(instance_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Creates `backup_dir(instance_id, backup_id)` if absent, returning its path.
    pub async fn ensure_backup_dir(
        &self,
        instance_id: u64,
        backup_id: u64,
    ) -> crate::error::Result<PathBuf> {
        let dir = self.backup_dir(instance_id, backup_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
