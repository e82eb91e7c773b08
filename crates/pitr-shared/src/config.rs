//! Layered configuration for the PITR engine: defaults, then an optional file,
//! then `PITR__`-prefixed environment variables (`__` as the nesting separator).

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pitr_core::model::DbType;

/// Paths to the vendor tools used for one DB flavor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlBin {
    pub mysql_path: String,
    pub mysqldump_path: String,
    pub mysqlbinlog_path: String,
}

impl Default for MysqlBin {
    fn default() -> Self {
        Self {
            mysql_path: "mysql".to_string(),
            mysqldump_path: "mysqldump".to_string(),
            mysqlbinlog_path: "mysqlbinlog".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// trace, debug, info, warn, error
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Top-level settings object for a PITR deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitrSettings {
    /// Root directory under which every instance's backups and binlogs live.
    pub backup_path: PathBuf,
    pub pool: PoolSettings,
    /// Resolved tool paths, keyed by DB flavor. Missing entries fall back to
    /// [`MysqlBin::default`] (bare names resolved via `PATH`).
    pub tools: HashMap<String, MysqlBin>,
    pub logging: LoggingSettings,
}

impl Default for PitrSettings {
    fn default() -> Self {
        let mut tools = HashMap::new();
        tools.insert("mysql".to_string(), MysqlBin::default());
        tools.insert("mariadb".to_string(), MysqlBin::default());
        Self {
            backup_path: PathBuf::from("/var/lib/pitr"),
            pool: PoolSettings::default(),
            tools,
            logging: LoggingSettings::default(),
        }
    }
}

impl PitrSettings {
    /// Look up the tool paths for a DB flavor.
    pub fn mysql_bin(&self, db_type: DbType) -> Option<&MysqlBin> {
        let key = match db_type {
            DbType::MySql => "mysql",
            DbType::MariaDb => "mariadb",
        };
        self.tools.get(key)
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("pitr.toml")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&PitrSettings::default())?)
            .add_source(Environment::with_prefix("PITR").separator("__"));

        if path.as_ref().exists() {
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder.build()?.try_deserialize()
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&PitrSettings::default())?)
            .add_source(Environment::with_prefix("PITR").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_resolve_bare_tool_names() {
        let settings = PitrSettings::default();
        let bin = settings.mysql_bin(DbType::MySql).unwrap();
        assert_eq!(bin.mysql_path, "mysql");
        assert_eq!(bin.mysqldump_path, "mysqldump");
        assert_eq!(bin.mysqlbinlog_path, "mysqlbinlog");
    }

    #[test]
    fn settings_round_trip_through_json() {
        let settings = PitrSettings::default();
        let serialized = serde_json::to_string(&settings).unwrap();
        let deserialized: PitrSettings = serde_json::from_str(&serialized).unwrap();
        assert_eq!(settings.pool.max_connections, deserialized.pool.max_connections);
    }
}
