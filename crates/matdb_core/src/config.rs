//! Core runtime configuration.
//!
//! Resolution order for every setting:
//! 1. Explicit value from the caller.
//! 2. Environment variable (`MATDB_DB_PATH`, `MATDB_LOG_LEVEL`, `MATDB_LOG_DIR`).
//! 3. Built-in default (in-memory database, build-mode log level, no file log).
//!
//! Blank values count as unset at every level.

use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::logging::{default_log_level, init_logging};
use rusqlite::Connection;
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "MATDB_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "MATDB_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "MATDB_LOG_DIR";

/// Caller-supplied settings; `None` falls through to env and defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
}

/// Fully resolved core settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// `None` selects an in-memory database.
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// `None` leaves file logging off.
    pub log_dir: Option<PathBuf>,
}

impl CoreConfig {
    /// Resolves settings against the process environment.
    pub fn resolve(explicit: ConfigOverrides) -> Self {
        Self::resolve_with(explicit, |key| std::env::var(key).ok())
    }

    /// Resolves settings against an arbitrary variable lookup.
    pub fn resolve_with(explicit: ConfigOverrides, env: impl Fn(&str) -> Option<String>) -> Self {
        let from_env = |key: &str| env(key).and_then(non_blank);

        let database_path = explicit
            .database_path
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| from_env(ENV_DB_PATH).map(PathBuf::from));
        let log_level = explicit
            .log_level
            .and_then(non_blank)
            .or_else(|| from_env(ENV_LOG_LEVEL))
            .unwrap_or_else(|| default_log_level().to_string());
        let log_dir = explicit
            .log_dir
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| from_env(ENV_LOG_DIR).map(PathBuf::from));

        Self {
            database_path,
            log_level,
            log_dir,
        }
    }

    /// Opens and migrates the configured database.
    pub fn open_database(&self) -> DbResult<Connection> {
        match &self.database_path {
            Some(path) => open_db(path),
            None => open_db_in_memory(),
        }
    }

    /// Starts file logging when a directory is configured.
    ///
    /// Returns `Ok(false)` when no directory is set and logging stays off.
    pub fn init_logging(&self) -> Result<bool, String> {
        let Some(dir) = &self.log_dir else {
            return Ok(false);
        };
        let dir = dir
            .to_str()
            .ok_or_else(|| format!("log directory is not valid UTF-8: {}", dir.display()))?;
        init_logging(&self.log_level, dir).map(|()| true)
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{ConfigOverrides, CoreConfig, ENV_DB_PATH, ENV_LOG_DIR, ENV_LOG_LEVEL};
    use crate::db::migrations::{current_user_version, latest_version};
    use crate::logging::default_log_level;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_explicit_or_env() {
        let config = CoreConfig::resolve_with(ConfigOverrides::default(), env_of(&[]));
        assert_eq!(config.database_path, None);
        assert_eq!(config.log_level, default_log_level());
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn env_fills_unset_values() {
        let config = CoreConfig::resolve_with(
            ConfigOverrides::default(),
            env_of(&[
                (ENV_DB_PATH, "/var/lib/matdb/records.db"),
                (ENV_LOG_LEVEL, "warn"),
                (ENV_LOG_DIR, "/var/log/matdb"),
            ]),
        );
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/matdb/records.db"))
        );
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/matdb")));
    }

    #[test]
    fn explicit_values_win_over_env() {
        let explicit = ConfigOverrides {
            database_path: Some(PathBuf::from("/tmp/explicit.db")),
            log_level: Some("error".to_string()),
            log_dir: None,
        };
        let config = CoreConfig::resolve_with(
            explicit,
            env_of(&[(ENV_DB_PATH, "/tmp/env.db"), (ENV_LOG_LEVEL, "trace")]),
        );
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/explicit.db")));
        assert_eq!(config.log_level, "error");
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let explicit = ConfigOverrides {
            log_level: Some("  ".to_string()),
            ..ConfigOverrides::default()
        };
        let config = CoreConfig::resolve_with(
            explicit,
            env_of(&[(ENV_DB_PATH, "   "), (ENV_LOG_LEVEL, "info")]),
        );
        assert_eq!(config.database_path, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn without_database_path_an_in_memory_db_is_migrated() {
        let config = CoreConfig::resolve_with(ConfigOverrides::default(), env_of(&[]));
        let conn = config.open_database().unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn logging_stays_off_without_directory() {
        let config = CoreConfig::resolve_with(ConfigOverrides::default(), env_of(&[]));
        assert_eq!(config.init_logging(), Ok(false));
    }
}
