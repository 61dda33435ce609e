//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `matdb_core` linkage and schema bootstrap without a data file.
//! - Keep output deterministic for quick local sanity checks.

use log::info;
use matdb_core::db::migrations::{current_user_version, latest_version};
use matdb_core::{ConfigOverrides, CoreConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = CoreConfig::resolve(ConfigOverrides::default());
    if let Err(err) = config.init_logging() {
        eprintln!("matdb logging disabled: {err}");
    }

    println!("matdb_core ping={}", matdb_core::ping());
    println!("matdb_core version={}", matdb_core::core_version());

    let conn = match config.open_database() {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("matdb database open failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    match current_user_version(&conn) {
        Ok(version) => {
            info!("event=cli_start module=cli status=ok schema_version={version}");
            println!("matdb schema version={version}/{}", latest_version());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("matdb schema check failed: {err}");
            ExitCode::FAILURE
        }
    }
}
