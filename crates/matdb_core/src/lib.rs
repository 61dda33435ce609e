//! Core of the materials record store.
//!
//! Documents are discovered into canonical trees, persisted losslessly in a
//! fixed relational schema, reconstructed on read, and layered with per-user
//! overrides at read time. This crate owns every invariant of that pipeline.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod overrides;
pub mod parser;
pub mod repo;
pub mod service;

pub use config::{ConfigOverrides, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::document::Element;
pub use model::record::RecordSummary;
pub use model::reference::Reference;
pub use model::tree::{
    AttributeNode, Category, DiscoveryTree, Entry, ParamNode, ParamValue, RecordId,
    StructuralError, TableRow,
};
pub use overrides::path::{OverridePath, PathError};
pub use overrides::resolver::{
    effective_value, resolve, resolve_detailed, Resolution, SelectedValue, SkipReason,
    ValueSource, USER_OVERRIDE_REF,
};
pub use overrides::{OverrideKind, OverrideSet, StoredOverride, ValueReplacement};
pub use parser::{
    element_from_xml, parse_document, parse_references, parse_references_xml, parse_xml_str,
    ParseError, ParseResult,
};
pub use repo::override_repo::{
    OverrideRepoError, OverrideRepoResult, OverrideRepository, SqliteOverrideRepository,
};
pub use repo::record_repo::{
    RecordRepoError, RecordRepoResult, RecordRepository, SqliteRecordRepository,
};
pub use repo::reference_repo::{
    ReferenceRepoError, ReferenceRepoResult, ReferenceRepository, SqliteReferenceRepository,
};
pub use service::override_service::{OverrideService, OverrideServiceError};
pub use service::record_service::{RecordService, RecordServiceError};
pub use service::reference_service::{ReferenceService, ReferenceServiceError};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
