//! Override store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist reference preferences and value replacements per record path.
//! - Load a record's overrides partitioned by kind for the resolver.
//!
//! # Invariants
//! - One row per `(record, path, kind)`; saving again replaces the payload
//!   and refreshes `created_at` (last write wins).
//! - Paths are validated and stored in canonical dotted form.
//! - Canonical record tables are never written here.

use super::{table_exists, table_has_column};
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::tree::RecordId;
use crate::overrides::path::{OverridePath, PathError};
use crate::overrides::{OverrideKind, OverrideSet, StoredOverride, ValueReplacement};
use log::info;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const OVERRIDE_COLUMNS: [&str; 6] = [
    "override_id",
    "record_uuid",
    "path",
    "kind",
    "payload",
    "created_at",
];

pub type OverrideRepoResult<T> = Result<T, OverrideRepoError>;

/// Error for override persistence.
#[derive(Debug)]
pub enum OverrideRepoError {
    Db(DbError),
    InvalidPath(PathError),
    /// Overrides can only target stored records.
    RecordNotFound(RecordId),
    /// Stored payload or kind cannot be decoded.
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for OverrideRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidPath(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted override data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "override repository requires schema version {expected_version}, found {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "override repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "override repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for OverrideRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidPath(err) => Some(err),
            Self::RecordNotFound(_)
            | Self::InvalidData(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<DbError> for OverrideRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for OverrideRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<PathError> for OverrideRepoError {
    fn from(value: PathError) -> Self {
        Self::InvalidPath(value)
    }
}

/// Stored payload of a reference preference.
#[derive(Debug, Serialize, Deserialize)]
struct ReferencePayload {
    preferred_ref: String,
}

/// Repository interface for record overrides.
pub trait OverrideRepository {
    /// Upserts the preferred reference for `path`.
    fn save_reference_preference(
        &self,
        record_id: RecordId,
        path: &str,
        reference_id: &str,
    ) -> OverrideRepoResult<()>;
    /// Upserts the replacement value for `path`.
    fn save_value_replacement(
        &self,
        record_id: RecordId,
        path: &str,
        replacement: &ValueReplacement,
    ) -> OverrideRepoResult<()>;
    /// Loads every override of a record; unknown records yield an empty set.
    fn load_overrides(&self, record_id: RecordId) -> OverrideRepoResult<OverrideSet>;
    /// Lists stored rows, newest first.
    fn list_overrides(&self, record_id: RecordId) -> OverrideRepoResult<Vec<StoredOverride>>;
    /// Deletes the overrides of one path, optionally only one kind.
    /// Returns the number of deleted rows.
    fn delete_override(
        &self,
        record_id: RecordId,
        path: &str,
        kind: Option<OverrideKind>,
    ) -> OverrideRepoResult<usize>;
    fn delete_overrides_of_kind(
        &self,
        record_id: RecordId,
        kind: OverrideKind,
    ) -> OverrideRepoResult<usize>;
    fn delete_all_overrides(&self, record_id: RecordId) -> OverrideRepoResult<usize>;
    fn has_overrides(&self, record_id: RecordId) -> OverrideRepoResult<bool>;
}

/// SQLite-backed override store.
pub struct SqliteOverrideRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOverrideRepository<'conn> {
    /// Creates a repository after verifying the connection is migrated.
    pub fn try_new(conn: &'conn Connection) -> OverrideRepoResult<Self> {
        ensure_override_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn upsert(
        &self,
        record_id: RecordId,
        path: &str,
        kind: OverrideKind,
        payload: String,
    ) -> OverrideRepoResult<()> {
        let path = OverridePath::parse(path)?.to_string();
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE record_uuid = ?1);",
            [record_id.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(OverrideRepoError::RecordNotFound(record_id));
        }

        self.conn.execute(
            "INSERT INTO record_overrides (record_uuid, path, kind, payload)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (record_uuid, path, kind) DO UPDATE SET
                payload = excluded.payload,
                created_at = CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER);",
            params![record_id.to_string(), path, kind.as_str(), payload],
        )?;

        info!(
            "event=override_save module=repo status=ok record_id={record_id} kind={kind} path={path}"
        );
        Ok(())
    }
}

impl OverrideRepository for SqliteOverrideRepository<'_> {
    fn save_reference_preference(
        &self,
        record_id: RecordId,
        path: &str,
        reference_id: &str,
    ) -> OverrideRepoResult<()> {
        let payload = encode(&ReferencePayload {
            preferred_ref: reference_id.to_string(),
        })?;
        self.upsert(record_id, path, OverrideKind::ReferencePreference, payload)
    }

    fn save_value_replacement(
        &self,
        record_id: RecordId,
        path: &str,
        replacement: &ValueReplacement,
    ) -> OverrideRepoResult<()> {
        let payload = encode(replacement)?;
        self.upsert(record_id, path, OverrideKind::ValueReplacement, payload)
    }

    fn load_overrides(&self, record_id: RecordId) -> OverrideRepoResult<OverrideSet> {
        let mut stmt = self.conn.prepare(
            "SELECT path, kind, payload
             FROM record_overrides
             WHERE record_uuid = ?1
             ORDER BY path ASC, kind ASC;",
        )?;
        let mut rows = stmt.query([record_id.to_string()])?;

        let mut overrides = OverrideSet::default();
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            let kind = parse_kind(&row.get::<_, String>(1)?)?;
            let payload: String = row.get(2)?;
            match kind {
                OverrideKind::ReferencePreference => {
                    let decoded: ReferencePayload = decode(&payload, &path)?;
                    overrides
                        .reference_preferences
                        .insert(path, decoded.preferred_ref);
                }
                OverrideKind::ValueReplacement => {
                    let decoded: ValueReplacement = decode(&payload, &path)?;
                    overrides.value_replacements.insert(path, decoded);
                }
            }
        }
        Ok(overrides)
    }

    fn list_overrides(&self, record_id: RecordId) -> OverrideRepoResult<Vec<StoredOverride>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_uuid, path, kind, payload, created_at
             FROM record_overrides
             WHERE record_uuid = ?1
             ORDER BY created_at DESC, override_id DESC;",
        )?;
        let mut rows = stmt.query([record_id.to_string()])?;

        let mut stored = Vec::new();
        while let Some(row) = rows.next()? {
            let record_uuid: String = row.get(0)?;
            let path: String = row.get(1)?;
            let payload: String = row.get(3)?;
            stored.push(StoredOverride {
                record_id: Uuid::parse_str(&record_uuid).map_err(|_| {
                    OverrideRepoError::InvalidData(format!(
                        "invalid uuid `{record_uuid}` in record_overrides.record_uuid"
                    ))
                })?,
                kind: parse_kind(&row.get::<_, String>(2)?)?,
                payload: decode(&payload, &path)?,
                created_at: row.get(4)?,
                path,
            });
        }
        Ok(stored)
    }

    fn delete_override(
        &self,
        record_id: RecordId,
        path: &str,
        kind: Option<OverrideKind>,
    ) -> OverrideRepoResult<usize> {
        let path = OverridePath::parse(path)?.to_string();
        let deleted = self.conn.execute(
            "DELETE FROM record_overrides
             WHERE record_uuid = ?1
               AND path = ?2
               AND (?3 IS NULL OR kind = ?3);",
            params![record_id.to_string(), path, kind.map(OverrideKind::as_str)],
        )?;
        log_delete(record_id, "path", deleted);
        Ok(deleted)
    }

    fn delete_overrides_of_kind(
        &self,
        record_id: RecordId,
        kind: OverrideKind,
    ) -> OverrideRepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM record_overrides WHERE record_uuid = ?1 AND kind = ?2;",
            params![record_id.to_string(), kind.as_str()],
        )?;
        log_delete(record_id, kind.as_str(), deleted);
        Ok(deleted)
    }

    fn delete_all_overrides(&self, record_id: RecordId) -> OverrideRepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM record_overrides WHERE record_uuid = ?1;",
            [record_id.to_string()],
        )?;
        log_delete(record_id, "all", deleted);
        Ok(deleted)
    }

    fn has_overrides(&self, record_id: RecordId) -> OverrideRepoResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM record_overrides WHERE record_uuid = ?1);",
            [record_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

fn encode<T: Serialize>(payload: &T) -> OverrideRepoResult<String> {
    serde_json::to_string(payload)
        .map_err(|err| OverrideRepoError::InvalidData(format!("payload encode failed: {err}")))
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &str, path: &str) -> OverrideRepoResult<T> {
    serde_json::from_str(payload).map_err(|err| {
        OverrideRepoError::InvalidData(format!("payload for `{path}` is malformed: {err}"))
    })
}

fn parse_kind(value: &str) -> OverrideRepoResult<OverrideKind> {
    OverrideKind::parse(value).ok_or_else(|| {
        OverrideRepoError::InvalidData(format!("unknown override kind `{value}`"))
    })
}

fn log_delete(record_id: RecordId, scope: &str, deleted: usize) {
    info!(
        "event=override_delete module=repo status=ok record_id={record_id} scope={scope} deleted={deleted}"
    );
}

fn ensure_override_connection_ready(conn: &Connection) -> OverrideRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(OverrideRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "record_overrides")? {
        return Err(OverrideRepoError::MissingRequiredTable("record_overrides"));
    }
    for column in OVERRIDE_COLUMNS {
        if !table_has_column(conn, "record_overrides", column)? {
            return Err(OverrideRepoError::MissingRequiredColumn {
                table: "record_overrides",
                column,
            });
        }
    }

    Ok(())
}
