//! Reference catalog contracts and SQLite implementation.
//!
//! # Responsibility
//! - Store bibliographic references keyed by the id records cite.
//! - Resolve which catalog entries one record cites.
//!
//! # Invariants
//! - One row per reference id; saving again replaces every field (last
//!   write wins) and refreshes `updated_at`.
//! - Catalog rows are independent of records; deleting either side never
//!   cascades into the other.

use super::{table_exists, table_has_column};
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::reference::Reference;
use crate::model::tree::RecordId;
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CATALOG_COLUMNS: [&str; 11] = [
    "ref_id",
    "ref_type",
    "author",
    "title",
    "journal",
    "year",
    "volume",
    "pages",
    "doi",
    "notes",
    "updated_at",
];

const REFERENCE_SELECT_SQL: &str = "SELECT
    ref_id,
    ref_type,
    author,
    title,
    journal,
    year,
    volume,
    pages,
    doi,
    notes
FROM reference_catalog";

// Purely numeric ids first, in numeric order; any other id after them.
const REFERENCE_ORDER_SQL: &str = "ORDER BY
    CASE WHEN ref_id NOT GLOB '*[^0-9]*' THEN 0 ELSE 1 END,
    CAST(ref_id AS INTEGER),
    ref_id";

pub type ReferenceRepoResult<T> = Result<T, ReferenceRepoError>;

/// Error for reference catalog persistence.
#[derive(Debug)]
pub enum ReferenceRepoError {
    Db(DbError),
    /// Reference id is blank after trim.
    BlankId,
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

impl Display for ReferenceRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::BlankId => write!(f, "reference id must not be blank"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "reference repository requires schema version {expected_version}, found {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "reference repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "reference repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for ReferenceRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::BlankId
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<DbError> for ReferenceRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ReferenceRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for the reference catalog.
pub trait ReferenceRepository {
    fn upsert_reference(&self, reference: &Reference) -> ReferenceRepoResult<()>;
    /// Upserts every reference in one transaction; returns how many.
    fn upsert_references(&self, references: &[Reference]) -> ReferenceRepoResult<usize>;
    fn get_reference(&self, id: &str) -> ReferenceRepoResult<Option<Reference>>;
    /// Lists the catalog, numeric ids first in numeric order.
    fn list_references(&self) -> ReferenceRepoResult<Vec<Reference>>;
    /// Catalog entries cited by any entry or parameter of one record.
    fn cited_by_record(&self, record_id: RecordId) -> ReferenceRepoResult<Vec<Reference>>;
    /// Returns whether a row was deleted.
    fn delete_reference(&self, id: &str) -> ReferenceRepoResult<bool>;
}

/// SQLite-backed reference catalog.
pub struct SqliteReferenceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReferenceRepository<'conn> {
    /// Creates a repository after verifying the connection is migrated.
    pub fn try_new(conn: &'conn Connection) -> ReferenceRepoResult<Self> {
        ensure_reference_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ReferenceRepository for SqliteReferenceRepository<'_> {
    fn upsert_reference(&self, reference: &Reference) -> ReferenceRepoResult<()> {
        upsert(self.conn, reference)?;
        info!(
            "event=reference_save module=repo status=ok ref_id={}",
            reference.id.trim()
        );
        Ok(())
    }

    fn upsert_references(&self, references: &[Reference]) -> ReferenceRepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for reference in references {
            upsert(&tx, reference)?;
        }
        tx.commit()?;
        info!(
            "event=reference_import module=repo status=ok count={}",
            references.len()
        );
        Ok(references.len())
    }

    fn get_reference(&self, id: &str) -> ReferenceRepoResult<Option<Reference>> {
        Ok(self
            .conn
            .query_row(
                &format!("{REFERENCE_SELECT_SQL} WHERE ref_id = ?1;"),
                [id.trim()],
                parse_reference_row,
            )
            .optional()?)
    }

    fn list_references(&self) -> ReferenceRepoResult<Vec<Reference>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{REFERENCE_SELECT_SQL} {REFERENCE_ORDER_SQL};"))?;
        let rows = stmt.query_map([], parse_reference_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn cited_by_record(&self, record_id: RecordId) -> ReferenceRepoResult<Vec<Reference>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REFERENCE_SELECT_SQL}
             WHERE ref_id IN (
                SELECT e.ref_id
                FROM attribute_entries e
                JOIN attributes a ON a.attribute_id = e.attribute_id
                JOIN categories c ON c.category_id = a.category_id
                WHERE c.record_uuid = ?1
                UNION
                SELECT p.ref_id
                FROM parameters p
                JOIN subgroups s ON s.subgroup_id = p.subgroup_id
                JOIN model_groups g ON g.group_id = s.group_id
                WHERE g.record_uuid = ?1
             )
             {REFERENCE_ORDER_SQL};"
        ))?;
        let rows = stmt.query_map([record_id.to_string()], parse_reference_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete_reference(&self, id: &str) -> ReferenceRepoResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM reference_catalog WHERE ref_id = ?1;",
            [id.trim()],
        )?;
        info!(
            "event=reference_delete module=repo status=ok ref_id={} deleted={deleted}",
            id.trim()
        );
        Ok(deleted > 0)
    }
}

fn upsert(conn: &Connection, reference: &Reference) -> ReferenceRepoResult<()> {
    let id = reference.id.trim();
    if id.is_empty() {
        return Err(ReferenceRepoError::BlankId);
    }
    conn.execute(
        "INSERT INTO reference_catalog (
            ref_id,
            ref_type,
            author,
            title,
            journal,
            year,
            volume,
            pages,
            doi,
            notes
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT (ref_id) DO UPDATE SET
            ref_type = excluded.ref_type,
            author = excluded.author,
            title = excluded.title,
            journal = excluded.journal,
            year = excluded.year,
            volume = excluded.volume,
            pages = excluded.pages,
            doi = excluded.doi,
            notes = excluded.notes,
            updated_at = CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER);",
        params![
            id,
            reference.kind,
            reference.author,
            reference.title,
            reference.journal,
            reference.year,
            reference.volume,
            reference.pages,
            reference.doi,
            reference.notes,
        ],
    )?;
    Ok(())
}

fn parse_reference_row(row: &Row<'_>) -> rusqlite::Result<Reference> {
    Ok(Reference {
        id: row.get(0)?,
        kind: row.get(1)?,
        author: row.get(2)?,
        title: row.get(3)?,
        journal: row.get(4)?,
        year: row.get(5)?,
        volume: row.get(6)?,
        pages: row.get(7)?,
        doi: row.get(8)?,
        notes: row.get(9)?,
    })
}

fn ensure_reference_connection_ready(conn: &Connection) -> ReferenceRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(ReferenceRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "reference_catalog")? {
        return Err(ReferenceRepoError::MissingRequiredTable("reference_catalog"));
    }
    for column in CATALOG_COLUMNS {
        if !table_has_column(conn, "reference_catalog", column)? {
            return Err(ReferenceRepoError::MissingRequiredColumn {
                table: "reference_catalog",
                column,
            });
        }
    }

    Ok(())
}
