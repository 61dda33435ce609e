//! Record repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Ingest discovery trees into the fixed record schema, atomically.
//! - Additively extend stored records with new categories, groups,
//!   attributes, and parameters, anywhere in a group's structure.
//! - Reconstruct trees and list record summaries.
//!
//! # Invariants
//! - Every write runs in one `IMMEDIATE` transaction; any failure rolls the
//!   whole call back.
//! - Category and group names are unique per record; re-inserting one is
//!   rejected before any row is written.
//! - Unknown record ids are `RecordNotFound`, never an empty tree.
//! - An addition a legacy layout cannot hold moves that one group or
//!   category to the nested layout inside the same transaction.

use super::layout::{LAYOUT_LEGACY, LEGACY_PHASE_CATEGORY};
use super::reader::{read_category, read_group, read_tree};
use super::writer::{
    ensure_name, insert_attribute, insert_category, insert_group, insert_record_row,
    rewrite_category, rewrite_group,
};
use super::{table_exists, table_has_column};
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::record::RecordSummary;
use crate::model::tree::{
    AttributeNode, Category, DiscoveryTree, ParamNode, RecordId, StructuralError,
};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

const RECORD_SELECT_SQL: &str = "SELECT
    record_uuid,
    identifier,
    name,
    author,
    record_date,
    version,
    version_meaning,
    created_at
FROM records";

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[
    (
        "records",
        &["record_uuid", "identifier", "name", "metadata_json"],
    ),
    ("categories", &["category_id", "record_uuid", "name", "storage_layout"]),
    ("attributes", &["attribute_id", "category_id", "name", "unit"]),
    (
        "attribute_entries",
        &["entry_id", "attribute_id", "value", "ref_id", "ordinal"],
    ),
    ("model_groups", &["group_id", "record_uuid", "name", "storage_layout"]),
    (
        "subgroups",
        &[
            "subgroup_id",
            "group_id",
            "parent_subgroup_id",
            "name",
            "slot_name",
            "row_index",
        ],
    ),
    (
        "parameters",
        &[
            "parameter_id",
            "subgroup_id",
            "name",
            "value",
            "unit",
            "ref_id",
            "ordinal",
        ],
    ),
];

pub type RecordRepoResult<T> = Result<T, RecordRepoError>;

/// Error for record persistence and reconstruction.
#[derive(Debug)]
pub enum RecordRepoError {
    /// Connection or statement failure outside a node write.
    Db(DbError),
    /// Tree violates a shape the schema can store.
    Structural(StructuralError),
    /// Target record does not exist.
    RecordNotFound(RecordId),
    /// Record id is already taken.
    RecordAlreadyExists(RecordId),
    /// Category, group, attribute, parameter, or identifier already exists.
    DuplicateName { path: String },
    /// Addition target does not exist in the stored record.
    UnknownTarget { path: String },
    /// Storage failed while writing the node at `path`.
    WriteFailed { path: String, source: DbError },
    /// Stored rows cannot be reconstructed into a tree.
    InvalidData(String),
    /// Connection has not been migrated to the latest schema.
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

impl Display for RecordRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Structural(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::RecordAlreadyExists(id) => write!(f, "record already exists: {id}"),
            Self::DuplicateName { path } => write!(f, "`{path}` already exists"),
            Self::UnknownTarget { path } => write!(f, "`{path}` does not exist"),
            Self::WriteFailed { path, source } => {
                write!(f, "failed to write `{path}`: {source}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "record repository requires schema version {expected_version}, found {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "record repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "record repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RecordRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Structural(err) => Some(err),
            Self::WriteFailed { source, .. } => Some(source),
            Self::RecordNotFound(_)
            | Self::RecordAlreadyExists(_)
            | Self::DuplicateName { .. }
            | Self::UnknownTarget { .. }
            | Self::InvalidData(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<DbError> for RecordRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RecordRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<StructuralError> for RecordRepoError {
    fn from(value: StructuralError) -> Self {
        Self::Structural(value)
    }
}

/// Repository interface for stored records.
pub trait RecordRepository {
    /// Writes a complete tree under `record_id` in one transaction.
    fn ingest_record(&self, record_id: RecordId, tree: &DiscoveryTree) -> RecordRepoResult<()>;
    /// Writes a complete tree under a fresh record id.
    fn create_record(&self, tree: &DiscoveryTree) -> RecordRepoResult<RecordId>;
    /// Adds the categories and groups of `tree` to an existing record.
    ///
    /// Metadata of `tree` is ignored.
    fn extend_record(&self, record_id: RecordId, tree: &DiscoveryTree) -> RecordRepoResult<()>;
    /// Adds one attribute, creating its category when missing.
    fn add_attribute(
        &self,
        record_id: RecordId,
        category: &str,
        name: &str,
        node: &AttributeNode,
    ) -> RecordRepoResult<()>;
    /// Adds one parameter under `target`.
    ///
    /// `target` is a group name followed by optional dotted steps: member
    /// keys, and row indices inside tables (`EOSModel.2.reacted`). A bare
    /// group name that is not stored yet creates the group.
    fn add_parameter(
        &self,
        record_id: RecordId,
        target: &str,
        name: &str,
        node: &ParamNode,
    ) -> RecordRepoResult<()>;
    fn load_tree(&self, record_id: RecordId) -> RecordRepoResult<DiscoveryTree>;
    fn get_summary(&self, record_id: RecordId) -> RecordRepoResult<RecordSummary>;
    fn find_by_identifier(&self, identifier: &str) -> RecordRepoResult<Option<RecordSummary>>;
    /// Lists records ordered by name.
    fn list_records(&self) -> RecordRepoResult<Vec<RecordSummary>>;
    /// Deletes a record with every canonical row and override it owns.
    fn delete_record(&self, record_id: RecordId) -> RecordRepoResult<()>;
}

/// SQLite-backed record repository.
pub struct SqliteRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordRepository<'conn> {
    /// Creates a repository after verifying the connection is migrated.
    ///
    /// # Errors
    /// - `UninitializedConnection` when `PRAGMA user_version` is not latest.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` on schema drift.
    pub fn try_new(conn: &'conn Connection) -> RecordRepoResult<Self> {
        ensure_record_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn begin(&self) -> RecordRepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn ingest_record(&self, record_id: RecordId, tree: &DiscoveryTree) -> RecordRepoResult<()> {
        let started_at = Instant::now();
        let result = self.ingest_in_transaction(record_id, tree);
        log_write("record_ingest", record_id, started_at, &result, || {
            format!(
                "categories={} groups={}",
                tree.properties.len(),
                tree.models.len()
            )
        });
        result
    }

    fn create_record(&self, tree: &DiscoveryTree) -> RecordRepoResult<RecordId> {
        let record_id = Uuid::new_v4();
        self.ingest_record(record_id, tree)?;
        Ok(record_id)
    }

    fn extend_record(&self, record_id: RecordId, tree: &DiscoveryTree) -> RecordRepoResult<()> {
        let started_at = Instant::now();
        let result = self.extend_in_transaction(record_id, tree);
        log_write("record_extend", record_id, started_at, &result, || {
            format!(
                "categories={} groups={}",
                tree.properties.len(),
                tree.models.len()
            )
        });
        result
    }

    fn add_attribute(
        &self,
        record_id: RecordId,
        category: &str,
        name: &str,
        node: &AttributeNode,
    ) -> RecordRepoResult<()> {
        let started_at = Instant::now();
        let result = self.add_attribute_in_transaction(record_id, category, name, node);
        log_write("record_add_attribute", record_id, started_at, &result, || {
            format!("category={category} attribute={name}")
        });
        result
    }

    fn add_parameter(
        &self,
        record_id: RecordId,
        target: &str,
        name: &str,
        node: &ParamNode,
    ) -> RecordRepoResult<()> {
        let started_at = Instant::now();
        let result = self.add_parameter_in_transaction(record_id, target, name, node);
        log_write("record_add_parameter", record_id, started_at, &result, || {
            format!("target={target} parameter={name}")
        });
        result
    }

    fn load_tree(&self, record_id: RecordId) -> RecordRepoResult<DiscoveryTree> {
        // Deferred transaction gives the multi-statement read one snapshot.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let tree = read_tree(&tx, record_id)?;
        tx.commit()?;
        Ok(tree)
    }

    fn get_summary(&self, record_id: RecordId) -> RecordRepoResult<RecordSummary> {
        self.conn
            .query_row(
                &format!("{RECORD_SELECT_SQL} WHERE record_uuid = ?1;"),
                [record_id.to_string()],
                parse_summary_row,
            )
            .optional()?
            .ok_or(RecordRepoError::RecordNotFound(record_id))?
    }

    fn find_by_identifier(&self, identifier: &str) -> RecordRepoResult<Option<RecordSummary>> {
        self.conn
            .query_row(
                &format!("{RECORD_SELECT_SQL} WHERE identifier = ?1;"),
                [identifier],
                parse_summary_row,
            )
            .optional()?
            .transpose()
    }

    fn list_records(&self) -> RecordRepoResult<Vec<RecordSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL} ORDER BY name ASC, identifier ASC;"
        ))?;
        let rows = stmt.query_map([], parse_summary_row)?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row??);
        }
        Ok(summaries)
    }

    fn delete_record(&self, record_id: RecordId) -> RecordRepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM records WHERE record_uuid = ?1;",
            [record_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RecordRepoError::RecordNotFound(record_id));
        }
        info!("event=record_delete module=repo status=ok record_id={record_id}");
        Ok(())
    }
}

impl SqliteRecordRepository<'_> {
    fn ingest_in_transaction(
        &self,
        record_id: RecordId,
        tree: &DiscoveryTree,
    ) -> RecordRepoResult<()> {
        let tx = self.begin()?;
        if record_exists(&tx, record_id)? {
            return Err(RecordRepoError::RecordAlreadyExists(record_id));
        }
        if let Some(identifier) = tree.identifier() {
            if identifier_exists(&tx, identifier)? {
                return Err(RecordRepoError::DuplicateName {
                    path: "metadata.id".to_string(),
                });
            }
        }

        insert_record_row(&tx, record_id, tree)?;
        write_categories_and_groups(&tx, record_id, tree)?;
        tx.commit()?;
        Ok(())
    }

    fn extend_in_transaction(
        &self,
        record_id: RecordId,
        tree: &DiscoveryTree,
    ) -> RecordRepoResult<()> {
        let tx = self.begin()?;
        ensure_record_exists(&tx, record_id)?;

        for name in tree.properties.keys() {
            if find_category(&tx, record_id, name)?.is_some() {
                return Err(RecordRepoError::DuplicateName {
                    path: format!("properties.{name}"),
                });
            }
        }
        for name in tree.models.keys() {
            if find_group(&tx, record_id, name)?.is_some() {
                return Err(RecordRepoError::DuplicateName {
                    path: format!("models.{name}"),
                });
            }
        }

        write_categories_and_groups(&tx, record_id, tree)?;
        tx.commit()?;
        Ok(())
    }

    fn add_attribute_in_transaction(
        &self,
        record_id: RecordId,
        category: &str,
        name: &str,
        node: &AttributeNode,
    ) -> RecordRepoResult<()> {
        let category_path = format!("properties.{category}");
        let path = format!("{category_path}.{name}");
        ensure_name(&category_path, category)?;
        ensure_name(&path, name)?;

        let tx = self.begin()?;
        ensure_record_exists(&tx, record_id)?;

        let Some((category_id, layout)) = find_category_layout(&tx, record_id, category)? else {
            let created = Category::from([(name.to_string(), node.clone())]);
            insert_category(&tx, record_id, category, &created)?;
            tx.commit()?;
            return Ok(());
        };
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM attributes WHERE category_id = ?1 AND name = ?2);",
            params![category_id, name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(RecordRepoError::DuplicateName { path });
        }

        let legacy_phase = layout == LAYOUT_LEGACY && category == LEGACY_PHASE_CATEGORY;
        if legacy_phase && !matches!(node, AttributeNode::Scalar { .. }) {
            let mut stored = read_category(&tx, category_id, category, &layout)?;
            stored.insert(name.to_string(), node.clone());
            rewrite_category(&tx, category_id, category, &stored)?;
        } else {
            insert_attribute(&tx, category_id, &path, name, node)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn add_parameter_in_transaction(
        &self,
        record_id: RecordId,
        target: &str,
        name: &str,
        node: &ParamNode,
    ) -> RecordRepoResult<()> {
        let mut steps = target.split('.');
        let group = steps.next().unwrap_or_default();
        let steps: Vec<&str> = steps.collect();
        let group_path = format!("models.{group}");
        let target_path = format!("models.{target}");
        let path = format!("{target_path}.{name}");
        ensure_name(&group_path, group)?;
        ensure_name(&path, name)?;

        let tx = self.begin()?;
        ensure_record_exists(&tx, record_id)?;

        let Some((group_id, layout)) = find_group(&tx, record_id, group)? else {
            if !steps.is_empty() {
                return Err(RecordRepoError::UnknownTarget { path: group_path });
            }
            let root = ParamNode::Map(BTreeMap::from([(name.to_string(), node.clone())]));
            insert_group(&tx, record_id, group, &root)?;
            tx.commit()?;
            return Ok(());
        };

        let mut stored = read_group(&tx, group_id, group, &layout)?;
        let members = target_members(&mut stored, &steps, &target_path)?;
        if members.contains_key(name) {
            return Err(RecordRepoError::DuplicateName { path });
        }
        members.insert(name.to_string(), node.clone());

        rewrite_group(&tx, group_id, group, &stored)?;
        tx.commit()?;
        Ok(())
    }
}

/// Walks `steps` from a group root to the member map they address.
///
/// Map steps are member keys; table steps are row indices.
fn target_members<'a>(
    node: &'a mut ParamNode,
    steps: &[&str],
    path: &str,
) -> RecordRepoResult<&'a mut BTreeMap<String, ParamNode>> {
    let (child, rest) = match node {
        ParamNode::Map(members) => match steps.split_first() {
            None => return Ok(members),
            Some((key, rest)) => (members.get_mut(*key), rest),
        },
        ParamNode::Rows(rows) => {
            let Some((index, rest)) = steps.split_first() else {
                return Err(StructuralError::new(
                    path,
                    "tables take parameters per row; address a row by its index",
                )
                .into());
            };
            let row = index
                .parse::<u32>()
                .ok()
                .and_then(|index| rows.iter_mut().find(|row| row.index == index))
                .ok_or_else(|| RecordRepoError::UnknownTarget {
                    path: path.to_string(),
                })?;
            match rest.split_first() {
                None => return Ok(&mut row.params),
                Some((key, rest)) => (row.params.get_mut(*key), rest),
            }
        }
        ParamNode::Scalar(_) | ParamNode::List(_) => {
            return Err(StructuralError::new(path, "a leaf value cannot hold parameters").into())
        }
    };
    let child = child.ok_or_else(|| RecordRepoError::UnknownTarget {
        path: path.to_string(),
    })?;
    target_members(child, rest, path)
}

fn write_categories_and_groups(
    conn: &Connection,
    record_id: RecordId,
    tree: &DiscoveryTree,
) -> RecordRepoResult<()> {
    for (name, category) in &tree.properties {
        insert_category(conn, record_id, name, category)?;
    }
    for (name, node) in &tree.models {
        insert_group(conn, record_id, name, node)?;
    }
    Ok(())
}

fn record_exists(conn: &Connection, record_id: RecordId) -> RecordRepoResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE record_uuid = ?1);",
        [record_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn ensure_record_exists(conn: &Connection, record_id: RecordId) -> RecordRepoResult<()> {
    if record_exists(conn, record_id)? {
        return Ok(());
    }
    Err(RecordRepoError::RecordNotFound(record_id))
}

fn identifier_exists(conn: &Connection, identifier: &str) -> RecordRepoResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE identifier = ?1);",
        [identifier],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn find_category(
    conn: &Connection,
    record_id: RecordId,
    name: &str,
) -> RecordRepoResult<Option<i64>> {
    Ok(find_category_layout(conn, record_id, name)?.map(|(category_id, _)| category_id))
}

/// Returns `(category_id, storage_layout)` of a stored category.
fn find_category_layout(
    conn: &Connection,
    record_id: RecordId,
    name: &str,
) -> RecordRepoResult<Option<(i64, String)>> {
    Ok(conn
        .query_row(
            "SELECT category_id, storage_layout
             FROM categories
             WHERE record_uuid = ?1 AND name = ?2;",
            params![record_id.to_string(), name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

/// Returns `(group_id, storage_layout)` of a stored group.
fn find_group(
    conn: &Connection,
    record_id: RecordId,
    name: &str,
) -> RecordRepoResult<Option<(i64, String)>> {
    Ok(conn
        .query_row(
            "SELECT group_id, storage_layout
             FROM model_groups
             WHERE record_uuid = ?1 AND name = ?2;",
            params![record_id.to_string(), name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn parse_summary_row(row: &Row<'_>) -> rusqlite::Result<RecordRepoResult<RecordSummary>> {
    let record_uuid: String = row.get(0)?;
    let record_id = match Uuid::parse_str(&record_uuid) {
        Ok(record_id) => record_id,
        Err(_) => {
            return Ok(Err(RecordRepoError::InvalidData(format!(
                "invalid uuid `{record_uuid}` in records.record_uuid"
            ))))
        }
    };

    Ok(Ok(RecordSummary {
        record_id,
        identifier: row.get(1)?,
        name: row.get(2)?,
        author: row.get(3)?,
        date: row.get(4)?,
        version: row.get(5)?,
        version_meaning: row.get(6)?,
        created_at: row.get(7)?,
    }))
}

fn log_write<T>(
    event: &'static str,
    record_id: RecordId,
    started_at: Instant,
    result: &RecordRepoResult<T>,
    details: impl FnOnce() -> String,
) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(_) => info!(
            "event={event} module=repo status=ok record_id={record_id} {} duration_ms={duration_ms}",
            details()
        ),
        Err(err) => error!(
            "event={event} module=repo status=error record_id={record_id} duration_ms={duration_ms} error={err}"
        ),
    }
}

fn ensure_record_connection_ready(conn: &Connection) -> RecordRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RecordRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &(table, columns) in REQUIRED_SCHEMA {
        if !table_exists(conn, table)? {
            return Err(RecordRepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RecordRepoError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}
