//! Recursive insert of discovery trees into the record schema.
//!
//! Nested group layout (`storage_layout = 'nested'`):
//!
//! - `Map` group: one body subgroup named after the group; its leaves are
//!   parameters of the body, its maps are keyed subgroups below it.
//! - `Rows` group: one root subgroup `Row` per row carrying `row_index`; map
//!   members of a row become slot subgroups (name = slot = key) carrying the
//!   same `row_index`.
//! - Nested `Rows`: a container subgroup named by key whose children are the
//!   row subgroups.
//! - Composite leaves under keyed or slot subgroups are flattened into
//!   `X.Y` parameters; everywhere else maps become real subgroups.
//!
//! Legacy group layout (`storage_layout = 'legacy'`, allowlisted names only):
//! no body subgroup. Each set is a root subgroup named by its key; leaves sit
//! in a root named after themselves (`ElastoPlastic`) or after the group
//! (`ReactionModel`). Legacy tables are laid out like nested ones.
//!
//! Callers own the transaction; every function here runs inside it.

use super::layout::{
    is_legacy_category, layout_name, legacy_group_layout, LegacyGroup, ROW_SUBGROUP,
};
use super::record_repo::{RecordRepoError, RecordRepoResult};
use crate::db::DbError;
use crate::model::tree::{
    is_valid_node_name, AttributeNode, Category, DiscoveryTree, ParamNode, ParamValue, RecordId,
    StructuralError, TableRow,
};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

/// Where a set of group members is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Directly under a group's body subgroup.
    Body,
    /// Directly under a row subgroup with this index.
    Row(u32),
    /// Under a keyed or slot subgroup.
    Nested,
}

pub(crate) fn insert_record_row(
    conn: &Connection,
    record_id: RecordId,
    tree: &DiscoveryTree,
) -> RecordRepoResult<()> {
    let identifier = tree
        .identifier()
        .ok_or_else(|| StructuralError::new("metadata.id", "record identifier is required"))?;
    let name = tree
        .name()
        .ok_or_else(|| StructuralError::new("metadata.name", "record name is required"))?;
    let metadata_json = serde_json::to_string(&tree.metadata).map_err(|err| {
        StructuralError::new("metadata", format!("metadata is not serializable: {err}"))
    })?;

    let result = conn.execute(
        "INSERT INTO records (
            record_uuid,
            identifier,
            name,
            author,
            record_date,
            version,
            version_meaning,
            metadata_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            record_id.to_string(),
            identifier,
            name,
            tree.metadata_value("author"),
            tree.metadata_value("date"),
            tree.metadata_value("version"),
            tree.metadata_value("version_meaning"),
            metadata_json,
        ],
    );
    at("metadata", result).map(|_| ())
}

/// Inserts a category with its attributes; returns the category id.
pub(crate) fn insert_category(
    conn: &Connection,
    record_id: RecordId,
    name: &str,
    category: &Category,
) -> RecordRepoResult<i64> {
    let path = format!("properties.{name}");
    ensure_name(&path, name)?;

    let layout = layout_name(is_legacy_category(name, category));
    let result = conn.execute(
        "INSERT INTO categories (record_uuid, name, storage_layout) VALUES (?1, ?2, ?3);",
        params![record_id.to_string(), name, layout],
    );
    at(&path, result)?;
    let category_id = conn.last_insert_rowid();

    write_attributes(conn, category_id, &path, category)?;
    Ok(category_id)
}

/// Replaces every attribute of a stored category, re-choosing its layout.
pub(crate) fn rewrite_category(
    conn: &Connection,
    category_id: i64,
    name: &str,
    category: &Category,
) -> RecordRepoResult<()> {
    let path = format!("properties.{name}");
    at(
        &path,
        conn.execute("DELETE FROM attributes WHERE category_id = ?1;", [category_id]),
    )?;
    at(
        &path,
        conn.execute(
            "UPDATE categories SET storage_layout = ?2 WHERE category_id = ?1;",
            params![category_id, layout_name(is_legacy_category(name, category))],
        ),
    )?;
    write_attributes(conn, category_id, &path, category)
}

fn write_attributes(
    conn: &Connection,
    category_id: i64,
    path: &str,
    category: &Category,
) -> RecordRepoResult<()> {
    for (attribute, node) in category {
        let attribute_path = format!("{path}.{attribute}");
        ensure_name(&attribute_path, attribute)?;
        insert_attribute(conn, category_id, &attribute_path, attribute, node)?;
    }
    Ok(())
}

pub(crate) fn insert_attribute(
    conn: &Connection,
    category_id: i64,
    path: &str,
    name: &str,
    node: &AttributeNode,
) -> RecordRepoResult<()> {
    let result = conn.execute(
        "INSERT INTO attributes (category_id, name, unit) VALUES (?1, ?2, ?3);",
        params![category_id, name, node.unit()],
    );
    at(path, result)?;
    let attribute_id = conn.last_insert_rowid();

    let mut stmt = at(
        path,
        conn.prepare_cached(
            "INSERT INTO attribute_entries (attribute_id, value, ref_id, ordinal)
             VALUES (?1, ?2, ?3, ?4);",
        ),
    )?;
    match node {
        // Unwrapped scalar: one entry without ordinal or reference.
        AttributeNode::Scalar { value, .. } => {
            at(
                path,
                stmt.execute(params![attribute_id, value, None::<String>, None::<u32>]),
            )?;
        }
        AttributeNode::Entries { entries, .. } => {
            for entry in entries {
                at(
                    path,
                    stmt.execute(params![
                        attribute_id,
                        entry.value,
                        entry.reference,
                        entry.ordinal
                    ]),
                )?;
            }
        }
    }
    Ok(())
}

/// Inserts a group and its nested structure; returns the group id.
pub(crate) fn insert_group(
    conn: &Connection,
    record_id: RecordId,
    name: &str,
    node: &ParamNode,
) -> RecordRepoResult<i64> {
    let path = format!("models.{name}");
    ensure_name(&path, name)?;
    check_group_root(&path, node)?;

    let legacy = legacy_group_layout(name, node);
    let result = conn.execute(
        "INSERT INTO model_groups (record_uuid, name, storage_layout) VALUES (?1, ?2, ?3);",
        params![record_id.to_string(), name, layout_name(legacy.is_some())],
    );
    at(&path, result)?;
    let group_id = conn.last_insert_rowid();

    write_group_body(conn, group_id, name, &path, node, legacy)?;
    Ok(group_id)
}

/// Replaces the whole structure of a stored group, re-choosing its layout.
pub(crate) fn rewrite_group(
    conn: &Connection,
    group_id: i64,
    name: &str,
    node: &ParamNode,
) -> RecordRepoResult<()> {
    let path = format!("models.{name}");
    check_group_root(&path, node)?;

    let legacy = legacy_group_layout(name, node);
    at(
        &path,
        conn.execute("DELETE FROM subgroups WHERE group_id = ?1;", [group_id]),
    )?;
    at(
        &path,
        conn.execute(
            "UPDATE model_groups SET storage_layout = ?2 WHERE group_id = ?1;",
            params![group_id, layout_name(legacy.is_some())],
        ),
    )?;
    write_group_body(conn, group_id, name, &path, node, legacy)
}

fn write_group_body(
    conn: &Connection,
    group_id: i64,
    name: &str,
    path: &str,
    node: &ParamNode,
    legacy: Option<LegacyGroup>,
) -> RecordRepoResult<()> {
    match (node, legacy) {
        (ParamNode::Map(members), None) => {
            let body_id = insert_subgroup(conn, group_id, None, name, None, None, path)?;
            write_members(conn, group_id, body_id, path, members, Placement::Body)
        }
        (ParamNode::Map(members), Some(kind)) => {
            write_legacy_members(conn, group_id, name, path, members, kind)
        }
        (ParamNode::Rows(rows), _) => write_rows(conn, group_id, None, path, rows),
        // Rejected by check_group_root.
        (ParamNode::Scalar(_) | ParamNode::List(_), _) => Ok(()),
    }
}

/// Writes group members as legacy root subgroups; `kind` must fit them.
fn write_legacy_members(
    conn: &Connection,
    group_id: i64,
    group: &str,
    path: &str,
    members: &BTreeMap<String, ParamNode>,
    kind: LegacyGroup,
) -> RecordRepoResult<()> {
    let mut own_root: Option<i64> = None;
    for (key, member) in members {
        let member_path = format!("{path}.{key}");
        ensure_name(&member_path, key)?;
        match member {
            ParamNode::Map(children) => {
                let root_id =
                    insert_subgroup(conn, group_id, None, key, None, None, &member_path)?;
                write_members(
                    conn,
                    group_id,
                    root_id,
                    &member_path,
                    children,
                    Placement::Nested,
                )?;
            }
            leaf if kind == LegacyGroup::NamedLeaves => {
                let root_id =
                    insert_subgroup(conn, group_id, None, key, None, None, &member_path)?;
                write_member(
                    conn,
                    group_id,
                    root_id,
                    &member_path,
                    key,
                    leaf,
                    Placement::Nested,
                )?;
            }
            leaf => {
                let root_id = match own_root {
                    Some(root_id) => root_id,
                    None => {
                        let root_id =
                            insert_subgroup(conn, group_id, None, group, None, None, path)?;
                        *own_root.insert(root_id)
                    }
                };
                write_member(
                    conn,
                    group_id,
                    root_id,
                    &member_path,
                    key,
                    leaf,
                    Placement::Nested,
                )?;
            }
        }
    }
    Ok(())
}

/// Rejects group roots that have no subgroup representation.
fn check_group_root(path: &str, node: &ParamNode) -> RecordRepoResult<()> {
    match node {
        ParamNode::Map(_) => Ok(()),
        ParamNode::Rows(rows) => check_rows(path, rows),
        ParamNode::Scalar(_) | ParamNode::List(_) => Err(StructuralError::new(
            path,
            "group root must be a map or a table, not a bare value",
        )
        .into()),
    }
}

/// Writes one named member under `parent_id`.
fn write_member(
    conn: &Connection,
    group_id: i64,
    parent_id: i64,
    path: &str,
    key: &str,
    node: &ParamNode,
    placement: Placement,
) -> RecordRepoResult<()> {
    match node {
        ParamNode::Scalar(value) => insert_parameter(conn, parent_id, path, key, value),
        ParamNode::List(values) => {
            if values.is_empty() {
                return Err(StructuralError::new(path, "parameter list must not be empty").into());
            }
            values
                .iter()
                .try_for_each(|value| insert_parameter(conn, parent_id, path, key, value))
        }
        ParamNode::Map(children) => {
            if placement == Placement::Nested {
                if let Some(composite) = node.as_composite() {
                    return write_composite(conn, parent_id, path, key, composite);
                }
            }
            let (slot, row_index) = match placement {
                Placement::Row(index) => (Some(key), Some(index)),
                Placement::Body | Placement::Nested => (None, None),
            };
            let subgroup_id =
                insert_subgroup(conn, group_id, Some(parent_id), key, slot, row_index, path)?;
            write_members(conn, group_id, subgroup_id, path, children, Placement::Nested)
        }
        ParamNode::Rows(rows) => {
            check_rows(path, rows)?;
            let container_id =
                insert_subgroup(conn, group_id, Some(parent_id), key, None, None, path)?;
            write_rows(conn, group_id, Some(container_id), path, rows)
        }
    }
}

fn write_members(
    conn: &Connection,
    group_id: i64,
    parent_id: i64,
    path: &str,
    members: &BTreeMap<String, ParamNode>,
    placement: Placement,
) -> RecordRepoResult<()> {
    for (key, node) in members {
        let member_path = format!("{path}.{key}");
        ensure_name(&member_path, key)?;
        write_member(conn, group_id, parent_id, &member_path, key, node, placement)?;
    }
    Ok(())
}

fn write_rows(
    conn: &Connection,
    group_id: i64,
    parent_id: Option<i64>,
    path: &str,
    rows: &[TableRow],
) -> RecordRepoResult<()> {
    for row in rows {
        let row_path = format!("{path}.{}", row.index);
        let row_id = insert_subgroup(
            conn,
            group_id,
            parent_id,
            ROW_SUBGROUP,
            None,
            Some(row.index),
            &row_path,
        )?;
        write_members(
            conn,
            group_id,
            row_id,
            &row_path,
            &row.params,
            Placement::Row(row.index),
        )?;
    }
    Ok(())
}

/// Stores `{key: {child: scalar}}` as parameters named `key.child`.
fn write_composite(
    conn: &Connection,
    parent_id: i64,
    path: &str,
    key: &str,
    children: &BTreeMap<String, ParamNode>,
) -> RecordRepoResult<()> {
    for (child, node) in children {
        let child_path = format!("{path}.{child}");
        ensure_name(&child_path, child)?;
        if let ParamNode::Scalar(value) = node {
            insert_parameter(conn, parent_id, &child_path, &format!("{key}.{child}"), value)?;
        }
    }
    Ok(())
}

fn check_rows(path: &str, rows: &[TableRow]) -> RecordRepoResult<()> {
    if rows.is_empty() {
        return Err(StructuralError::new(path, "table must contain at least one row").into());
    }
    for (position, row) in rows.iter().enumerate() {
        if rows[..position]
            .iter()
            .any(|earlier| earlier.index == row.index)
        {
            return Err(StructuralError::new(
                path,
                format!("duplicate row index {}", row.index),
            )
            .into());
        }
    }
    Ok(())
}

fn insert_subgroup(
    conn: &Connection,
    group_id: i64,
    parent_id: Option<i64>,
    name: &str,
    slot: Option<&str>,
    row_index: Option<u32>,
    path: &str,
) -> RecordRepoResult<i64> {
    let mut stmt = at(
        path,
        conn.prepare_cached(
            "INSERT INTO subgroups (group_id, parent_subgroup_id, name, slot_name, row_index)
             VALUES (?1, ?2, ?3, ?4, ?5);",
        ),
    )?;
    at(
        path,
        stmt.execute(params![group_id, parent_id, name, slot, row_index]),
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_parameter(
    conn: &Connection,
    subgroup_id: i64,
    path: &str,
    name: &str,
    value: &ParamValue,
) -> RecordRepoResult<()> {
    let mut stmt = at(
        path,
        conn.prepare_cached(
            "INSERT INTO parameters (subgroup_id, name, value, unit, ref_id, ordinal)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        ),
    )?;
    at(
        path,
        stmt.execute(params![
            subgroup_id,
            name,
            value.value,
            value.unit,
            value.reference,
            value.ordinal
        ]),
    )?;
    Ok(())
}

pub(crate) fn ensure_name(path: &str, name: &str) -> RecordRepoResult<()> {
    if is_valid_node_name(name) {
        return Ok(());
    }
    Err(StructuralError::new(
        path,
        "names must be non-empty and contain neither '.' nor whitespace",
    )
    .into())
}

/// Tags a storage failure with the node path being written.
fn at<T>(path: &str, result: rusqlite::Result<T>) -> RecordRepoResult<T> {
    result.map_err(|err| RecordRepoError::WriteFailed {
        path: path.to_string(),
        source: DbError::Sqlite(err),
    })
}
