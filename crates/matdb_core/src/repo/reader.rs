//! Reconstruction of discovery trees from stored rows.
//!
//! # Responsibility
//! - Rebuild the exact tree shape the parser produces for every record.
//! - Keep a short allowlist of legacy group/category shapes that predate the
//!   nested layout and must stay bit-compatible.
//!
//! # Invariants
//! - Subgroups are walked as a forest over an arena ordered by id; a parent
//!   link can only point at an earlier row.
//! - Specialized readers are picked by group or category name, and only for
//!   rows stored with `storage_layout = 'legacy'`; everything else goes
//!   through the generic reader.
//! - Multi-row parameters are ordered by `(ordinal, id)`.

use super::layout::{LegacyGroup, LAYOUT_LEGACY, LEGACY_PHASE_CATEGORY, ROW_SUBGROUP};
use super::record_repo::{RecordRepoError, RecordRepoResult};
use crate::model::tree::{
    AttributeNode, Category, DiscoveryTree, Entry, ParamNode, ParamValue, RecordId, TableRow,
};
use log::warn;
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};

/// Reconstructs the full tree of one record.
///
/// # Errors
/// - `RecordNotFound` when `record_id` is unknown.
/// - `InvalidData` when stored rows cannot form a tree.
pub(crate) fn read_tree(conn: &Connection, record_id: RecordId) -> RecordRepoResult<DiscoveryTree> {
    let metadata_json: String = conn
        .query_row(
            "SELECT metadata_json FROM records WHERE record_uuid = ?1;",
            [record_id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(RecordRepoError::RecordNotFound(record_id))?;
    let metadata = serde_json::from_str(&metadata_json).map_err(|err| {
        RecordRepoError::InvalidData(format!("records.metadata_json is not a string map: {err}"))
    })?;

    Ok(DiscoveryTree {
        metadata,
        properties: read_categories(conn, record_id)?,
        models: read_groups(conn, record_id)?,
    })
}

struct EntryRow {
    value: Option<String>,
    reference: Option<String>,
    ordinal: Option<u32>,
}

fn read_categories(
    conn: &Connection,
    record_id: RecordId,
) -> RecordRepoResult<BTreeMap<String, Category>> {
    let mut stmt = conn.prepare(
        "SELECT category_id, name, storage_layout
         FROM categories
         WHERE record_uuid = ?1
         ORDER BY category_id ASC;",
    )?;
    let rows = stmt.query_map([record_id.to_string()], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut properties = BTreeMap::new();
    for row in rows {
        let (category_id, name, layout) = row?;
        let category = read_category(conn, category_id, &name, &layout)?;
        properties.insert(name, category);
    }
    Ok(properties)
}

/// Reads one stored category.
pub(crate) fn read_category(
    conn: &Connection,
    category_id: i64,
    name: &str,
    layout: &str,
) -> RecordRepoResult<Category> {
    let legacy_phase = layout == LAYOUT_LEGACY && name == LEGACY_PHASE_CATEGORY;

    let mut category = Category::new();
    for (attribute, unit, entries) in read_attributes(conn, category_id)? {
        let node = if legacy_phase {
            phase_attribute(entries, unit)
        } else {
            generic_attribute(entries, unit)?
        };
        category.insert(attribute, node);
    }
    Ok(category)
}

fn read_attributes(
    conn: &Connection,
    category_id: i64,
) -> RecordRepoResult<Vec<(String, Option<String>, Vec<EntryRow>)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT attribute_id, name, unit
         FROM attributes
         WHERE category_id = ?1
         ORDER BY attribute_id ASC;",
    )?;
    let attributes = stmt
        .query_map([category_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut entry_stmt = conn.prepare_cached(
        "SELECT value, ref_id, ordinal
         FROM attribute_entries
         WHERE attribute_id = ?1
         ORDER BY ordinal IS NULL, ordinal ASC, entry_id ASC;",
    )?;
    let mut result = Vec::with_capacity(attributes.len());
    for (attribute_id, name, unit) in attributes {
        let mut entries = Vec::new();
        let mut rows = entry_stmt.query([attribute_id])?;
        while let Some(row) = rows.next()? {
            entries.push(EntryRow {
                value: row.get(0)?,
                reference: row.get(1)?,
                ordinal: to_ordinal(row.get(2)?, "attribute_entries.ordinal")?,
            });
        }
        result.push((name, unit, entries));
    }
    Ok(result)
}

fn generic_attribute(
    entries: Vec<EntryRow>,
    unit: Option<String>,
) -> RecordRepoResult<AttributeNode> {
    if let [single] = entries.as_slice() {
        if single.ordinal.is_none() && single.reference.is_none() {
            return Ok(AttributeNode::Scalar {
                value: single.value.clone(),
                unit,
            });
        }
    }

    let entries = entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            let ordinal = match entry.ordinal {
                Some(ordinal) => ordinal,
                None => u32::try_from(position + 1).map_err(|_| {
                    RecordRepoError::InvalidData("too many attribute entries".to_string())
                })?,
            };
            Ok(Entry {
                value: entry.value,
                reference: entry.reference,
                ordinal,
            })
        })
        .collect::<RecordRepoResult<Vec<_>>>()?;
    Ok(AttributeNode::Entries { unit, entries })
}

/// Legacy phase rows keep only their first value.
fn phase_attribute(entries: Vec<EntryRow>, unit: Option<String>) -> AttributeNode {
    AttributeNode::Scalar {
        value: entries.into_iter().next().and_then(|entry| entry.value),
        unit,
    }
}

fn read_groups(
    conn: &Connection,
    record_id: RecordId,
) -> RecordRepoResult<BTreeMap<String, ParamNode>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, name, storage_layout
         FROM model_groups
         WHERE record_uuid = ?1
         ORDER BY group_id ASC;",
    )?;
    let groups = stmt
        .query_map([record_id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut models = BTreeMap::new();
    for (group_id, name, layout) in groups {
        let node = read_group(conn, group_id, &name, &layout)?;
        models.insert(name, node);
    }
    Ok(models)
}

/// Reads one stored group.
pub(crate) fn read_group(
    conn: &Connection,
    group_id: i64,
    name: &str,
    layout: &str,
) -> RecordRepoResult<ParamNode> {
    let arena = SubgroupArena::load(conn, group_id, name)?;
    let legacy = if layout == LAYOUT_LEGACY {
        LegacyGroup::for_group(name)
    } else {
        None
    };
    match legacy {
        Some(LegacyGroup::KeyedSets) => read_keyed_sets(&arena),
        Some(LegacyGroup::NamedLeaves) => read_named_leaves(&arena),
        Some(LegacyGroup::KindAndSets) => read_kind_and_sets(&arena, name),
        Some(LegacyGroup::IndexedTable) => read_indexed_table(&arena, name),
        None => arena.generic_group(),
    }
}

struct ParamRow {
    id: i64,
    name: String,
    value: ParamValue,
}

struct SubgroupNode {
    name: String,
    slot: Option<String>,
    row_index: Option<u32>,
    parent: Option<usize>,
    children: Vec<usize>,
    params: Vec<ParamRow>,
}

/// All subgroups of one group, indexed by position in id order.
struct SubgroupArena {
    group: String,
    nodes: Vec<SubgroupNode>,
}

impl SubgroupArena {
    fn load(conn: &Connection, group_id: i64, group: &str) -> RecordRepoResult<Self> {
        let mut nodes: Vec<SubgroupNode> = Vec::new();
        let mut index_by_id: HashMap<i64, usize> = HashMap::new();

        let mut stmt = conn.prepare_cached(
            "SELECT subgroup_id, parent_subgroup_id, name, slot_name, row_index
             FROM subgroups
             WHERE group_id = ?1
             ORDER BY subgroup_id ASC;",
        )?;
        let mut rows = stmt.query([group_id])?;
        while let Some(row) = rows.next()? {
            let subgroup_id: i64 = row.get(0)?;
            let parent_id: Option<i64> = row.get(1)?;
            let parent = match parent_id {
                Some(parent_id) => Some(*index_by_id.get(&parent_id).ok_or_else(|| {
                    RecordRepoError::InvalidData(format!(
                        "subgroup {subgroup_id} of `models.{group}` references parent {parent_id} that is not an earlier subgroup of the group"
                    ))
                })?),
                None => None,
            };

            let position = nodes.len();
            index_by_id.insert(subgroup_id, position);
            if let Some(parent) = parent {
                nodes[parent].children.push(position);
            }
            nodes.push(SubgroupNode {
                name: row.get(2)?,
                slot: row.get(3)?,
                row_index: to_ordinal(row.get(4)?, "subgroups.row_index")?,
                parent,
                children: Vec::new(),
                params: Vec::new(),
            });
        }

        let mut param_stmt = conn.prepare_cached(
            "SELECT p.parameter_id, p.subgroup_id, p.name, p.value, p.unit, p.ref_id, p.ordinal
             FROM parameters p
             JOIN subgroups s ON s.subgroup_id = p.subgroup_id
             WHERE s.group_id = ?1
             ORDER BY p.parameter_id ASC;",
        )?;
        let mut rows = param_stmt.query([group_id])?;
        while let Some(row) = rows.next()? {
            let subgroup_id: i64 = row.get(1)?;
            let position = *index_by_id.get(&subgroup_id).ok_or_else(|| {
                RecordRepoError::InvalidData(format!(
                    "parameter references unknown subgroup {subgroup_id}"
                ))
            })?;
            nodes[position].params.push(ParamRow {
                id: row.get(0)?,
                name: row.get(2)?,
                value: ParamValue {
                    value: row.get(3)?,
                    unit: row.get(4)?,
                    reference: row.get(5)?,
                    ordinal: to_ordinal(row.get(6)?, "parameters.ordinal")?,
                },
            });
        }

        Ok(Self {
            group: group.to_string(),
            nodes,
        })
    }

    fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&index| self.nodes[index].parent.is_none())
            .collect()
    }

    fn path(&self, index: usize) -> String {
        let mut segments = Vec::new();
        let mut current = Some(index);
        while let Some(position) = current {
            let node = &self.nodes[position];
            segments.push(match node.row_index {
                Some(row) if node.name == ROW_SUBGROUP && node.slot.is_none() => row.to_string(),
                _ => node.slot.clone().unwrap_or_else(|| node.name.clone()),
            });
            current = node.parent;
        }
        segments.reverse();
        format!("models.{}.{}", self.group, segments.join("."))
    }

    /// Fallback for every group without a specialized reader.
    fn generic_group(&self) -> RecordRepoResult<ParamNode> {
        let roots = self.roots();
        match roots.as_slice() {
            [] => Ok(ParamNode::Map(BTreeMap::new())),
            _ if roots.iter().all(|&root| self.nodes[root].row_index.is_some()) => {
                self.rows(&roots).map(ParamNode::Rows)
            }
            // Single root: flatten onto the group without an extra level.
            [single] => self.members(*single).map(ParamNode::Map),
            _ => {
                let mut keyed = BTreeMap::new();
                for &root in &roots {
                    let node = &self.nodes[root];
                    let key = node.slot.clone().unwrap_or_else(|| node.name.clone());
                    self.insert_member(&mut keyed, root, key, self.subgroup_node(root)?)?;
                }
                Ok(ParamNode::Map(keyed))
            }
        }
    }

    fn subgroup_node(&self, index: usize) -> RecordRepoResult<ParamNode> {
        if self.is_container(index) {
            return self.rows(&self.nodes[index].children).map(ParamNode::Rows);
        }
        self.members(index).map(ParamNode::Map)
    }

    /// A container holds only row subgroups: no parameters, no slots.
    fn is_container(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        node.params.is_empty()
            && !node.children.is_empty()
            && node.children.iter().all(|&child| {
                let child = &self.nodes[child];
                child.row_index.is_some() && child.slot.is_none()
            })
    }

    fn rows(&self, indices: &[usize]) -> RecordRepoResult<Vec<TableRow>> {
        let mut rows: Vec<TableRow> = Vec::with_capacity(indices.len());
        for &index in indices {
            let row_index = self.nodes[index].row_index.ok_or_else(|| {
                RecordRepoError::InvalidData(format!("`{}` has no row index", self.path(index)))
            })?;
            if rows.iter().any(|row| row.index == row_index) {
                return Err(RecordRepoError::InvalidData(format!(
                    "duplicate row index {row_index} at `{}`",
                    self.path(index)
                )));
            }
            rows.push(TableRow {
                index: row_index,
                params: self.members(index)?,
            });
        }
        rows.sort_by_key(|row| row.index);
        Ok(rows)
    }

    /// Parameters and child subgroups of one subgroup, keyed by name.
    fn members(&self, index: usize) -> RecordRepoResult<BTreeMap<String, ParamNode>> {
        let node = &self.nodes[index];
        let mut members = BTreeMap::new();
        let mut composites: BTreeMap<String, BTreeMap<String, ParamNode>> = BTreeMap::new();

        for (name, rows) in group_params(&node.params) {
            let leaf = leaf_node(rows);
            match name.split_once('.') {
                Some((head, tail)) => {
                    composites
                        .entry(head.to_string())
                        .or_default()
                        .insert(tail.to_string(), leaf);
                }
                None => {
                    members.insert(name.to_string(), leaf);
                }
            }
        }
        for (head, children) in composites {
            self.insert_member(&mut members, index, head, ParamNode::Map(children))?;
        }
        for &child in &node.children {
            let child_node = &self.nodes[child];
            let key = child_node
                .slot
                .clone()
                .unwrap_or_else(|| child_node.name.clone());
            self.insert_member(&mut members, index, key, self.subgroup_node(child)?)?;
        }
        Ok(members)
    }

    fn insert_member(
        &self,
        members: &mut BTreeMap<String, ParamNode>,
        owner: usize,
        key: String,
        node: ParamNode,
    ) -> RecordRepoResult<()> {
        if members.contains_key(&key) {
            return Err(RecordRepoError::InvalidData(format!(
                "member `{key}` appears twice under `{}`",
                self.path(owner)
            )));
        }
        members.insert(key, node);
        Ok(())
    }
}

/// Groups parameter rows by name, keeping first-seen order.
fn group_params(params: &[ParamRow]) -> Vec<(&str, Vec<&ParamRow>)> {
    let mut grouped: Vec<(&str, Vec<&ParamRow>)> = Vec::new();
    for param in params {
        match grouped
            .iter_mut()
            .find(|(name, _)| *name == param.name.as_str())
        {
            Some((_, rows)) => rows.push(param),
            None => grouped.push((param.name.as_str(), vec![param])),
        }
    }
    grouped
}

/// One row is a bare value; several rows form a list ordered by ordinal.
fn leaf_node(mut rows: Vec<&ParamRow>) -> ParamNode {
    rows.sort_by_key(|row| (row.value.ordinal.is_none(), row.value.ordinal, row.id));
    let mut values: Vec<ParamValue> = rows.into_iter().map(|row| row.value.clone()).collect();
    if values.len() == 1 {
        return ParamNode::Scalar(values.remove(0));
    }
    ParamNode::List(values)
}

/// `ElasticModel`: every root subgroup is a named parameter set.
fn read_keyed_sets(arena: &SubgroupArena) -> RecordRepoResult<ParamNode> {
    let mut keyed = BTreeMap::new();
    for root in arena.roots() {
        let name = arena.nodes[root].name.clone();
        arena.insert_member(&mut keyed, root, name, ParamNode::Map(arena.members(root)?))?;
    }
    Ok(ParamNode::Map(keyed))
}

/// `ElastoPlastic`: a root holding only parameters named after itself is a
/// leaf (bare value or list); any other root is a parameter set.
fn read_named_leaves(arena: &SubgroupArena) -> RecordRepoResult<ParamNode> {
    let mut keyed = BTreeMap::new();
    for root in arena.roots() {
        let node = &arena.nodes[root];
        let self_named = !node.params.is_empty()
            && node.children.is_empty()
            && node.params.iter().all(|param| param.name == node.name);
        let value = if self_named {
            leaf_node(node.params.iter().collect())
        } else {
            ParamNode::Map(arena.members(root)?)
        };
        arena.insert_member(&mut keyed, root, node.name.clone(), value)?;
    }
    Ok(ParamNode::Map(keyed))
}

/// `ReactionModel`: the root named after the group carries the kind and the
/// indexed series and is flattened; other roots are named parameter sets.
fn read_kind_and_sets(arena: &SubgroupArena, group: &str) -> RecordRepoResult<ParamNode> {
    let mut model = BTreeMap::new();
    let roots = arena.roots();
    for &root in &roots {
        if arena.nodes[root].name == group {
            for (key, node) in arena.members(root)? {
                arena.insert_member(&mut model, root, key, node)?;
            }
        }
    }
    for &root in &roots {
        let name = &arena.nodes[root].name;
        if name != group {
            arena.insert_member(
                &mut model,
                root,
                name.clone(),
                ParamNode::Map(arena.members(root)?),
            )?;
        }
    }
    Ok(ParamNode::Map(model))
}

/// `EOSModel`: root `Row` subgroups ordered by row index, with slot
/// subgroups (for example `reacted`/`unreacted`) below each row.
fn read_indexed_table(arena: &SubgroupArena, group: &str) -> RecordRepoResult<ParamNode> {
    let (rows, others): (Vec<usize>, Vec<usize>) = arena
        .roots()
        .into_iter()
        .partition(|&root| arena.nodes[root].name == ROW_SUBGROUP);
    if !others.is_empty() {
        warn!(
            "event=record_read module=repo status=skip group={group} reason=non_row_root count={}",
            others.len()
        );
    }
    arena.rows(&rows).map(ParamNode::Rows)
}

fn to_ordinal(raw: Option<i64>, column: &str) -> RecordRepoResult<Option<u32>> {
    raw.map(|value| {
        u32::try_from(value).map_err(|_| {
            RecordRepoError::InvalidData(format!("{column} value {value} is out of range"))
        })
    })
    .transpose()
}
