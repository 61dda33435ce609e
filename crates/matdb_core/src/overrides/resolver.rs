//! Pure application of overrides to a reconstructed tree.
//!
//! # Responsibility
//! - Derive a corrected copy of a record tree from its override set.
//! - Select one effective value per leaf for consumers that need a scalar.
//!
//! # Invariants
//! - Input trees are never mutated; every call works on a deep copy.
//! - All reference preferences apply before any value replacement, so a
//!   replacement on the same path always wins.
//! - Within one kind, paths apply in lexicographic order (outer paths first).
//! - Only leaf targets (attributes, bare values, lists) are overridden; a
//!   fault on one path is skipped and never aborts the rest.

use super::path::{OverridePath, PathError, PathRoot};
use super::{OverrideKind, OverrideSet, ValueReplacement};
use crate::model::tree::{
    AttributeNode, Category, DiscoveryTree, Entry, ParamNode, ParamValue, RecordId,
};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Reference id carried by every synthetic entry created from a user value.
pub const USER_OVERRIDE_REF: &str = "USER_OVERRIDE";

/// Why an override was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MalformedPath(PathError),
    /// Path does not exist in this record.
    AbsentPath,
    /// Path names a map or table instead of a value.
    NotALeaf,
    /// No entry cites the preferred reference.
    NoMatchingReference,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedPath(err) => write!(f, "malformed_path ({err})"),
            Self::AbsentPath => write!(f, "absent_path"),
            Self::NotALeaf => write!(f, "not_a_leaf"),
            Self::NoMatchingReference => write!(f, "no_matching_reference"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOverride {
    pub path: String,
    pub kind: OverrideKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOverride {
    pub path: String,
    pub kind: OverrideKind,
    pub reason: SkipReason,
}

/// Derived tree plus a report of what was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tree: DiscoveryTree,
    pub applied: Vec<AppliedOverride>,
    pub skipped: Vec<SkippedOverride>,
}

/// Where a selected value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    UserOverride,
    PreferredReference,
    FirstEntry,
}

/// The single effective value of one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedValue {
    pub value: Option<String>,
    pub unit: Option<String>,
    pub reference: Option<String>,
    pub source: ValueSource,
}

/// Applies `overrides` to a copy of `tree`.
pub fn resolve(record_id: RecordId, tree: &DiscoveryTree, overrides: &OverrideSet) -> DiscoveryTree {
    resolve_detailed(record_id, tree, overrides).tree
}

/// Applies `overrides` to a copy of `tree` and reports each outcome.
pub fn resolve_detailed(
    record_id: RecordId,
    tree: &DiscoveryTree,
    overrides: &OverrideSet,
) -> Resolution {
    let mut resolution = Resolution {
        tree: tree.clone(),
        applied: Vec::new(),
        skipped: Vec::new(),
    };

    for (raw_path, reference) in &overrides.reference_preferences {
        let outcome = OverridePath::parse(raw_path)
            .map_err(SkipReason::MalformedPath)
            .and_then(|path| {
                locate_mut(&mut resolution.tree, &path)
                    .and_then(|target| apply_preference(target, reference))
            });
        record_outcome(
            &mut resolution,
            record_id,
            raw_path,
            OverrideKind::ReferencePreference,
            outcome,
        );
    }

    for (raw_path, replacement) in &overrides.value_replacements {
        let outcome = OverridePath::parse(raw_path)
            .map_err(SkipReason::MalformedPath)
            .and_then(|path| {
                locate_mut(&mut resolution.tree, &path)
                    .and_then(|target| apply_replacement(target, replacement))
            });
        record_outcome(
            &mut resolution,
            record_id,
            raw_path,
            OverrideKind::ValueReplacement,
            outcome,
        );
    }

    debug!(
        "event=override_resolve module=overrides status=ok record_id={record_id} applied={} skipped={}",
        resolution.applied.len(),
        resolution.skipped.len()
    );
    resolution
}

/// Selects one value for the leaf at `path`.
///
/// Priority: value replacement, then the entry citing the preferred
/// reference, then the first entry in stored order. Returns `None` when the
/// path is malformed, absent, not a leaf, or has no entries.
pub fn effective_value(
    tree: &DiscoveryTree,
    overrides: &OverrideSet,
    path: &str,
) -> Option<SelectedValue> {
    let path = OverridePath::parse(path).ok()?;
    let candidates = leaf_candidates(tree, &path)?;
    let canonical = path.to_string();

    if let Some(replacement) = lookup(&overrides.value_replacements, &canonical) {
        let original_unit = candidates.first().and_then(|candidate| candidate.unit.clone());
        return Some(SelectedValue {
            value: Some(replacement.value.clone()),
            unit: replacement.unit.clone().or(original_unit),
            reference: Some(USER_OVERRIDE_REF.to_string()),
            source: ValueSource::UserOverride,
        });
    }

    if let Some(preferred) = lookup(&overrides.reference_preferences, &canonical) {
        if let Some(candidate) = candidates
            .iter()
            .find(|candidate| candidate.reference.as_deref() == Some(preferred.as_str()))
        {
            return Some(candidate.clone().selected(ValueSource::PreferredReference));
        }
    }

    candidates
        .into_iter()
        .next()
        .map(|candidate| candidate.selected(ValueSource::FirstEntry))
}

fn record_outcome(
    resolution: &mut Resolution,
    record_id: RecordId,
    path: &str,
    kind: OverrideKind,
    outcome: Result<(), SkipReason>,
) {
    match outcome {
        Ok(()) => resolution.applied.push(AppliedOverride {
            path: path.to_string(),
            kind,
        }),
        Err(reason) => {
            warn!(
                "event=override_skip module=overrides status=skip record_id={record_id} kind={kind} path={path} reason={reason}"
            );
            resolution.skipped.push(SkippedOverride {
                path: path.to_string(),
                kind,
                reason,
            });
        }
    }
}

/// Finds an override keyed by canonical path, tolerating non-canonical keys.
fn lookup<'a, V>(map: &'a BTreeMap<String, V>, canonical: &str) -> Option<&'a V> {
    map.get(canonical).or_else(|| {
        map.iter()
            .find(|(key, _)| {
                OverridePath::parse(key).is_ok_and(|parsed| parsed.to_string() == canonical)
            })
            .map(|(_, value)| value)
    })
}

enum Target<'t> {
    Attribute(&'t mut AttributeNode),
    Parameter(&'t mut ParamNode),
}

fn locate_mut<'t>(
    tree: &'t mut DiscoveryTree,
    path: &OverridePath,
) -> Result<Target<'t>, SkipReason> {
    let segments = path.segments();
    match path.root() {
        PathRoot::Properties => {
            let [category, attribute] = segments else {
                return Err(SkipReason::AbsentPath);
            };
            tree.properties
                .get_mut(category)
                .and_then(|category| category.get_mut(attribute))
                .map(Target::Attribute)
                .ok_or(SkipReason::AbsentPath)
        }
        PathRoot::Models => member_mut(&mut tree.models, segments).map(Target::Parameter),
    }
}

fn member_mut<'t>(
    members: &'t mut BTreeMap<String, ParamNode>,
    segments: &[String],
) -> Result<&'t mut ParamNode, SkipReason> {
    // A path ending on a table row addresses the row itself.
    let (first, rest) = segments.split_first().ok_or(SkipReason::NotALeaf)?;
    let node = members.get_mut(first).ok_or(SkipReason::AbsentPath)?;
    descend_mut(node, rest)
}

fn descend_mut<'t>(
    node: &'t mut ParamNode,
    segments: &[String],
) -> Result<&'t mut ParamNode, SkipReason> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(node);
    };
    match node {
        ParamNode::Map(children) => {
            let child = children.get_mut(segment).ok_or(SkipReason::AbsentPath)?;
            descend_mut(child, rest)
        }
        ParamNode::Rows(rows) => {
            let index: u32 = segment.parse().map_err(|_| SkipReason::AbsentPath)?;
            let row = rows
                .iter_mut()
                .find(|row| row.index == index)
                .ok_or(SkipReason::AbsentPath)?;
            member_mut(&mut row.params, rest)
        }
        ParamNode::Scalar(_) | ParamNode::List(_) => Err(SkipReason::AbsentPath),
    }
}

fn apply_preference(target: Target<'_>, reference: &str) -> Result<(), SkipReason> {
    let cites = |candidate: &Option<String>| candidate.as_deref() == Some(reference);
    match target {
        Target::Attribute(AttributeNode::Entries { entries, .. }) => {
            let position = entries
                .iter()
                .position(|entry| cites(&entry.reference))
                .ok_or(SkipReason::NoMatchingReference)?;
            let kept = entries.swap_remove(position);
            *entries = vec![kept];
            Ok(())
        }
        // Unwrapped scalars carry no reference.
        Target::Attribute(AttributeNode::Scalar { .. }) => Err(SkipReason::NoMatchingReference),
        Target::Parameter(ParamNode::Scalar(value)) => {
            if cites(&value.reference) {
                Ok(())
            } else {
                Err(SkipReason::NoMatchingReference)
            }
        }
        Target::Parameter(ParamNode::List(values)) => {
            let position = values
                .iter()
                .position(|value| cites(&value.reference))
                .ok_or(SkipReason::NoMatchingReference)?;
            let kept = values.swap_remove(position);
            *values = vec![kept];
            Ok(())
        }
        Target::Parameter(ParamNode::Map(_) | ParamNode::Rows(_)) => Err(SkipReason::NotALeaf),
    }
}

fn apply_replacement(target: Target<'_>, replacement: &ValueReplacement) -> Result<(), SkipReason> {
    match target {
        Target::Attribute(node) => {
            // Bare scalars are normalized into an entry list first.
            let unit = replacement
                .unit
                .clone()
                .or_else(|| node.unit().map(str::to_string));
            *node = AttributeNode::Entries {
                unit,
                entries: vec![Entry {
                    value: Some(replacement.value.clone()),
                    reference: Some(USER_OVERRIDE_REF.to_string()),
                    ordinal: 1,
                }],
            };
            Ok(())
        }
        Target::Parameter(node) => {
            let original_unit = node
                .leaf_values()
                .ok_or(SkipReason::NotALeaf)?
                .first()
                .and_then(|value| value.unit.clone());
            let synthetic = ParamValue {
                value: Some(replacement.value.clone()),
                unit: replacement.unit.clone().or(original_unit),
                reference: Some(USER_OVERRIDE_REF.to_string()),
                ordinal: Some(1),
            };
            let was_list = matches!(node, ParamNode::List(_));
            *node = if was_list {
                ParamNode::List(vec![synthetic])
            } else {
                ParamNode::Scalar(synthetic)
            };
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    value: Option<String>,
    unit: Option<String>,
    reference: Option<String>,
}

impl Candidate {
    fn selected(self, source: ValueSource) -> SelectedValue {
        SelectedValue {
            value: self.value,
            unit: self.unit,
            reference: self.reference,
            source,
        }
    }
}

fn leaf_candidates(tree: &DiscoveryTree, path: &OverridePath) -> Option<Vec<Candidate>> {
    let segments = path.segments();
    match path.root() {
        PathRoot::Properties => {
            let [category, attribute] = segments else {
                return None;
            };
            let category: &Category = tree.properties.get(category)?;
            Some(match category.get(attribute)? {
                AttributeNode::Entries { unit, entries } => entries
                    .iter()
                    .map(|entry| Candidate {
                        value: entry.value.clone(),
                        unit: unit.clone(),
                        reference: entry.reference.clone(),
                    })
                    .collect(),
                AttributeNode::Scalar { value, unit } => vec![Candidate {
                    value: value.clone(),
                    unit: unit.clone(),
                    reference: None,
                }],
            })
        }
        PathRoot::Models => {
            let values = member(&tree.models, segments)?.leaf_values()?;
            Some(
                values
                    .iter()
                    .map(|value| Candidate {
                        value: value.value.clone(),
                        unit: value.unit.clone(),
                        reference: value.reference.clone(),
                    })
                    .collect(),
            )
        }
    }
}

fn member<'t>(members: &'t BTreeMap<String, ParamNode>, segments: &[String]) -> Option<&'t ParamNode> {
    let (first, rest) = segments.split_first()?;
    let mut node = members.get(first)?;
    let mut remaining = rest;
    while let Some((segment, rest)) = remaining.split_first() {
        node = match node {
            ParamNode::Map(children) => children.get(segment)?,
            ParamNode::Rows(rows) => {
                let index: u32 = segment.parse().ok()?;
                let row = rows.iter().find(|row| row.index == index)?;
                return member(&row.params, rest);
            }
            ParamNode::Scalar(_) | ParamNode::List(_) => return None,
        };
        remaining = rest;
    }
    Some(node)
}
