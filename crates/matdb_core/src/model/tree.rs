//! Normalized discovery tree.
//!
//! # Responsibility
//! - Represent one record's metadata, categories, and model groups in a
//!   shape that is independent of any input serialization.
//! - Provide the structural helpers the writer and resolver dispatch on.
//!
//! # Invariants
//! - Values are opaque text; `None` marks an explicitly empty value.
//! - Map keys never contain `.` (the override path separator).
//! - `List` nodes produced by the parser carry at least two values.
//! - Maps are ordered, so serialized trees are deterministic.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a stored record.
pub type RecordId = Uuid;

static NODE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^.\s]+$").expect("node name pattern must compile"));

/// Returns whether `name` can key a category, attribute, group, or parameter.
///
/// Names must be non-empty and contain neither `.` (the path separator) nor
/// whitespace.
pub fn is_valid_node_name(name: &str) -> bool {
    NODE_NAME.is_match(name)
}

/// Category name -> attribute name -> attribute.
pub type Category = BTreeMap<String, AttributeNode>;

/// One record as discovered from its input document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryTree {
    pub metadata: BTreeMap<String, Option<String>>,
    pub properties: BTreeMap<String, Category>,
    pub models: BTreeMap<String, ParamNode>,
}

impl DiscoveryTree {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|value| value.as_deref())
    }

    /// Document identifier (`metadata.id`).
    pub fn identifier(&self) -> Option<&str> {
        self.metadata_value("id")
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata_value("name")
    }
}

/// A named datum inside a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeNode {
    /// Wrapped, ordered entries (`<Density unit=".."><Entry ref="..">..`).
    Entries {
        unit: Option<String>,
        entries: Vec<Entry>,
    },
    /// Unwrapped scalar such as a phase state; unordered and reference-free.
    Scalar {
        value: Option<String>,
        unit: Option<String>,
    },
}

impl AttributeNode {
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Entries { unit, .. } | Self::Scalar { unit, .. } => unit.as_deref(),
        }
    }
}

/// One recorded value of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Option<String>,
    pub reference: Option<String>,
    pub ordinal: u32,
}

impl Entry {
    pub fn new(ordinal: u32, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            reference: None,
            ordinal,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// One node of a model group's nested parameter structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamNode {
    Scalar(ParamValue),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamNode>),
    Rows(Vec<TableRow>),
}

impl ParamNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::List(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Rows(_) => "rows",
        }
    }

    /// Returns the values of a leaf node in stored order.
    pub fn leaf_values(&self) -> Option<&[ParamValue]> {
        match self {
            Self::Scalar(value) => Some(std::slice::from_ref(value)),
            Self::List(values) => Some(values.as_slice()),
            Self::Map(_) | Self::Rows(_) => None,
        }
    }

    /// Returns the children of a two-level composite leaf (`X.Y`): a
    /// non-empty map whose children are all scalars.
    pub fn as_composite(&self) -> Option<&BTreeMap<String, ParamNode>> {
        match self {
            Self::Map(children)
                if !children.is_empty()
                    && children
                        .values()
                        .all(|child| matches!(child, Self::Scalar(_))) =>
            {
                Some(children)
            }
            _ => None,
        }
    }
}

/// Leaf parameter value with its provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamValue {
    pub value: Option<String>,
    pub unit: Option<String>,
    pub reference: Option<String>,
    pub ordinal: Option<u32>,
}

impl ParamValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = Some(ordinal);
        self
    }
}

/// One row of a row-indexed tabular group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub index: u32,
    pub params: BTreeMap<String, ParamNode>,
}

/// Input or tree violates a required shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralError {
    /// Dotted location of the offending node.
    pub path: String,
    pub reason: String,
}

impl StructuralError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl Display for StructuralError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "structural error at `{}`: {}", self.path, self.reason)
    }
}

impl Error for StructuralError {}

#[cfg(test)]
mod tests {
    use super::{is_valid_node_name, DiscoveryTree, ParamNode, ParamValue, TableRow};
    use std::collections::BTreeMap;

    #[test]
    fn composite_requires_non_empty_all_scalar_map() {
        let mut children = BTreeMap::new();
        assert!(ParamNode::Map(children.clone()).as_composite().is_none());

        children.insert("c0".to_string(), ParamNode::Scalar(ParamValue::text("1")));
        children.insert("c1".to_string(), ParamNode::Scalar(ParamValue::text("2")));
        assert!(ParamNode::Map(children.clone()).as_composite().is_some());

        children.insert(
            "series".to_string(),
            ParamNode::List(vec![ParamValue::text("1"), ParamValue::text("2")]),
        );
        assert!(ParamNode::Map(children).as_composite().is_none());
    }

    #[test]
    fn leaf_values_cover_scalar_and_list_only() {
        let scalar = ParamNode::Scalar(ParamValue::text("1"));
        assert_eq!(scalar.leaf_values().map(<[ParamValue]>::len), Some(1));
        let rows = ParamNode::Rows(vec![TableRow {
            index: 1,
            params: BTreeMap::new(),
        }]);
        assert!(rows.leaf_values().is_none());
        assert!(!rows.is_leaf());
    }

    #[test]
    fn node_names_reject_dots_and_whitespace() {
        assert!(is_valid_node_name("ThermoMechanical"));
        assert!(is_valid_node_name("c0"));
        assert!(!is_valid_node_name(""));
        assert!(!is_valid_node_name("a.b"));
        assert!(!is_valid_node_name("two words"));
    }

    #[test]
    fn tree_serializes_deterministically() {
        let mut tree = DiscoveryTree::default();
        tree.metadata.insert("name".to_string(), Some("Copper".to_string()));
        tree.metadata.insert("id".to_string(), Some("CU-1".to_string()));
        let first = serde_json::to_string(&tree).unwrap();
        let second = serde_json::to_string(&tree.clone()).unwrap();
        assert_eq!(first, second);
        assert!(first.find("\"id\"").unwrap() < first.find("\"name\"").unwrap());
        assert_eq!(tree.identifier(), Some("CU-1"));
    }
}
