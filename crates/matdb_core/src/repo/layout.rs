//! Storage layouts shared by the writer and the reader.
//!
//! Four group names and the `Phase` category keep the layout they had before
//! the nested layout existed. The writer stores them that way whenever the
//! tree shape round-trips through it; any other shape, and every other name,
//! is stored nested.

use crate::model::tree::{AttributeNode, Category, ParamNode};

pub(crate) const LAYOUT_NESTED: &str = "nested";
pub(crate) const LAYOUT_LEGACY: &str = "legacy";
pub(crate) const ROW_SUBGROUP: &str = "Row";
pub(crate) const LEGACY_PHASE_CATEGORY: &str = "Phase";

/// Legacy group shapes, one per allowlisted group name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LegacyGroup {
    /// `ElasticModel`: every root subgroup is a named parameter set.
    KeyedSets,
    /// `ElastoPlastic`: a root named after its only parameter is a leaf.
    NamedLeaves,
    /// `ReactionModel`: leaves live in a root named after the group.
    KindAndSets,
    /// `EOSModel`: root `Row` subgroups with slot subgroups below.
    IndexedTable,
}

impl LegacyGroup {
    pub(crate) fn for_group(name: &str) -> Option<Self> {
        match name {
            "ElasticModel" => Some(Self::KeyedSets),
            "ElastoPlastic" => Some(Self::NamedLeaves),
            "ReactionModel" => Some(Self::KindAndSets),
            "EOSModel" => Some(Self::IndexedTable),
            _ => None,
        }
    }

    /// Whether `node` reads back unchanged when stored in this layout.
    pub(crate) fn fits(self, group: &str, node: &ParamNode) -> bool {
        match (self, node) {
            (Self::IndexedTable, ParamNode::Rows(_)) => true,
            (Self::IndexedTable, _) => false,
            (_, ParamNode::Map(members)) => members
                .iter()
                .all(|(key, member)| self.member_fits(group, key, member)),
            (_, ParamNode::Scalar(_) | ParamNode::List(_) | ParamNode::Rows(_)) => false,
        }
    }

    fn member_fits(self, group: &str, key: &str, member: &ParamNode) -> bool {
        match (self, member) {
            (Self::IndexedTable, _) | (_, ParamNode::Rows(_)) => false,
            (Self::KeyedSets, ParamNode::Map(_)) => true,
            (Self::KeyedSets, ParamNode::Scalar(_) | ParamNode::List(_)) => false,
            // `{K: {K: leaf}}` would read back as the leaf itself.
            (Self::NamedLeaves, ParamNode::Map(children)) => !children.contains_key(key),
            (Self::NamedLeaves, ParamNode::Scalar(_) | ParamNode::List(_)) => true,
            // A set named after the group would be flattened into it.
            (Self::KindAndSets, ParamNode::Map(_)) => key != group,
            (Self::KindAndSets, ParamNode::Scalar(_) | ParamNode::List(_)) => true,
        }
    }
}

/// Layout the writer picks for a group; `None` means nested.
pub(crate) fn legacy_group_layout(name: &str, node: &ParamNode) -> Option<LegacyGroup> {
    LegacyGroup::for_group(name).filter(|kind| kind.fits(name, node))
}

/// Legacy `Phase` rows keep one value per attribute, so only scalars fit.
pub(crate) fn is_legacy_category(name: &str, category: &Category) -> bool {
    name == LEGACY_PHASE_CATEGORY
        && category
            .values()
            .all(|node| matches!(node, AttributeNode::Scalar { .. }))
}

pub(crate) fn layout_name(legacy: bool) -> &'static str {
    if legacy {
        LAYOUT_LEGACY
    } else {
        LAYOUT_NESTED
    }
}
