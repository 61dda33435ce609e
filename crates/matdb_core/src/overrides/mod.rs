//! Read-time user overrides layered on reconstructed records.
//!
//! # Responsibility
//! - Define override kinds, payloads, and the per-record override set.
//! - Parse dotted override paths.
//! - Apply overrides to a reconstructed tree without touching stored rows.
//!
//! # Invariants
//! - At most one override per `(record, path, kind)`.
//! - Resolution never mutates its input tree.

use crate::model::tree::RecordId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub mod path;
pub mod resolver;

/// Kind of a stored override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// Keep only the entry citing a preferred reference.
    ReferencePreference,
    /// Replace all entries with one user-supplied value.
    ValueReplacement,
}

impl OverrideKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReferencePreference => "reference_preference",
            Self::ValueReplacement => "value_replacement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reference_preference" => Some(Self::ReferencePreference),
            "value_replacement" => Some(Self::ValueReplacement),
            _ => None,
        }
    }
}

impl Display for OverrideKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a value replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueReplacement {
    pub value: String,
    /// Replacement unit; `None` keeps the original unit.
    pub unit: Option<String>,
    /// Free-form note on why the value was replaced.
    #[serde(default)]
    pub reason: Option<String>,
}

impl ValueReplacement {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            unit: None,
            reason: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// All overrides of one record, partitioned by kind and keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSet {
    pub reference_preferences: BTreeMap<String, String>,
    pub value_replacements: BTreeMap<String, ValueReplacement>,
}

impl OverrideSet {
    pub fn prefer(mut self, path: impl Into<String>, reference: impl Into<String>) -> Self {
        self.reference_preferences
            .insert(path.into(), reference.into());
        self
    }

    pub fn replace(mut self, path: impl Into<String>, replacement: ValueReplacement) -> Self {
        self.value_replacements.insert(path.into(), replacement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reference_preferences.is_empty() && self.value_replacements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reference_preferences.len() + self.value_replacements.len()
    }
}

/// One persisted override row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOverride {
    pub record_id: RecordId,
    pub path: String,
    pub kind: OverrideKind,
    pub payload: serde_json::Value,
    /// Last write time in epoch milliseconds.
    pub created_at: i64,
}
