//! Record summaries returned by listing and lookup APIs.

use crate::model::tree::RecordId;
use serde::{Deserialize, Serialize};

/// Metadata columns of one stored record, without its categories or groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub record_id: RecordId,
    pub identifier: String,
    pub name: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub version: Option<String>,
    pub version_meaning: Option<String>,
    /// Creation time in epoch milliseconds.
    pub created_at: i64,
}
