//! Record ingest and reconstruction use-case service.
//!
//! # Responsibility
//! - Turn input documents into stored records (parse, then write).
//! - Provide reconstruction and listing entry points for callers.
//!
//! # Invariants
//! - A document that fails to parse never reaches storage.
//! - Service layer remains storage-agnostic.

use crate::model::document::Element;
use crate::model::record::RecordSummary;
use crate::model::tree::{AttributeNode, DiscoveryTree, ParamNode, RecordId};
use crate::parser::{element_from_xml, parse_document, ParseError};
use crate::repo::record_repo::{RecordRepoError, RecordRepository};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from record service operations.
#[derive(Debug)]
pub enum RecordServiceError {
    /// Input document could not be discovered.
    Parse(ParseError),
    /// Target record does not exist.
    RecordNotFound(RecordId),
    /// Repository-level failure.
    Repo(RecordRepoError),
}

impl Display for RecordServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RecordServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::RecordNotFound(_) => None,
        }
    }
}

impl From<ParseError> for RecordServiceError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<RecordRepoError> for RecordServiceError {
    fn from(value: RecordRepoError) -> Self {
        match value {
            RecordRepoError::RecordNotFound(record_id) => Self::RecordNotFound(record_id),
            other => Self::Repo(other),
        }
    }
}

pub type RecordServiceResult<T> = Result<T, RecordServiceError>;

/// Record service facade.
pub struct RecordService<R: RecordRepository> {
    repo: R,
}

impl<R: RecordRepository> RecordService<R> {
    /// Creates service from repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Discovers and stores one document; returns the new record id.
    pub fn ingest_document(&self, document: &Element) -> RecordServiceResult<RecordId> {
        let tree = parse_document(document).map_err(|err| {
            warn!(
                "event=record_parse module=service status=error path={} error_code=structural",
                err.path
            );
            ParseError::Structural(err)
        })?;
        Ok(self.repo.create_record(&tree)?)
    }

    /// Parses XML text and stores the record it describes.
    pub fn ingest_xml(&self, text: &str) -> RecordServiceResult<RecordId> {
        let document = element_from_xml(text).map_err(|err| {
            warn!("event=record_parse module=service status=error error_code=malformed_xml");
            err
        })?;
        self.ingest_document(&document)
    }

    /// Stores an already discovered tree.
    pub fn ingest_tree(&self, tree: &DiscoveryTree) -> RecordServiceResult<RecordId> {
        Ok(self.repo.create_record(tree)?)
    }

    /// Reconstructs the canonical tree of one record.
    pub fn load_record(&self, record_id: RecordId) -> RecordServiceResult<DiscoveryTree> {
        Ok(self.repo.load_tree(record_id)?)
    }

    pub fn record_summary(&self, record_id: RecordId) -> RecordServiceResult<RecordSummary> {
        Ok(self.repo.get_summary(record_id)?)
    }

    pub fn find_record(&self, identifier: &str) -> RecordServiceResult<Option<RecordSummary>> {
        Ok(self.repo.find_by_identifier(identifier.trim())?)
    }

    /// Lists stored records ordered by name.
    pub fn list_records(&self) -> RecordServiceResult<Vec<RecordSummary>> {
        Ok(self.repo.list_records()?)
    }

    /// Adds new categories and groups from `tree` to an existing record.
    pub fn extend_record(
        &self,
        record_id: RecordId,
        tree: &DiscoveryTree,
    ) -> RecordServiceResult<()> {
        Ok(self.repo.extend_record(record_id, tree)?)
    }

    pub fn add_attribute(
        &self,
        record_id: RecordId,
        category: &str,
        name: &str,
        node: &AttributeNode,
    ) -> RecordServiceResult<()> {
        Ok(self.repo.add_attribute(record_id, category, name, node)?)
    }

    /// Adds one parameter under a dotted target such as `EOSModel.2`.
    pub fn add_parameter(
        &self,
        record_id: RecordId,
        target: &str,
        name: &str,
        node: &ParamNode,
    ) -> RecordServiceResult<()> {
        Ok(self.repo.add_parameter(record_id, target.trim(), name, node)?)
    }

    /// Deletes a record together with its overrides.
    pub fn delete_record(&self, record_id: RecordId) -> RecordServiceResult<()> {
        Ok(self.repo.delete_record(record_id)?)
    }
}
