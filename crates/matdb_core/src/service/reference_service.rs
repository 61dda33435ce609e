//! Reference catalog use-case service.
//!
//! # Responsibility
//! - Import `References.xml` catalogs into storage.
//! - Look up the references a record cites, for display and for choosing
//!   reference preferences.

use crate::model::reference::Reference;
use crate::model::tree::RecordId;
use crate::parser::{parse_references_xml, ParseError};
use crate::repo::reference_repo::{ReferenceRepoError, ReferenceRepository};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from reference service operations.
#[derive(Debug)]
pub enum ReferenceServiceError {
    /// Catalog document could not be read.
    Parse(ParseError),
    /// Repository-level failure.
    Repo(ReferenceRepoError),
}

impl Display for ReferenceServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReferenceServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<ParseError> for ReferenceServiceError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<ReferenceRepoError> for ReferenceServiceError {
    fn from(value: ReferenceRepoError) -> Self {
        Self::Repo(value)
    }
}

pub type ReferenceServiceResult<T> = Result<T, ReferenceServiceError>;

/// Reference catalog service facade.
pub struct ReferenceService<R: ReferenceRepository> {
    repo: R,
}

impl<R: ReferenceRepository> ReferenceService<R> {
    /// Creates service from repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Parses a catalog document and upserts every reference in it.
    ///
    /// Nothing is stored when the document fails to parse.
    pub fn import_xml(&self, text: &str) -> ReferenceServiceResult<usize> {
        let references = parse_references_xml(text).map_err(|err| {
            warn!("event=reference_import module=service status=error error={err}");
            err
        })?;
        Ok(self.repo.upsert_references(&references)?)
    }

    pub fn save(&self, reference: &Reference) -> ReferenceServiceResult<()> {
        Ok(self.repo.upsert_reference(reference)?)
    }

    pub fn get(&self, id: &str) -> ReferenceServiceResult<Option<Reference>> {
        Ok(self.repo.get_reference(id)?)
    }

    pub fn list(&self) -> ReferenceServiceResult<Vec<Reference>> {
        Ok(self.repo.list_references()?)
    }

    /// References cited by one record, the candidates for a preference.
    pub fn cited_by_record(&self, record_id: RecordId) -> ReferenceServiceResult<Vec<Reference>> {
        Ok(self.repo.cited_by_record(record_id)?)
    }

    pub fn delete(&self, id: &str) -> ReferenceServiceResult<bool> {
        Ok(self.repo.delete_reference(id)?)
    }
}
