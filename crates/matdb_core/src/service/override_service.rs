//! Override use-case service.
//!
//! # Responsibility
//! - Validate and persist user overrides.
//! - Resolve canonical trees against a record's stored overrides.
//!
//! # Invariants
//! - Paths are validated before they reach storage.
//! - Blank references and blank replacement values are rejected.
//! - Resolution never writes; canonical rows stay untouched.

use crate::model::tree::{DiscoveryTree, RecordId};
use crate::overrides::path::{OverridePath, PathError};
use crate::overrides::resolver::{self, Resolution, SelectedValue};
use crate::overrides::{OverrideKind, StoredOverride, ValueReplacement};
use crate::repo::override_repo::{OverrideRepoError, OverrideRepository};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from override service operations.
#[derive(Debug)]
pub enum OverrideServiceError {
    InvalidPath(PathError),
    /// Reference id is blank after trim.
    BlankReference,
    /// Replacement value is blank after trim.
    BlankValue,
    /// Target record does not exist.
    RecordNotFound(RecordId),
    /// Repository-level failure.
    Repo(OverrideRepoError),
}

impl Display for OverrideServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(err) => write!(f, "{err}"),
            Self::BlankReference => write!(f, "reference id must not be blank"),
            Self::BlankValue => write!(f, "override value must not be blank"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OverrideServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidPath(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<OverrideRepoError> for OverrideServiceError {
    fn from(value: OverrideRepoError) -> Self {
        match value {
            OverrideRepoError::RecordNotFound(record_id) => Self::RecordNotFound(record_id),
            OverrideRepoError::InvalidPath(err) => Self::InvalidPath(err),
            other => Self::Repo(other),
        }
    }
}

impl From<PathError> for OverrideServiceError {
    fn from(value: PathError) -> Self {
        Self::InvalidPath(value)
    }
}

pub type OverrideServiceResult<T> = Result<T, OverrideServiceError>;

/// Override service facade.
pub struct OverrideService<O: OverrideRepository> {
    repo: O,
}

impl<O: OverrideRepository> OverrideService<O> {
    /// Creates service from repository implementation.
    pub fn new(repo: O) -> Self {
        Self { repo }
    }

    /// Prefers the entry citing `reference_id` at `path`.
    pub fn set_reference_preference(
        &self,
        record_id: RecordId,
        path: &str,
        reference_id: &str,
    ) -> OverrideServiceResult<()> {
        let path = OverridePath::parse(path)?;
        let reference_id = reference_id.trim();
        if reference_id.is_empty() {
            return Err(OverrideServiceError::BlankReference);
        }
        self.repo
            .save_reference_preference(record_id, &path.to_string(), reference_id)
            .map_err(Into::into)
    }

    /// Replaces the value at `path`; `unit = None` keeps the original unit.
    pub fn set_value_override(
        &self,
        record_id: RecordId,
        path: &str,
        value: &str,
        unit: Option<&str>,
    ) -> OverrideServiceResult<()> {
        let mut replacement = ValueReplacement::new(value);
        replacement.unit = unit.map(str::to_string);
        self.set_value_replacement(record_id, path, replacement)
    }

    /// Replaces the value at `path` with a full payload (unit and reason).
    pub fn set_value_replacement(
        &self,
        record_id: RecordId,
        path: &str,
        replacement: ValueReplacement,
    ) -> OverrideServiceResult<()> {
        let path = OverridePath::parse(path)?;
        let value = replacement.value.trim();
        if value.is_empty() {
            return Err(OverrideServiceError::BlankValue);
        }
        let replacement = ValueReplacement {
            value: value.to_string(),
            unit: replacement
                .unit
                .map(|unit| unit.trim().to_string())
                .filter(|unit| !unit.is_empty()),
            reason: replacement.reason,
        };
        self.repo
            .save_value_replacement(record_id, &path.to_string(), &replacement)
            .map_err(Into::into)
    }

    /// Clears overrides of a record; returns the number removed.
    ///
    /// - `(Some(path), kind)`: one path, optionally one kind.
    /// - `(None, Some(kind))`: every override of that kind.
    /// - `(None, None)`: every override of the record.
    pub fn clear(
        &self,
        record_id: RecordId,
        path: Option<&str>,
        kind: Option<OverrideKind>,
    ) -> OverrideServiceResult<usize> {
        let deleted = match (path, kind) {
            (Some(path), kind) => {
                let path = OverridePath::parse(path)?;
                self.repo
                    .delete_override(record_id, &path.to_string(), kind)?
            }
            (None, Some(kind)) => self.repo.delete_overrides_of_kind(record_id, kind)?,
            (None, None) => self.repo.delete_all_overrides(record_id)?,
        };
        Ok(deleted)
    }

    /// Returns the canonical tree with this record's overrides applied.
    pub fn resolve(
        &self,
        record_id: RecordId,
        canonical: &DiscoveryTree,
    ) -> OverrideServiceResult<DiscoveryTree> {
        let overrides = self.repo.load_overrides(record_id)?;
        Ok(resolver::resolve(record_id, canonical, &overrides))
    }

    /// Like `resolve`, also reporting applied and skipped overrides.
    pub fn resolve_detailed(
        &self,
        record_id: RecordId,
        canonical: &DiscoveryTree,
    ) -> OverrideServiceResult<Resolution> {
        let overrides = self.repo.load_overrides(record_id)?;
        Ok(resolver::resolve_detailed(record_id, canonical, &overrides))
    }

    /// Selects the single effective value at `path`.
    pub fn effective_value(
        &self,
        record_id: RecordId,
        canonical: &DiscoveryTree,
        path: &str,
    ) -> OverrideServiceResult<Option<SelectedValue>> {
        let path = OverridePath::parse(path)?;
        let overrides = self.repo.load_overrides(record_id)?;
        Ok(resolver::effective_value(
            canonical,
            &overrides,
            &path.to_string(),
        ))
    }

    pub fn list_overrides(&self, record_id: RecordId) -> OverrideServiceResult<Vec<StoredOverride>> {
        Ok(self.repo.list_overrides(record_id)?)
    }

    pub fn has_overrides(&self, record_id: RecordId) -> OverrideServiceResult<bool> {
        Ok(self.repo.has_overrides(record_id)?)
    }
}
