//! Discovery parser: attributed hierarchical documents -> `DiscoveryTree`.
//!
//! # Responsibility
//! - Discover categories, attributes, and model groups from structure alone;
//!   no fixed vocabulary of names is assumed.
//! - Provide an XML front-end that lowers text into `Element` trees.
//! - Read the bibliographic catalog that record values cite.
//!
//! # Invariants
//! - Empty leaf values are kept as `None`, never dropped.
//! - Node names are non-empty and contain neither `.` nor whitespace.
//! - Entries and list values are emitted sorted by ordinal.

use crate::model::tree::StructuralError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod discovery;
mod references;
mod xml;

pub use discovery::parse_document;
pub use references::{parse_references, parse_references_xml};
pub use xml::{element_from_xml, parse_xml_str};

pub type ParseResult<T> = Result<T, ParseError>;

/// Error for document parsing.
#[derive(Debug)]
pub enum ParseError {
    /// Input text is not well-formed XML.
    Xml(roxmltree::Error),
    /// Document is well-formed but violates the record shape.
    Structural(StructuralError),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Xml(err) => write!(f, "malformed xml: {err}"),
            Self::Structural(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Xml(err) => Some(err),
            Self::Structural(err) => Some(err),
        }
    }
}

impl From<roxmltree::Error> for ParseError {
    fn from(value: roxmltree::Error) -> Self {
        Self::Xml(value)
    }
}

impl From<StructuralError> for ParseError {
    fn from(value: StructuralError) -> Self {
        Self::Structural(value)
    }
}
