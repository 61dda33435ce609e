//! Domain model for scientific records.
//!
//! # Responsibility
//! - Define the format-neutral input document (`Element`).
//! - Define the normalized discovery tree shared by parser, writer, reader,
//!   and the override resolver.
//! - Define record summaries returned by listing APIs.
//! - Define bibliographic references cited by entries and parameters.
//!
//! # Invariants
//! - Every stored record is identified by a stable `RecordId`.
//! - Leaf values are opaque text; nothing in the model parses numbers.

pub mod document;
pub mod record;
pub mod reference;
pub mod tree;
