//! Discovery of the bibliographic catalog (`References.xml`).
//!
//! ```text
//! <References>
//!   <reference id="1"><type>article</type><author>..</author>...</reference>
//! </References>
//! ```

use super::xml::element_from_xml;
use super::ParseResult;
use crate::model::document::Element;
use crate::model::reference::Reference;
use crate::model::tree::StructuralError;
use log::warn;
use std::collections::BTreeSet;

const CATALOG_TAG: &str = "References";
const REFERENCE_TAG: &str = "reference";

/// Parses catalog XML text into references in document order.
pub fn parse_references_xml(text: &str) -> ParseResult<Vec<Reference>> {
    let root = element_from_xml(text)?;
    Ok(parse_references(&root)?)
}

/// Discovers the references listed under a catalog root.
///
/// Entries without an `id` are skipped; blank fields stay `None`.
///
/// # Errors
/// - `StructuralError` when the root is not a catalog or an id repeats.
pub fn parse_references(root: &Element) -> Result<Vec<Reference>, StructuralError> {
    if root.tag != CATALOG_TAG {
        return Err(StructuralError::new(
            "references",
            format!("catalog root must be `{CATALOG_TAG}`, found `{}`", root.tag),
        ));
    }

    let mut seen = BTreeSet::new();
    let mut references = Vec::new();
    for (position, element) in root
        .children
        .iter()
        .enumerate()
        .filter(|(_, child)| child.tag == REFERENCE_TAG)
    {
        let Some(id) = element
            .attr("id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            warn!(
                "event=reference_parse module=parser status=skip position={position} reason=missing_id"
            );
            continue;
        };
        if !seen.insert(id.to_string()) {
            return Err(StructuralError::new(
                format!("references.{id}"),
                "duplicate reference id",
            ));
        }

        let field = |tag: &str| {
            element
                .child(tag)
                .and_then(Element::trimmed_text)
                .map(str::to_string)
        };
        references.push(Reference {
            id: id.to_string(),
            kind: field("type"),
            author: field("author"),
            title: field("title"),
            journal: field("journal"),
            year: field("year"),
            volume: field("volume"),
            pages: field("pages"),
            doi: field("doi"),
            notes: field("notes"),
        });
    }
    Ok(references)
}
