//! XML front-end built on `roxmltree`.

use super::discovery::parse_document;
use super::ParseResult;
use crate::model::document::Element;
use crate::model::tree::DiscoveryTree;
use roxmltree::{Document, Node};

/// Parses XML text and discovers the record it describes.
pub fn parse_xml_str(text: &str) -> ParseResult<DiscoveryTree> {
    let root = element_from_xml(text)?;
    Ok(parse_document(&root)?)
}

/// Lowers XML text into a format-neutral `Element` tree.
///
/// Comments and processing instructions are dropped; text and CDATA
/// fragments of one element are concatenated.
pub fn element_from_xml(text: &str) -> ParseResult<Element> {
    let doc = Document::parse(text)?;
    Ok(lower(doc.root_element()))
}

fn lower(node: Node<'_, '_>) -> Element {
    let mut element = Element::new(node.tag_name().name());
    for attribute in node.attributes() {
        element
            .attributes
            .insert(attribute.name().to_string(), attribute.value().to_string());
    }

    let mut text: Option<String> = None;
    for child in node.children() {
        if child.is_element() {
            element.children.push(lower(child));
        } else if let Some(fragment) = child.text().filter(|_| child.is_text()) {
            text.get_or_insert_with(String::new).push_str(fragment);
        }
    }
    element.text = text;
    element
}

#[cfg(test)]
mod tests {
    use super::{element_from_xml, parse_xml_str};
    use crate::parser::ParseError;

    #[test]
    fn lowers_attributes_text_and_children() {
        let root = element_from_xml(
            r#"<Root><Density unit="kg/m^3"><!-- note --><Entry ref="107"> 8940 </Entry></Density></Root>"#,
        )
        .unwrap();
        let density = root.child("Density").unwrap();
        assert_eq!(density.attr("unit"), Some("kg/m^3"));
        let entry = density.child("Entry").unwrap();
        assert_eq!(entry.attr("ref"), Some("107"));
        assert_eq!(entry.trimmed_text(), Some("8940"));
    }

    #[test]
    fn malformed_xml_is_reported() {
        let err = parse_xml_str("<Root><Metadata></Root>").unwrap_err();
        assert!(matches!(err, ParseError::Xml(_)));
    }
}
