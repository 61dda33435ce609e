//! Structure-driven discovery of records from `Element` trees.
//!
//! Document layout:
//!
//! ```text
//! <Record>
//!   <Metadata><Id/><Name/>...</Metadata>
//!   <Category>
//!     <Property><Thermal><Density unit=".."><Entry ref="..">..</Entry>...
//!     <Model><EOSModel><Row index="1">...</Row>...</EOSModel>...</Model>
//!   </Category>
//! </Record>
//! ```

use crate::model::document::Element;
use crate::model::tree::{
    is_valid_node_name, AttributeNode, Category, DiscoveryTree, Entry, ParamNode, ParamValue,
    StructuralError, TableRow,
};
use std::collections::{BTreeMap, BTreeSet};

const METADATA_TAG: &str = "Metadata";
const CATEGORY_TAG: &str = "Category";
const PROPERTY_TAG: &str = "Property";
const MODEL_TAG: &str = "Model";
const ENTRY_TAG: &str = "Entry";
const ROW_TAG: &str = "Row";

const REQUIRED_METADATA: [&str; 2] = ["id", "name"];

type DiscoveryResult<T> = Result<T, StructuralError>;

/// Discovers the record described by `root`.
///
/// # Errors
/// - `StructuralError` naming the dotted path of the first offending node.
pub fn parse_document(root: &Element) -> DiscoveryResult<DiscoveryTree> {
    let metadata = root
        .child(METADATA_TAG)
        .ok_or_else(|| StructuralError::new("metadata", "missing Metadata element"))
        .and_then(parse_metadata)?;

    let category = root.child(CATEGORY_TAG);
    let properties = match category.and_then(|category| category.child(PROPERTY_TAG)) {
        Some(property) => parse_properties(property)?,
        None => BTreeMap::new(),
    };
    let models = match category.and_then(|category| category.child(MODEL_TAG)) {
        Some(model) => parse_models(model)?,
        None => BTreeMap::new(),
    };

    Ok(DiscoveryTree {
        metadata,
        properties,
        models,
    })
}

fn parse_metadata(element: &Element) -> DiscoveryResult<BTreeMap<String, Option<String>>> {
    let mut metadata = BTreeMap::new();
    for child in &element.children {
        let key = child.tag.to_lowercase();
        insert_unique(
            &mut metadata,
            key.clone(),
            child.trimmed_text().map(str::to_string),
            "metadata",
        )?;
        for (attribute, value) in &child.attributes {
            let value = Some(value.trim()).filter(|value| !value.is_empty());
            insert_unique(
                &mut metadata,
                format!("{key}_{attribute}"),
                value.map(str::to_string),
                "metadata",
            )?;
        }
    }

    for key in REQUIRED_METADATA {
        if metadata.get(key).map_or(true, Option::is_none) {
            return Err(StructuralError::new(
                format!("metadata.{key}"),
                "required metadata value is missing",
            ));
        }
    }
    Ok(metadata)
}

fn parse_properties(element: &Element) -> DiscoveryResult<BTreeMap<String, Category>> {
    let mut properties = BTreeMap::new();
    for category_element in &element.children {
        let path = child_path("properties", &category_element.tag)?;
        let category = parse_category(category_element, &path)?;
        insert_unique(
            &mut properties,
            category_element.tag.clone(),
            category,
            "properties",
        )?;
    }
    Ok(properties)
}

fn parse_category(element: &Element, path: &str) -> DiscoveryResult<Category> {
    let mut category = Category::new();

    // Unwrapped scalar category, e.g. `<Phase>solid</Phase>`.
    if element.children.is_empty() {
        if let Some(text) = element.trimmed_text() {
            category.insert(
                element.tag.clone(),
                AttributeNode::Scalar {
                    value: Some(text.to_string()),
                    unit: None,
                },
            );
        }
        return Ok(category);
    }

    for attribute in &element.children {
        let attribute_path = child_path(path, &attribute.tag)?;
        let node = parse_attribute(attribute, &attribute_path)?;
        insert_unique(&mut category, attribute.tag.clone(), node, path)?;
    }
    Ok(category)
}

fn parse_attribute(element: &Element, path: &str) -> DiscoveryResult<AttributeNode> {
    let unit = element.attr("unit").map(str::to_string);
    if element.children.is_empty() {
        return Ok(AttributeNode::Scalar {
            value: element.trimmed_text().map(str::to_string),
            unit,
        });
    }
    if !all_entries(element) {
        return Err(StructuralError::new(
            path,
            "attribute children must all be Entry elements",
        ));
    }

    let mut entries = Vec::with_capacity(element.children.len());
    let mut seen = BTreeSet::new();
    for (position, child) in element.children.iter().enumerate() {
        let ordinal = parse_ordinal(child, position, path)?;
        if !seen.insert(ordinal) {
            return Err(StructuralError::new(
                path,
                format!("duplicate entry index {ordinal}"),
            ));
        }
        let (value, reference) = entry_payload(child, path)?;
        entries.push(Entry {
            value,
            reference,
            ordinal,
        });
    }
    entries.sort_by_key(|entry| entry.ordinal);

    Ok(AttributeNode::Entries { unit, entries })
}

fn parse_models(element: &Element) -> DiscoveryResult<BTreeMap<String, ParamNode>> {
    let mut models = BTreeMap::new();
    for group in &element.children {
        let path = child_path("models", &group.tag)?;
        let node = if group.children.is_empty() {
            if group.trimmed_text().is_some() {
                return Err(StructuralError::new(
                    path,
                    "model group must contain parameters, not bare text",
                ));
            }
            ParamNode::Map(BTreeMap::new())
        } else {
            parse_container(group, &path)?
        };
        insert_unique(&mut models, group.tag.clone(), node, "models")?;
    }
    Ok(models)
}

/// Parses an element with non-entry children into `Rows` or `Map`.
fn parse_container(element: &Element, path: &str) -> DiscoveryResult<ParamNode> {
    let row_count = element
        .children
        .iter()
        .filter(|child| child.tag == ROW_TAG)
        .count();
    if row_count == 0 {
        return parse_members(element, path).map(ParamNode::Map);
    }
    if row_count != element.children.len() {
        return Err(StructuralError::new(
            path,
            "Row elements cannot be mixed with other children",
        ));
    }

    let mut rows: Vec<TableRow> = Vec::with_capacity(row_count);
    for (position, row) in element.children.iter().enumerate() {
        let index = parse_ordinal(row, position, path)?;
        if rows.iter().any(|existing| existing.index == index) {
            return Err(StructuralError::new(
                path,
                format!("duplicate row index {index}"),
            ));
        }
        let params = parse_members(row, &format!("{path}.{index}"))?;
        rows.push(TableRow { index, params });
    }
    rows.sort_by_key(|row| row.index);

    Ok(ParamNode::Rows(rows))
}

fn parse_members(element: &Element, path: &str) -> DiscoveryResult<BTreeMap<String, ParamNode>> {
    let mut members = BTreeMap::new();
    for child in &element.children {
        let member_path = child_path(path, &child.tag)?;
        let node = parse_parameter(child, &member_path)?;
        insert_unique(&mut members, child.tag.clone(), node, path)?;
    }
    Ok(members)
}

fn parse_parameter(element: &Element, path: &str) -> DiscoveryResult<ParamNode> {
    let unit = element.attr("unit");
    if element.children.is_empty() {
        return Ok(ParamNode::Scalar(ParamValue {
            value: element.trimmed_text().map(str::to_string),
            unit: unit.map(str::to_string),
            reference: non_blank_attr(element, "ref"),
            ordinal: None,
        }));
    }

    let entry_count = element
        .children
        .iter()
        .filter(|child| child.tag == ENTRY_TAG)
        .count();
    if entry_count == 0 {
        return parse_container(element, path);
    }
    if entry_count != element.children.len() {
        return Err(StructuralError::new(
            path,
            "Entry elements cannot be mixed with other children",
        ));
    }

    let mut values: Vec<ParamValue> = Vec::with_capacity(entry_count);
    for (position, child) in element.children.iter().enumerate() {
        let ordinal = parse_ordinal(child, position, path)?;
        if values.iter().any(|value| value.ordinal == Some(ordinal)) {
            return Err(StructuralError::new(
                path,
                format!("duplicate entry index {ordinal}"),
            ));
        }
        let (value, reference) = entry_payload(child, path)?;
        values.push(ParamValue {
            value,
            unit: child.attr("unit").or(unit).map(str::to_string),
            reference,
            ordinal: Some(ordinal),
        });
    }
    values.sort_by_key(|value| value.ordinal);

    if values.len() == 1 {
        return Ok(ParamNode::Scalar(values.remove(0)));
    }
    Ok(ParamNode::List(values))
}

fn all_entries(element: &Element) -> bool {
    element.children.iter().all(|child| child.tag == ENTRY_TAG)
}

fn entry_payload(
    entry: &Element,
    path: &str,
) -> DiscoveryResult<(Option<String>, Option<String>)> {
    let value = entry.trimmed_text().map(str::to_string);
    let reference = non_blank_attr(entry, "ref");
    if reference.is_some() && value.is_none() {
        return Err(StructuralError::new(
            path,
            "entry carries a reference but no value",
        ));
    }
    Ok((value, reference))
}

/// Reads the `index` attribute, defaulting to the 1-based position.
fn parse_ordinal(element: &Element, position: usize, path: &str) -> DiscoveryResult<u32> {
    match element.attr("index") {
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(index) if index > 0 => Ok(index),
            _ => Err(StructuralError::new(
                path,
                format!("index `{raw}` must be a positive integer"),
            )),
        },
        None => u32::try_from(position + 1)
            .map_err(|_| StructuralError::new(path, "too many sibling elements")),
    }
}

fn non_blank_attr(element: &Element, name: &str) -> Option<String> {
    element
        .attr(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn child_path(parent: &str, name: &str) -> DiscoveryResult<String> {
    let path = format!("{parent}.{name}");
    if !is_valid_node_name(name) {
        return Err(StructuralError::new(
            path,
            "names must be non-empty and contain neither '.' nor whitespace",
        ));
    }
    Ok(path)
}

fn insert_unique<V>(
    map: &mut BTreeMap<String, V>,
    key: String,
    value: V,
    parent: &str,
) -> DiscoveryResult<()> {
    if map.contains_key(&key) {
        return Err(StructuralError::new(
            format!("{parent}.{key}"),
            "duplicate sibling name",
        ));
    }
    map.insert(key, value);
    Ok(())
}
