//! Reads the XSD document a result endpoint returns next to its rows.

use ahash::AHashMap;
use tracing::debug;

use super::SchemaNode;
use crate::error::{Error, Result};
use crate::xml::{parse_document, XmlElement};

const DATASET: &str = "Dataset";
const ROW: &str = "Row";

struct SimpleType {
    base: String,
    max_length: Option<u32>,
}

/// Parses an XSD into a schema tree rooted at the dataset element.
///
/// Record wrappers (`<Row>` elements) are collapsed, so a child dataset
/// `Children/Row/Item` becomes the group `Children` holding the leaf `Item`.
pub fn schema_from_xsd(xsd: &str) -> Result<SchemaNode> {
    let doc = parse_document(xsd)?;
    if doc.name != "schema" {
        return Err(Error::Schema(format!("expected an xs:schema document, found <{}>", doc.name)));
    }

    let simple_types: AHashMap<String, SimpleType> = doc
        .children_named("simpleType")
        .filter_map(|st| Some((st.attr("name")?.to_string(), restriction_of(st)?)))
        .collect();

    let dataset = doc
        .children_named("element")
        .find(|e| e.attr("name") == Some(DATASET))
        .or_else(|| doc.children_named("element").next())
        .ok_or_else(|| Error::Schema("schema declares no top-level element".into()))?;

    let root = element_node(dataset, &simple_types);
    debug!(root = %root.name, fields = root.children.len(), "parsed result schema");
    Ok(root)
}

fn element_node(element: &XmlElement, types: &AHashMap<String, SimpleType>) -> SchemaNode {
    let mut node = SchemaNode {
        name: element.attr("name").unwrap_or_default().to_string(),
        keyed: is_keyed(element),
        ..Default::default()
    };

    if let Some(type_name) = element.attr("type") {
        let local = type_name.rsplit(':').next().unwrap_or(type_name);
        match types.get(local) {
            Some(simple) => {
                node.type_name = Some(simple.base.clone());
                node.max_length = simple.max_length;
            }
            None => node.type_name = Some(type_name.to_string()),
        }
    } else if let Some(simple) = element.child("simpleType").and_then(restriction_of) {
        node.type_name = Some(simple.base);
        node.max_length = simple.max_length;
    } else if let Some(complex) = element.child("complexType") {
        let mut children = Vec::new();
        collect_elements(complex, types, &mut children);
        node.children = collapse_row(children);
    }
    node
}

fn collect_elements(container: &XmlElement, types: &AHashMap<String, SimpleType>, out: &mut Vec<SchemaNode>) {
    for child in &container.children {
        match child.name.as_str() {
            "element" => out.push(element_node(child, types)),
            "sequence" | "all" | "choice" | "complexType" => collect_elements(child, types, out),
            _ => {}
        }
    }
}

fn collapse_row(children: Vec<SchemaNode>) -> Vec<SchemaNode> {
    match children.as_slice() {
        [only] if only.name == ROW && only.type_name.is_none() => only.children.clone(),
        _ => children,
    }
}

fn restriction_of(simple_type: &XmlElement) -> Option<SimpleType> {
    let restriction = simple_type.child("restriction")?;
    Some(SimpleType {
        base: restriction.attr("base").unwrap_or("xs:string").to_string(),
        max_length: restriction
            .child("maxLength")
            .or_else(|| restriction.child("length"))
            .and_then(|l| l.attr("value"))
            .and_then(|v| v.parse().ok()),
    })
}

fn is_keyed(element: &XmlElement) -> bool {
    let flag = |e: &XmlElement| e.attr("keyed") == Some("true");
    flag(element)
        || element
            .child("annotation")
            .and_then(|a| a.child("appinfo"))
            .map(flag)
            .unwrap_or(false)
}
