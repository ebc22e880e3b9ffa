//! Decoding of raw result rows.
//!
//! Rows arrive either as the JSON `Result.Row` array of a result response or as
//! an XML `<Dataset>` document. Both are turned into [`CellValue`] trees here so
//! nothing downstream has to re-inspect the wire format.

use serde_json::Value;

use crate::cell::CellValue;
use crate::error::{Error, Result};
use crate::xml::{parse_document, XmlElement};

const ROW: &str = "Row";

/// Decodes the rows of an XML dataset, e.g.
/// `<Dataset name="Result 1"><Row><Name>A</Name></Row></Dataset>`.
///
/// The `<Dataset>` element may be wrapped in other elements; when there is none
/// the document root is treated as the dataset.
pub fn rows_from_xml(xml: &str) -> Result<Vec<CellValue>> {
    let doc = parse_document(xml)?;
    let dataset = doc.find("Dataset").unwrap_or(&doc);
    Ok(dataset.children_named(ROW).map(element_to_cell).collect())
}

/// Decodes rows from JSON: a bare array of rows, an object carrying a `Row`
/// array, or a full `{"Result": {"Row": [...]}}` envelope.
pub fn rows_from_json(json: &str) -> Result<Vec<CellValue>> {
    let value: Value = serde_json::from_str(json)?;
    rows_from_value(&value)
}

pub fn rows_from_value(value: &Value) -> Result<Vec<CellValue>> {
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(map) => match (map.get(ROW), map.get("Result")) {
            (Some(Value::Array(rows)), _) => rows,
            (_, Some(result)) => return rows_from_value(result),
            _ => return Err(Error::Schema("json payload carries no Row array".into())),
        },
        _ => return Err(Error::Schema("json payload is not a row set".into())),
    };
    Ok(rows.iter().map(CellValue::from_json).collect())
}

/// Converts one XML element into a cell.
///
/// Leaf elements become text. Elements with children become structs; members
/// named `Row`, or repeated under the same parent, are collected into lists so
/// child datasets look the same as they do in the JSON payload.
pub fn element_to_cell(element: &XmlElement) -> CellValue {
    if element.children.is_empty() {
        return CellValue::Text(element.text.clone());
    }

    let mut fields: Vec<(String, CellValue)> = Vec::new();
    for child in &element.children {
        if fields.iter().any(|(k, _)| k == &child.name) {
            continue;
        }
        let siblings: Vec<&XmlElement> = element.children_named(&child.name).collect();
        let value = if child.name == ROW || siblings.len() > 1 {
            CellValue::List(siblings.into_iter().map(element_to_cell).collect())
        } else {
            element_to_cell(child)
        };
        fields.push((child.name.clone(), value));
    }
    CellValue::Struct(fields)
}
