//! Schema trees and their flattening into grid columns.

pub mod xsd;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::render::CellRender;

pub const DEFAULT_WIDTH: u32 = 500;
pub const ROW_NUMBER_FIELD: &str = "__hpcc_rowNum";
pub const ROW_NUMBER_LABEL: &str = "##";
pub const ROW_NUMBER_WIDTH: u32 = 54;

const HIDDEN_SUFFIX: &str = "__hidden";
const HTML_SUFFIX: &str = "__html";
const SCRIPT_SUFFIX: &str = "__javascript";

const CHAR_WIDTH: u32 = 9;
const GROUP_PADDING: u32 = 10;
const KEYED_MARKER_WIDTH: u32 = 16;
const MAX_CHARS: u32 = 100;

/// One field or nested group of a result schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaNode {
    pub name: String,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub keyed: bool,
    /// `maxLength` restriction of a string type, when the schema declares one.
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn leaf(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
            ..Default::default()
        }
    }

    pub fn group(name: impl Into<String>, children: Vec<SchemaNode>) -> Self {
        Self {
            name: name.into(),
            children,
            ..Default::default()
        }
    }

    pub fn keyed(mut self) -> Self {
        self.keyed = true;
        self
    }
}

/// What a schema node turns into, decided from its name suffix and shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Hidden,
    RawHtml,
    Script,
    Scalar,
    Group,
}

impl ColumnKind {
    /// `None` for nodes that are neither a typed leaf nor a group.
    pub fn classify(node: &SchemaNode) -> Option<ColumnKind> {
        let name = node.name.as_str();
        if name.ends_with(HIDDEN_SUFFIX) {
            Some(ColumnKind::Hidden)
        } else if !name.is_empty() && node.type_name.is_some() {
            if name.ends_with(HTML_SUFFIX) {
                Some(ColumnKind::RawHtml)
            } else if name.ends_with(SCRIPT_SUFFIX) {
                Some(ColumnKind::Script)
            } else {
                Some(ColumnKind::Scalar)
            }
        } else if !node.children.is_empty() {
            Some(ColumnKind::Group)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub display_name: String,
    pub width: u32,
}

/// Splits a coded name such as `Revenue__120__html` into its label and an
/// explicit pixel width. The final segment is always the marker and is dropped.
pub fn parse_name(name: &str) -> ParsedName {
    let mut parts: Vec<&str> = name.split("__").collect();
    let mut width = DEFAULT_WIDTH;
    if parts.len() >= 3 {
        if let Some(specified) = parse_leading_int(parts[parts.len() - 2]) {
            width = specified;
            parts.pop();
        }
    }
    parts.pop();
    ParsedName {
        display_name: parts.join("__"),
        width,
    }
}

// Leading-digits parse: "120px" reads as 120.
fn parse_leading_int(s: &str) -> Option<u32> {
    let trimmed = s.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Display width in characters for a scalar field.
pub fn calc_width(type_name: &str, name: &str, max_length: Option<u32>) -> u32 {
    let local = type_name.rsplit(':').next().unwrap_or(type_name);
    let type_width = max_length.unwrap_or(match local {
        "boolean" => 5,
        "byte" | "short" | "int" | "integer" | "long" | "nonNegativeInteger"
        | "unsignedByte" | "unsignedShort" | "unsignedInt" | "unsignedLong" => 8,
        "double" | "float" | "decimal" => 12,
        _ => 16,
    });
    (name.chars().count() as u32).max(type_width).min(MAX_CHARS)
}

/// A grid column produced from a schema node.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedColumn {
    /// Unique key: ancestor group names joined by `_`, then the node name.
    pub field: String,
    /// The unprefixed node name, used to look values up in nested rows.
    pub leaf_id: String,
    pub label: String,
    pub width: u32,
    pub keyed: bool,
    pub is_raw_html: bool,
    pub render: CellRender,
    pub children: Option<Vec<FlattenedColumn>>,
}

impl FlattenedColumn {
    pub fn row_number() -> Self {
        Self {
            field: ROW_NUMBER_FIELD.to_string(),
            leaf_id: ROW_NUMBER_FIELD.to_string(),
            label: ROW_NUMBER_LABEL.to_string(),
            width: ROW_NUMBER_WIDTH,
            keyed: false,
            is_raw_html: false,
            render: CellRender::Escaped,
            children: None,
        }
    }

    pub fn is_group(&self) -> bool {
        self.children.is_some()
    }

    /// Generated columns are never sortable.
    pub fn sortable(&self) -> bool {
        false
    }

    /// Header text; keyed columns carry an index marker.
    pub fn header_label(&self) -> String {
        if self.keyed {
            format!("{}<img src='/esp/files/img/index.png' alt='Index' title='Index'>", self.label)
        } else {
            self.label.clone()
        }
    }
}

/// Flattens a schema root into grid columns, led by the `##` row-number column.
pub fn flatten(root: &SchemaNode) -> Vec<FlattenedColumn> {
    let mut columns = vec![FlattenedColumn::row_number()];
    columns.extend(flatten_children(root, ""));
    columns
}

/// Flattens the children of `node`, prefixing every field with `prefix`.
pub fn flatten_children(node: &SchemaNode, prefix: &str) -> Vec<FlattenedColumn> {
    let mut out = Vec::new();
    for child in &node.children {
        let Some(kind) = ColumnKind::classify(child) else {
            trace!(name = %child.name, "dropping schema node with neither type nor children");
            continue;
        };
        let field = format!("{prefix}{}", child.name);
        let column = match kind {
            ColumnKind::Hidden => continue,
            ColumnKind::RawHtml | ColumnKind::Script => {
                let parsed = parse_name(&child.name);
                FlattenedColumn {
                    field,
                    leaf_id: child.name.clone(),
                    label: parsed.display_name,
                    width: parsed.width,
                    keyed: child.keyed,
                    is_raw_html: true,
                    render: if kind == ColumnKind::Script {
                        CellRender::Script
                    } else {
                        CellRender::RawHtml
                    },
                    children: None,
                }
            }
            ColumnKind::Scalar => {
                let type_name = child.type_name.as_deref().unwrap_or_default();
                FlattenedColumn {
                    field,
                    leaf_id: child.name.clone(),
                    label: child.name.clone(),
                    width: calc_width(type_name, &child.name, child.max_length) * CHAR_WIDTH,
                    keyed: child.keyed,
                    is_raw_html: false,
                    render: CellRender::Escaped,
                    children: None,
                }
            }
            ColumnKind::Group => {
                let children = flatten_children(child, &format!("{field}_"));
                if children.is_empty() {
                    continue;
                }
                FlattenedColumn {
                    leaf_id: child.name.clone(),
                    label: child.name.clone(),
                    width: GROUP_PADDING + children.iter().map(|c| c.width).sum::<u32>(),
                    keyed: child.keyed,
                    is_raw_html: false,
                    render: CellRender::NestedTable,
                    children: Some(children),
                    field,
                }
            }
        };
        out.push(with_key_marker(column));
    }
    out
}

fn with_key_marker(mut column: FlattenedColumn) -> FlattenedColumn {
    if column.keyed {
        column.width += KEYED_MARKER_WIDTH;
    }
    column
}

/// Leaf fields in depth-first order. This is the key order of a formatted row.
pub fn leaf_fields(columns: &[FlattenedColumn]) -> Vec<String> {
    let mut out = Vec::new();
    collect_leaf_fields(columns, &mut out);
    out
}

fn collect_leaf_fields(columns: &[FlattenedColumn], out: &mut Vec<String>) {
    for column in columns {
        match &column.children {
            Some(children) => collect_leaf_fields(children, out),
            None => out.push(column.field.clone()),
        }
    }
}
