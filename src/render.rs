//! Per-column cell rendering for the grid.
//!
//! Script columns are never evaluated. Their content is shown inside the same
//! error cell a failed evaluation used to produce.

use tracing::warn;

use crate::cell::{encode_text, safe_encode, CellValue};

const INDENT: &str = "&nbsp;&nbsp;&nbsp;&nbsp;";
const TABLE_OPEN: &str = "<table border=\"1\" cellspacing=\"0\" width=\"100%\">";
const SCRIPT_NOTICE: &str = "script cells are not evaluated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRender {
    /// Already-encoded scalar; the first tab becomes an indent.
    Escaped,
    RawHtml,
    Script,
    /// Group column: the nested value is drawn as an HTML table.
    NestedTable,
}

impl CellRender {
    pub fn render(&self, value: &CellValue) -> String {
        match self {
            CellRender::Escaped => match value {
                CellValue::Text(s) => s.replacen('\t', INDENT, 1),
                other => other.to_text(),
            },
            CellRender::RawHtml => value.to_text(),
            CellRender::Script => script_cell(&value.to_text()),
            CellRender::NestedTable => render_table(value),
        }
    }
}

pub fn script_cell(content: &str) -> String {
    warn!(len = content.len(), "refusing to evaluate script cell");
    format!(
        "<b>Error:</b>&nbsp;&nbsp;{}<br>{}",
        encode_text(SCRIPT_NOTICE),
        encode_text(content)
    )
}

/// Renders a nested cell as an HTML table. Child datasets (`{"Row": [...]}`)
/// are unwrapped so the `Row` key never shows up as a header.
pub fn render_table(cell: &CellValue) -> String {
    let mut out = String::new();
    write_table(cell, &mut out);
    out
}

fn write_table(cell: &CellValue, out: &mut String) {
    if cell.is_child_dataset() {
        if let CellValue::Struct(fields) = cell {
            for (_, value) in fields {
                write_table(value, out);
            }
        }
        return;
    }

    // Nested structs under a struct land after the table, not inside it.
    let mut trailing = String::new();
    out.push_str(TABLE_OPEN);
    match cell {
        CellValue::Struct(fields) => {
            out.push_str("<tr>");
            for (key, _) in fields {
                push_tag(out, "th", &encode_text(key));
            }
            out.push_str("</tr><tr>");
            for (_, value) in fields {
                if value.is_structured() {
                    write_table(value, &mut trailing);
                } else {
                    push_tag(out, "td", &safe_encode(value).to_text());
                }
            }
            out.push_str("</tr>");
        }
        CellValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                if item.is_scalar() {
                    out.push_str("<tr>");
                    push_tag(out, "td", &safe_encode(item).to_text());
                    out.push_str("</tr>");
                    continue;
                }
                let fields: &[(String, CellValue)] = match item {
                    CellValue::Struct(fields) => fields.as_slice(),
                    _ => &[],
                };
                if i == 0 {
                    out.push_str("<tr>");
                    for (key, _) in fields {
                        push_tag(out, "th", &encode_text(key));
                    }
                    out.push_str("</tr>");
                }
                out.push_str("<tr>");
                for (key, value) in fields {
                    push_tag(out, "td", &list_member(key, value));
                }
                out.push_str("</tr>");
            }
        }
        _ => {}
    }
    out.push_str("</table>");
    out.push_str(&trailing);
}

fn list_member(key: &str, value: &CellValue) -> String {
    if !value.is_truthy() {
        String::new()
    } else if value.is_structured() {
        render_table(value)
    } else if key.ends_with("__html") {
        value.to_text()
    } else if key.ends_with("__javascript") {
        script_cell(&value.to_text())
    } else {
        safe_encode(value).to_text()
    }
}

fn push_tag(out: &mut String, tag: &str, inner: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(inner);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}
