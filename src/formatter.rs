//! Projects nested result rows onto flattened grid columns.
//!
//! A grid without nested-row support shows a child dataset by stacking the
//! values of each child row inside one cell, separated by a line separator.
//! Sibling columns that have fewer values are padded with blank lines so every
//! cell of a row ends up with the same number of lines.

use ahash::AHashMap;
use rayon::prelude::*;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::cell::{format_number, safe_encode, CellValue};
use crate::config::FormatterSettings;
use crate::schema::{leaf_fields, FlattenedColumn};

/// `row index → (field → raw cell)`, recording which nested row produced each value.
pub type DiagnosticGrid = AHashMap<usize, AHashMap<String, CellValue>>;

#[derive(Debug, Clone, PartialEq)]
pub enum FormattedValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FormattedValue {
    fn from_cell(cell: &CellValue) -> Self {
        match cell {
            CellValue::Bool(b) => FormattedValue::Bool(*b),
            CellValue::Number(n) => FormattedValue::Number(*n),
            CellValue::Text(s) => FormattedValue::Text(s.clone()),
            CellValue::Missing => FormattedValue::Text(String::new()),
            CellValue::Struct(_) | CellValue::List(_) => FormattedValue::Text(cell.to_text()),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            FormattedValue::Bool(b) => b.to_string(),
            FormattedValue::Number(n) => format_number(*n),
            FormattedValue::Text(s) => s.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FormattedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for FormattedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FormattedValue::Bool(b) => serializer.serialize_bool(*b),
            FormattedValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serializer.serialize_i64(*n as i64)
            }
            FormattedValue::Number(n) => serializer.serialize_f64(*n),
            FormattedValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// One flat grid row: `field → value`, in flattened leaf order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormattedRow {
    fields: Vec<(String, FormattedValue)>,
}

impl FormattedRow {
    pub fn get(&self, field: &str) -> Option<&FormattedValue> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    /// Text of a field; empty when the field is absent.
    pub fn text(&self, field: &str) -> String {
        self.get(field).map(FormattedValue::to_text).unwrap_or_default()
    }

    /// Replaces the value of `field`, appending it when the row does not have it yet.
    pub fn set(&mut self, field: &str, value: FormattedValue) {
        match self.fields.iter_mut().find(|(k, _)| k == field) {
            Some((_, v)) => *v = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FormattedValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for FormattedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
struct LeafCell {
    value: FormattedValue,
    lines: usize,
}

/// Everything the recursion has produced so far. It is handed down and
/// back up through every call instead of living in shared state.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    cells: AHashMap<String, LeafCell>,
    grid: DiagnosticGrid,
}

impl Accumulator {
    fn lines(&self, field: &str) -> usize {
        self.cells.get(field).map(|c| c.lines).unwrap_or(0)
    }
}

/// Formats one raw row against a set of flattened columns.
#[derive(Debug, Clone)]
pub struct RowFormatter {
    fields: Vec<String>,
    acc: Accumulator,
}

impl RowFormatter {
    pub fn new(columns: &[FlattenedColumn], row: &CellValue) -> Self {
        Self::with_settings(columns, row, &FormatterSettings::default())
    }

    pub fn with_settings(columns: &[FlattenedColumn], row: &CellValue, settings: &FormatterSettings) -> Self {
        let (acc, _) = format_row(settings, columns, row, 0, Accumulator::default());
        Self {
            fields: leaf_fields(columns),
            acc,
        }
    }

    /// The flat row, keyed by leaf field in column order.
    pub fn row(&self) -> FormattedRow {
        let fields = self
            .fields
            .iter()
            .filter_map(|f| self.acc.cells.get(f).map(|c| (f.clone(), c.value.clone())))
            .collect();
        FormattedRow { fields }
    }

    pub fn grid(&self) -> &DiagnosticGrid {
        &self.acc.grid
    }

    /// Number of rendered lines a leaf field ended up with.
    pub fn line_count(&self, field: &str) -> Option<usize> {
        self.acc.cells.get(field).map(|c| c.lines)
    }
}

/// Formats `row` against `columns` and returns the number of lines the tallest
/// column produced. Leaf columns that produced fewer lines in this call are
/// padded up to that height.
pub fn format_row(
    settings: &FormatterSettings,
    columns: &[FlattenedColumn],
    row: &CellValue,
    row_index: usize,
    mut acc: Accumulator,
) -> (Accumulator, usize) {
    // Every leaf reached from this row, group descendants included.
    let mut before: Vec<(String, usize)> = Vec::new();
    let mut max_child_len = 0;

    for column in columns {
        for field in leaf_fields(std::slice::from_ref(column)) {
            let prior = acc.lines(&field);
            before.push((field, prior));
        }
        let (next, lines) = format_cell(settings, column, row.field(&column.leaf_id), row_index, acc);
        acc = next;
        max_child_len = max_child_len.max(lines);
    }

    for (field, prior) in &before {
        if let Some(cell) = acc.cells.get_mut(field) {
            let contributed = cell.lines - prior;
            if max_child_len > contributed {
                pad(cell, max_child_len - contributed, &settings.padding_separator);
            }
        }
    }

    (acc, max_child_len)
}

/// Formats one cell and returns how many lines it contributed.
pub fn format_cell(
    settings: &FormatterSettings,
    column: &FlattenedColumn,
    cell: &CellValue,
    row_index: usize,
    mut acc: Accumulator,
) -> (Accumulator, usize) {
    if let Some(children) = &column.children {
        let mut lines = 0;
        for (idx, child) in child_rows(cell).iter().enumerate() {
            let (next, child_lines) = format_row(settings, children, child, row_index + idx, acc);
            acc = next;
            lines += child_lines;
        }
        return (acc, lines);
    }

    let cell = if column.is_raw_html {
        cell.clone()
    } else {
        safe_encode(cell)
    };
    let value = FormattedValue::from_cell(&cell);
    match acc.cells.get_mut(&column.field) {
        None => {
            acc.cells.insert(column.field.clone(), LeafCell { value, lines: 1 });
        }
        Some(existing) => {
            let joined = format!(
                "{}{}{}",
                existing.value.to_text(),
                settings.line_separator,
                value.to_text()
            );
            existing.value = FormattedValue::Text(joined);
            existing.lines += 1;
        }
    }
    acc.grid
        .entry(row_index)
        .or_default()
        .insert(column.field.clone(), cell);
    (acc, 1)
}

/// The child rows of a group cell. A group always yields at least one row.
fn child_rows(cell: &CellValue) -> Vec<CellValue> {
    let mut rows = match (cell.get("Row"), cell) {
        (Some(CellValue::List(items)), _) => items.clone(),
        (Some(row), _) if row.is_truthy() => vec![row.clone()],
        (_, CellValue::List(items)) => items.clone(),
        _ => vec![cell.clone()],
    };
    if rows.is_empty() {
        rows.push(CellValue::Struct(Vec::new()));
    }
    rows
}

// `delta + 1` empty segments joined by the separator, i.e. `delta` blank lines.
fn pad(cell: &mut LeafCell, delta: usize, separator: &str) {
    let padding = vec![""; delta + 1].join(separator);
    cell.value = FormattedValue::Text(format!("{}{}", cell.value.to_text(), padding));
    cell.lines += delta;
}

/// Counts the rendered lines of a formatted value.
pub fn segment_count(text: &str, settings: &FormatterSettings) -> usize {
    text.split(settings.line_separator.as_str())
        .map(|part| part.split(settings.padding_separator.as_str()).count())
        .sum()
}

pub fn format_rows(columns: &[FlattenedColumn], rows: &[CellValue], settings: &FormatterSettings) -> Vec<FormattedRow> {
    rows.iter()
        .map(|row| RowFormatter::with_settings(columns, row, settings).row())
        .collect()
}

/// Same as [`format_rows`], spread across the current rayon pool.
pub fn format_rows_par(
    columns: &[FlattenedColumn],
    rows: &[CellValue],
    settings: &FormatterSettings,
) -> Vec<FormattedRow> {
    rows.par_iter()
        .map(|row| RowFormatter::with_settings(columns, row, settings).row())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{flatten, SchemaNode};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn settings() -> FormatterSettings {
        FormatterSettings {
            line_separator: "|".into(),
            padding_separator: "~".into(),
        }
    }

    fn schema() -> SchemaNode {
        SchemaNode::group(
            "root",
            vec![
                SchemaNode::leaf("Name", "xs:string"),
                SchemaNode::group("Children", vec![SchemaNode::leaf("Item", "xs:string")]),
            ],
        )
    }

    #[test]
    fn child_rows_stack_and_siblings_pad() {
        let columns = flatten(&schema());
        let row = CellValue::from_json(&json!({"Name": "A", "Children": {"Row": [{"Item": "x"}, {"Item": "y"}]}}));
        let f = RowFormatter::with_settings(&columns, &row, &settings());
        let out = f.row();

        assert_eq!(out.text("Name"), "A~");
        assert_eq!(out.text("Children_Item"), "x|y");
        assert_eq!(out.text("__hpcc_rowNum"), "~");
        assert_eq!(f.line_count("Name"), Some(2));
        assert_eq!(f.line_count("Children_Item"), Some(2));
    }

    #[test]
    fn short_column_gets_delta_blank_lines() {
        let columns = flatten(&schema());
        let row = CellValue::from_json(&json!({
            "Name": "A",
            "Children": {"Row": [{"Item": "x"}, {"Item": "y"}, {"Item": "z"}]}
        }));
        let out = RowFormatter::with_settings(&columns, &row, &settings()).row();
        assert_eq!(out.text("Name"), "A~~");
        assert_eq!(segment_count(&out.text("Name"), &settings()), 3);
        assert_eq!(segment_count(&out.text("Children_Item"), &settings()), 3);
    }

    #[test]
    fn missing_group_still_renders_one_blank_row() {
        let columns = flatten(&schema());
        let row = CellValue::from_json(&json!({"Name": "A"}));
        let f = RowFormatter::with_settings(&columns, &row, &settings());
        assert_eq!(f.row().text("Children_Item"), "");
        assert_eq!(f.line_count("Children_Item"), Some(1));
        assert_eq!(f.row().text("Name"), "A");
    }

    #[test]
    fn empty_row_list_synthesises_a_blank_child() {
        let columns = flatten(&schema());
        let row = CellValue::from_json(&json!({"Name": "A", "Children": {"Row": []}}));
        let f = RowFormatter::with_settings(&columns, &row, &settings());
        assert_eq!(f.line_count("Children_Item"), Some(1));
    }

    #[test]
    fn scalars_keep_their_type_until_joined() {
        let root = SchemaNode::group(
            "root",
            vec![
                SchemaNode::leaf("N", "xs:integer"),
                SchemaNode::leaf("B", "xs:boolean"),
                SchemaNode::leaf("H__html", "xs:string"),
                SchemaNode::leaf("S", "xs:string"),
            ],
        );
        let columns = flatten(&root);
        let row = CellValue::from_json(&json!({"N": 42, "B": true, "H__html": "<i>x</i>", "S": "<i>"}));
        let out = RowFormatter::new(&columns, &row).row();
        assert_eq!(out.get("N"), Some(&FormattedValue::Number(42.0)));
        assert_eq!(out.get("B"), Some(&FormattedValue::Bool(true)));
        assert_eq!(out.text("H__html"), "<i>x</i>");
        assert_eq!(out.text("S"), "&lt;i&gt;");
    }

    #[test]
    fn nested_groups_stay_aligned() {
        let root = SchemaNode::group(
            "root",
            vec![
                SchemaNode::leaf("Name", "xs:string"),
                SchemaNode::group(
                    "Orders",
                    vec![
                        SchemaNode::leaf("Id", "xs:string"),
                        SchemaNode::group("Lines", vec![SchemaNode::leaf("Sku", "xs:string")]),
                    ],
                ),
            ],
        );
        let columns = flatten(&root);
        let row = CellValue::from_json(&json!({
            "Name": "A",
            "Orders": {"Row": [
                {"Id": "o1", "Lines": {"Row": [{"Sku": "s1"}, {"Sku": "s2"}]}},
                {"Id": "o2", "Lines": {"Row": [{"Sku": "s3"}]}}
            ]}
        }));
        let f = RowFormatter::with_settings(&columns, &row, &settings());
        let out = f.row();
        assert_eq!(out.text("Orders_Lines_Sku"), "s1|s2|s3");
        assert_eq!(out.text("Orders_Id"), "o1~|o2");
        assert_eq!(out.text("Name"), "A~~");
        for field in leaf_fields(&columns) {
            assert_eq!(f.line_count(&field), Some(3), "{field}");
        }
    }

    #[test]
    fn sibling_groups_pad_to_the_taller_one() {
        let root = SchemaNode::group(
            "root",
            vec![
                SchemaNode::leaf("Name", "xs:string"),
                SchemaNode::group("Orders", vec![SchemaNode::leaf("Id", "xs:string")]),
                SchemaNode::group("Tags", vec![SchemaNode::leaf("Tag", "xs:string")]),
            ],
        );
        let columns = flatten(&root);
        let row = CellValue::from_json(&json!({
            "Name": "A",
            "Orders": {"Row": [{"Id": "1"}, {"Id": "2"}, {"Id": "3"}]},
            "Tags": {"Row": [{"Tag": "t"}]}
        }));
        let f = RowFormatter::with_settings(&columns, &row, &settings());
        let out = f.row();
        assert_eq!(out.text("Name"), "A~~");
        assert_eq!(out.text("Orders_Id"), "1|2|3");
        assert_eq!(out.text("Tags_Tag"), "t~~");
        for field in leaf_fields(&columns) {
            assert_eq!(f.line_count(&field), Some(3), "{field}");
            assert_eq!(segment_count(&out.text(&field), &settings()), 3, "{field}");
        }
    }

    #[test]
    fn empty_group_pads_against_a_populated_sibling() {
        let root = SchemaNode::group(
            "root",
            vec![
                SchemaNode::group(
                    "Orders",
                    vec![
                        SchemaNode::leaf("Id", "xs:string"),
                        SchemaNode::group("Lines", vec![SchemaNode::leaf("Sku", "xs:string")]),
                    ],
                ),
                SchemaNode::group("Tags", vec![SchemaNode::leaf("Tag", "xs:string")]),
            ],
        );
        let columns = flatten(&root);
        let row = CellValue::from_json(&json!({"Orders": {"Row": []}, "Tags": {"Row": [{"Tag": "a"}, {"Tag": "b"}]}}));
        let f = RowFormatter::with_settings(&columns, &row, &settings());
        assert_eq!(f.row().text("Orders_Lines_Sku"), "~");
        for field in leaf_fields(&columns) {
            assert_eq!(f.line_count(&field), Some(2), "{field}");
        }
    }

    #[test]
    fn grid_records_the_contributing_row_index() {
        let columns = flatten(&schema());
        let row = CellValue::from_json(&json!({"Name": "A", "Children": {"Row": [{"Item": "x"}, {"Item": "y"}]}}));
        let f = RowFormatter::new(&columns, &row);
        assert_eq!(f.grid()[&0]["Name"], CellValue::text("A"));
        assert_eq!(f.grid()[&0]["Children_Item"], CellValue::text("x"));
        assert_eq!(f.grid()[&1]["Children_Item"], CellValue::text("y"));
    }

    #[test]
    fn row_serialises_in_column_order() {
        let columns = flatten(&schema());
        let row = CellValue::from_json(&json!({"Name": "A"}));
        let out = RowFormatter::with_settings(&columns, &row, &settings()).row();
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"{"__hpcc_rowNum":"","Name":"A","Children_Item":""}"#
        );
    }
}
