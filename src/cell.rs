use quick_xml::escape::escape;
use serde_json::{Map, Number, Value};
use tracing::warn;

/// One raw value from a result row.
///
/// The variant is decided once, when the row is decoded from JSON or XML.
/// Struct members keep the order they had in the payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Struct(Vec<(String, CellValue)>),
    List(Vec<CellValue>),
    #[default]
    Missing,
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    /// Looks up a struct member. Anything that is not a struct has no members.
    pub fn get(&self, key: &str) -> Option<&CellValue> {
        match self {
            CellValue::Struct(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Member lookup that treats absent keys the same as `Missing`.
    pub fn field(&self, key: &str) -> &CellValue {
        static MISSING: CellValue = CellValue::Missing;
        self.get(key).unwrap_or(&MISSING)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, CellValue::Bool(_) | CellValue::Number(_) | CellValue::Text(_))
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, CellValue::Struct(_) | CellValue::List(_))
    }

    /// JavaScript-style truthiness, used when deciding whether a nested table cell is blank.
    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Bool(b) => *b,
            CellValue::Number(n) => *n != 0.0 && !n.is_nan(),
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Struct(_) | CellValue::List(_) => true,
            CellValue::Missing => false,
        }
    }

    /// A child dataset is a struct with exactly one member holding a list,
    /// conventionally `{"Row": [...]}`.
    pub fn is_child_dataset(&self) -> bool {
        match self {
            CellValue::Struct(fields) => {
                fields.len() == 1 && matches!(fields[0].1, CellValue::List(_))
            }
            _ => false,
        }
    }

    /// Plain-text rendering of a scalar. Structured values render as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Missing => String::new(),
            CellValue::Struct(_) | CellValue::List(_) => self.to_json().to_string(),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CellValue::Missing,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => CellValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Array(items) => CellValue::List(items.iter().map(CellValue::from_json).collect()),
            Value::Object(map) => CellValue::Struct(
                map.iter()
                    .map(|(k, v)| (k.clone(), CellValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Missing => Value::Null,
            CellValue::List(items) => Value::Array(items.iter().map(CellValue::to_json).collect()),
            CellValue::Struct(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// HTML-encodes text. Numbers and booleans are safe as they are; structured
/// values are left for the group recursion to take apart.
pub fn safe_encode(cell: &CellValue) -> CellValue {
    match cell {
        CellValue::Bool(_) | CellValue::Number(_) => cell.clone(),
        CellValue::Text(s) => CellValue::Text(escape(s.as_str()).into_owned()),
        CellValue::Struct(_) | CellValue::Missing => cell.clone(),
        CellValue::List(_) => {
            warn!("Unknown cell type:  list");
            cell.clone()
        }
    }
}

/// Escapes a plain string for use inside HTML.
pub fn encode_text(s: &str) -> String {
    escape(s).into_owned()
}
