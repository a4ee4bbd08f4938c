use std::fmt;
use std::str::FromStr;

use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};

use crate::error::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Units,
    Materials,
    Works,
    Composition,
}

impl EntityKind {
    /// Dictionaries first, then the documents that reference them.
    pub const IMPORT_ORDER: [EntityKind; 4] = [
        EntityKind::Units,
        EntityKind::Materials,
        EntityKind::Works,
        EntityKind::Composition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Units => "units",
            EntityKind::Materials => "materials",
            EntityKind::Works => "works",
            EntityKind::Composition => "composition",
        }
    }

    /// Target tables owned by this kind, in the order they are truncated.
    pub fn target_tables(self) -> &'static [&'static str] {
        match self {
            EntityKind::Units => &["units"],
            EntityKind::Materials => &["materials"],
            EntityKind::Works => &["works"],
            EntityKind::Composition => &["specifications", "work_composition"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "units" => Ok(EntityKind::Units),
            "materials" => Ok(EntityKind::Materials),
            "works" => Ok(EntityKind::Works),
            "composition" => Ok(EntityKind::Composition),
            other => Err(ImportError::UnknownEntityKind(other.to_string())),
        }
    }
}

/// A single field value as read from a legacy table.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Bytes that did not decode in the configured encoding.
    Bytes(Vec<u8>),
}

impl RawValue {
    /// Textual form used for key coercion. Integral numbers render without a
    /// fractional part so `12` and `"12"` agree.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Null => None,
            RawValue::Text(s) => Some(s.clone()),
            RawValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            RawValue::Bool(b) => Some(if *b { "true".into() } else { "false".into() }),
            RawValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            RawValue::Bytes(b) => b.iter().all(|c| c.is_ascii_whitespace()),
            _ => false,
        }
    }
}

/// One legacy row: field name to raw value, in file column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: RawValue) {
        self.fields.push((name.into(), value));
    }

    pub fn with(mut self, name: impl Into<String>, value: RawValue) -> Self {
        self.push(name, value);
        self
    }

    /// Legacy field names are matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(RawValue::as_text)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A typed target-schema value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        v.map(Value::Integer).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(v) => ToSqlOutput::from(*v),
            Value::Real(v) => ToSqlOutput::from(*v),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Bool(b) => ToSqlOutput::from(*b),
        })
    }
}

/// A mapped record keyed by canonical column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformedRecord {
    fields: Vec<(String, Value)>,
}

impl TransformedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, replacing an earlier value for the same name.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(Value::as_i64)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
