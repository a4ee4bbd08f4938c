use crate::config::{FieldKind, ImportConfig};
use crate::context::RunContext;
use crate::error::Result;
use crate::record::{EntityKind, RawRecord, RawValue, TransformedRecord, Value};

const TRUTHY: [&str; 5] = ["true", "1", "t", "y", "yes"];
const NON_NEGATIVE_MASK: u32 = 0x7FFF_FFFF;

/// Stable synthetic identifier for a legacy key that is not a hex integer.
///
/// CRC-32 of the UTF-8 bytes, masked to the non-negative range. Repeated runs
/// over the same legacy data must produce the same ids, so no seeded hasher.
pub fn synthetic_id(text: &str) -> i64 {
    (crc32fast::hash(text.as_bytes()) & NON_NEGATIVE_MASK) as i64
}

/// Legacy key to target id: unsigned base-16 integer if it parses, synthetic
/// id otherwise. Blank keys have no id.
pub fn coerce_id(value: &RawValue) -> Option<i64> {
    let text = value.as_text()?;
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    // from_str_radix takes a sign; target ids stay non-negative.
    if t.starts_with(['+', '-']) {
        return Some(synthetic_id(t));
    }
    match i64::from_str_radix(t, 16) {
        Ok(v) => Some(v),
        Err(_) => Some(synthetic_id(t)),
    }
}

pub fn coerce_bool(value: &RawValue) -> bool {
    match value {
        RawValue::Bool(b) => *b,
        RawValue::Number(n) => *n == 1.0,
        RawValue::Text(_) | RawValue::Bytes(_) => value
            .as_text()
            .map(|s| {
                let s = s.trim().to_ascii_lowercase();
                TRUTHY.contains(&s.as_str())
            })
            .unwrap_or(false),
        RawValue::Null => false,
    }
}

pub fn coerce_real(value: &RawValue) -> Option<f64> {
    match value {
        RawValue::Number(n) => Some(*n),
        RawValue::Null | RawValue::Bool(_) => None,
        _ => value
            .as_text()
            .and_then(|s| s.trim().replace(',', ".").parse::<f64>().ok()),
    }
}

/// Renames legacy fields to canonical columns and coerces their values,
/// following the mapping table configured for each entity kind.
pub struct FieldMapper<'a> {
    config: &'a ImportConfig,
}

impl<'a> FieldMapper<'a> {
    pub fn new(config: &'a ImportConfig) -> Self {
        Self { config }
    }

    pub fn transform(
        &self,
        raw: &RawRecord,
        kind: EntityKind,
        ctx: &mut RunContext,
    ) -> Result<TransformedRecord> {
        let kind_cfg = self.config.kind(kind)?;
        let mut out = TransformedRecord::new();
        for mapping in &kind_cfg.fields {
            let raw_value = raw.get(&mapping.legacy).unwrap_or(&RawValue::Null);
            let value = match mapping.effective_kind() {
                FieldKind::Id => coerce_id(raw_value).into(),
                FieldKind::Bool if matches!(raw_value, RawValue::Null) => Value::Null,
                FieldKind::Bool => Value::Bool(coerce_bool(raw_value)),
                FieldKind::Real => coerce_real(raw_value).map(Value::Real).unwrap_or(Value::Null),
                FieldKind::UnitRef => self.resolve_unit(raw_value, kind, ctx),
                FieldKind::Text => match raw_value.as_text() {
                    Some(s) => Value::Text(s),
                    None if mapping.canonical == "name" => Value::Text(String::new()),
                    None => Value::Null,
                },
            };
            out.set(mapping.canonical.clone(), value);
        }
        Ok(out)
    }

    fn resolve_unit(&self, raw: &RawValue, kind: EntityKind, ctx: &mut RunContext) -> Value {
        if raw.is_blank() {
            return Value::Null;
        }
        let reference = raw.as_text().unwrap_or_default();
        match ctx.units.resolve(&reference) {
            Some(id) => Value::Integer(id),
            None => {
                ctx.note_unresolved_unit(kind);
                tracing::warn!(%kind, unit = %reference.trim(), "unresolved unit reference");
                Value::Null
            }
        }
    }
}
