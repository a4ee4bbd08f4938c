use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::record::EntityKind;

pub const DEFAULT_ENCODING: &str = "ibm866";
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// How a canonical column is coerced from its legacy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Id,
    Bool,
    Text,
    Real,
    /// Reference to a unit by legacy name or legacy id.
    UnitRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub legacy: String,
    pub canonical: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FieldKind>,
}

impl FieldMapping {
    pub fn new(legacy: &str, canonical: &str) -> Self {
        Self {
            legacy: legacy.to_string(),
            canonical: canonical.to_string(),
            kind: None,
        }
    }

    pub fn typed(legacy: &str, canonical: &str, kind: FieldKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::new(legacy, canonical)
        }
    }

    /// Explicit kind, or the one implied by the canonical name.
    pub fn effective_kind(&self) -> FieldKind {
        if let Some(k) = self.kind {
            return k;
        }
        let c = self.canonical.as_str();
        if c == "id" || c.ends_with("_id") {
            FieldKind::Id
        } else if c.starts_with("is_") {
            FieldKind::Bool
        } else if c == "price" || c == "rate" {
            FieldKind::Real
        } else {
            FieldKind::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindConfig {
    /// Legacy table file name, matched case-insensitively.
    pub file: String,
    pub fields: Vec<FieldMapping>,
}

impl KindConfig {
    pub fn legacy_name_for(&self, canonical: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.canonical == canonical)
            .map(|f| f.legacy.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportConfig {
    pub encoding: String,
    pub batch_size: usize,
    pub kinds: BTreeMap<EntityKind, KindConfig>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        use FieldKind::UnitRef;
        let mut kinds = BTreeMap::new();
        kinds.insert(
            EntityKind::Units,
            KindConfig {
                file: "UNITS.DBF".into(),
                fields: vec![FieldMapping::new("ID", "id"), FieldMapping::new("NAME", "name")],
            },
        );
        kinds.insert(
            EntityKind::Materials,
            KindConfig {
                file: "MATERIAL.DBF".into(),
                fields: vec![
                    FieldMapping::new("ID", "id"),
                    FieldMapping::new("NAME", "name"),
                    FieldMapping::typed("UNIT", "unit_id", UnitRef),
                    FieldMapping::new("PRICE", "price"),
                ],
            },
        );
        kinds.insert(
            EntityKind::Works,
            KindConfig {
                file: "WORKS.DBF".into(),
                fields: vec![
                    FieldMapping::new("ID", "id"),
                    FieldMapping::new("CODE", "code"),
                    FieldMapping::new("NAME", "name"),
                    FieldMapping::typed("UNIT", "unit_id", UnitRef),
                    FieldMapping::new("PRICE", "price"),
                    FieldMapping::new("ISGROUP", "is_group"),
                    FieldMapping::new("PARENT", "parent_id"),
                ],
            },
        );
        kinds.insert(
            EntityKind::Composition,
            KindConfig {
                file: "COMPOS.DBF".into(),
                fields: vec![
                    FieldMapping::new("WORK_ID", "work_id"),
                    FieldMapping::new("MAT_ID", "material_id"),
                    FieldMapping::new("COSTITEM", "cost_item"),
                    FieldMapping::new("NORM", "rate"),
                    FieldMapping::typed("UNIT", "unit_id", UnitRef),
                    FieldMapping::new("PRICE", "price"),
                ],
            },
        );
        Self {
            encoding: DEFAULT_ENCODING.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            kinds,
        }
    }
}

impl ImportConfig {
    /// Reads a JSON config file. Keys left out fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.to_string_lossy()))?;
        let cfg: ImportConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.to_string_lossy()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ImportError> {
        if self.batch_size == 0 {
            return Err(ImportError::Config("batchSize must be at least 1".into()));
        }
        self.text_encoding()?;
        Ok(())
    }

    pub fn text_encoding(&self) -> Result<&'static Encoding, ImportError> {
        Encoding::for_label(self.encoding.trim().as_bytes())
            .ok_or_else(|| ImportError::Config(format!("unknown encoding '{}'", self.encoding)))
    }

    pub fn kind(&self, kind: EntityKind) -> Result<&KindConfig, ImportError> {
        self.kinds
            .get(&kind)
            .ok_or_else(|| ImportError::UnknownEntityKind(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_kind_inferred_from_canonical_name() {
        assert_eq!(FieldMapping::new("X", "id").effective_kind(), FieldKind::Id);
        assert_eq!(FieldMapping::new("X", "work_id").effective_kind(), FieldKind::Id);
        assert_eq!(FieldMapping::new("X", "is_group").effective_kind(), FieldKind::Bool);
        assert_eq!(FieldMapping::new("X", "rate").effective_kind(), FieldKind::Real);
        assert_eq!(FieldMapping::new("X", "code").effective_kind(), FieldKind::Text);
        assert_eq!(
            FieldMapping::typed("X", "unit_id", FieldKind::UnitRef).effective_kind(),
            FieldKind::UnitRef
        );
    }

    #[test]
    fn partial_json_keeps_default_kinds() {
        let cfg: ImportConfig = serde_json::from_str(r#"{ "batchSize": 25 }"#).expect("parse");
        assert_eq!(cfg.batch_size, 25);
        assert_eq!(cfg.encoding, DEFAULT_ENCODING);
        assert!(cfg.kind(EntityKind::Composition).is_ok());
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let cfg = ImportConfig {
            encoding: "klingon".into(),
            ..ImportConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ImportError::Config(_))));
    }
}
