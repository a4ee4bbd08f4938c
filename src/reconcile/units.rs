use std::collections::HashMap;

use rusqlite::Connection;

use crate::config::KindConfig;
use crate::error::Result;
use crate::mapping::coerce_id;
use crate::record::{RawRecord, RawValue};

/// Two-tier unit canonicalization: normalized name and legacy key both lead
/// to one target id per logical unit.
///
/// The canonical id of a name is the target id of the first row seen with
/// that name, so input order matters and must be stable.
#[derive(Debug, Default, Clone)]
pub struct CanonicalUnitMap {
    by_name: HashMap<String, i64>,
    by_legacy_id: HashMap<String, i64>,
    by_target_id: HashMap<i64, i64>,
}

pub fn normalize_name(name: &str) -> &str {
    name.trim()
}

impl CanonicalUnitMap {
    /// Builds the map from legacy unit rows using the configured `id` and
    /// `name` columns.
    pub fn build(records: &[RawRecord], units_cfg: &KindConfig) -> Self {
        let mut map = Self::default();
        map.extend(records, units_cfg);
        map
    }

    pub fn build_with_fields(records: &[RawRecord], id_field: &str, name_field: &str) -> Self {
        let mut map = Self::default();
        map.extend_with_fields(records, id_field, name_field);
        map
    }

    /// Adds legacy rows to an existing map. Names already present keep
    /// their canonical id; new names follow the first-seen rule.
    pub fn extend(&mut self, records: &[RawRecord], units_cfg: &KindConfig) {
        let id_field = units_cfg.legacy_name_for("id").unwrap_or("ID");
        let name_field = units_cfg.legacy_name_for("name").unwrap_or("NAME");
        self.extend_with_fields(records, id_field, name_field);
    }

    fn extend_with_fields(&mut self, records: &[RawRecord], id_field: &str, name_field: &str) {
        self.drop_renamed(records, id_field, name_field);

        // Pass 1: first row per normalized name defines the canonical id.
        for r in records {
            let Some(target_id) = r.get(id_field).and_then(coerce_id) else {
                continue;
            };
            let name = record_name(r, name_field);
            if name.is_empty() {
                continue;
            }
            self.by_name.entry(name).or_insert(target_id);
        }

        // Pass 2: every legacy key follows its name to the canonical id.
        // Rows without a name are never written, so their keys stay unmapped.
        for r in records {
            let legacy = r.get(id_field).unwrap_or(&RawValue::Null);
            let Some(target_id) = coerce_id(legacy) else {
                continue;
            };
            let name = record_name(r, name_field);
            if name.is_empty() {
                continue;
            }
            let canonical = self.by_name.get(&name).copied().unwrap_or(target_id);
            if let Some(key) = legacy.as_text() {
                self.by_legacy_id.insert(key.trim().to_string(), canonical);
            }
            self.by_target_id.insert(target_id, canonical);
        }
    }

    /// Forgets names already in the map whose id comes back from the source
    /// under a different name. The upsert renames that row, so the old name
    /// must not keep pointing at it.
    fn drop_renamed(&mut self, records: &[RawRecord], id_field: &str, name_field: &str) {
        if self.by_name.is_empty() {
            return;
        }
        let mut incoming: HashMap<i64, String> = HashMap::new();
        for r in records {
            let Some(target_id) = r.get(id_field).and_then(coerce_id) else {
                continue;
            };
            let name = record_name(r, name_field);
            if !name.is_empty() {
                incoming.entry(target_id).or_insert(name);
            }
        }
        self.by_name.retain(|name, id| match incoming.get(&*id) {
            Some(new_name) if new_name != name => {
                tracing::debug!(id = *id, old = %name, new = %new_name, "unit renamed by source");
                false
            }
            _ => true,
        });
    }

    /// Removes every key that leads to `target_id`, for units whose row
    /// could not be written.
    pub fn forget(&mut self, target_id: i64) {
        self.by_name.retain(|_, id| *id != target_id);
        self.by_legacy_id.retain(|_, id| *id != target_id);
        self.by_target_id
            .retain(|key, id| *id != target_id && *key != target_id);
    }

    /// Seeds the map from units already present in the target database.
    pub fn from_table(conn: &Connection) -> Result<Self> {
        let mut map = Self::default();
        let mut stmt = conn.prepare("SELECT id, name FROM units ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (id, name) in rows {
            let name = normalize_name(&name).to_string();
            let canonical = if name.is_empty() {
                id
            } else {
                *map.by_name.entry(name).or_insert(id)
            };
            map.by_target_id.insert(id, canonical);
        }
        Ok(map)
    }

    pub fn by_name(&self, name: &str) -> Option<i64> {
        self.by_name.get(normalize_name(name)).copied()
    }

    pub fn by_legacy_id(&self, legacy_id: &str) -> Option<i64> {
        self.by_legacy_id.get(legacy_id.trim()).copied()
    }

    /// Resolves a unit reference from a dependent record: by name, then by
    /// legacy key, then by the key's coerced target id.
    pub fn resolve(&self, reference: &str) -> Option<i64> {
        let r = reference.trim();
        if r.is_empty() {
            return None;
        }
        self.by_name(r)
            .or_else(|| self.by_legacy_id(r))
            .or_else(|| {
                coerce_id(&RawValue::Text(r.to_string()))
                    .and_then(|id| self.by_target_id.get(&id).copied())
            })
    }

    /// True if the row with this target id is the one kept for its name.
    pub fn is_canonical(&self, target_id: i64, name: &str) -> bool {
        match self.by_name(name) {
            Some(canonical) => canonical == target_id,
            None => true,
        }
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_legacy_id.clear();
        self.by_target_id.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_target_id.is_empty()
    }

    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }
}

fn record_name(r: &RawRecord, name_field: &str) -> String {
    r.text(name_field)
        .map(|s| normalize_name(&s).to_string())
        .unwrap_or_default()
}
