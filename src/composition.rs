use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;

use crate::context::RunContext;
use crate::error::Result;
use crate::record::{TransformedRecord, Value};

pub const LINKS_TABLE: &str = "work_composition";
pub const SPECIFICATIONS_TABLE: &str = "specifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComponentKind {
    Material,
    Labor,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Material => "Material",
            ComponentKind::Labor => "Labor",
        }
    }
}

/// One component consumed by one unit of a work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecificationRow {
    pub work_id: i64,
    pub kind: ComponentKind,
    pub name: String,
    pub unit_id: Option<i64>,
    pub rate: f64,
    pub price: Option<f64>,
    /// Set for material components only.
    pub material_id: Option<i64>,
}

impl SpecificationRow {
    pub fn to_record(&self) -> TransformedRecord {
        TransformedRecord::new()
            .with("work_id", Value::Integer(self.work_id))
            .with("kind", Value::Text(self.kind.as_str().to_string()))
            .with("name", Value::Text(self.name.clone()))
            .with("unit_id", self.unit_id.into())
            .with("rate", Value::Real(self.rate))
            .with("price", self.price.map(Value::Real).unwrap_or(Value::Null))
            .with("material_id", self.material_id.into())
    }
}

/// Legacy-shaped association row: work, cost item, material, rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositionLink {
    pub work_id: i64,
    pub cost_item_id: Option<i64>,
    pub material_id: Option<i64>,
    pub rate: f64,
}

impl CompositionLink {
    pub fn to_record(&self) -> TransformedRecord {
        TransformedRecord::new()
            .with("work_id", Value::Integer(self.work_id))
            .with("cost_item_id", self.cost_item_id.into())
            .with("material_id", self.material_id.into())
            .with("rate", Value::Real(self.rate))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialInfo {
    pub name: String,
    pub unit_id: Option<i64>,
    pub price: Option<f64>,
}

/// Works and materials the composition rows may point at, read from the
/// target tables on the run's connection.
#[derive(Debug, Default, Clone)]
pub struct CompositionCatalog {
    pub works: HashSet<i64>,
    pub materials: HashMap<i64, MaterialInfo>,
}

impl CompositionCatalog {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT id FROM works")?;
        let works = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT id, name, unit_id, price FROM materials")?;
        let materials = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    MaterialInfo {
                        name: row.get(1)?,
                        unit_id: row.get(2)?,
                        price: row.get(3)?,
                    },
                ))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(Self { works, materials })
    }
}

#[derive(Debug, Default)]
pub struct CompositionOutput {
    pub links: Vec<CompositionLink>,
    pub specifications: Vec<SpecificationRow>,
    /// Rows without a known owning work.
    pub skipped: usize,
    /// Rows whose material or cost item did not resolve.
    pub dropped: usize,
}

impl CompositionOutput {
    pub fn work_ids(&self) -> BTreeSet<i64> {
        self.specifications.iter().map(|s| s.work_id).collect()
    }
}

/// Trimmed cost-item name of a mapped composition row, if any.
pub fn cost_item_name(rec: &TransformedRecord) -> Option<&str> {
    rec.get("cost_item")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Turns mapped composition rows into association rows and specification
/// rows. Cost items must already be resolved into `ctx.cost_items`.
pub fn transform_composition(
    records: &[TransformedRecord],
    ctx: &RunContext,
    catalog: &CompositionCatalog,
) -> CompositionOutput {
    let mut out = CompositionOutput::default();

    for (index, rec) in records.iter().enumerate() {
        let work_id = rec.get("work_id").and_then(Value::as_i64);
        let Some(work_id) = work_id.filter(|id| catalog.works.contains(id)) else {
            out.skipped += 1;
            tracing::debug!(index, work_id = ?work_id, "composition row without a known work");
            continue;
        };

        let rate = rec.get("rate").and_then(Value::as_f64).unwrap_or(0.0);
        let cost_name = cost_item_name(rec);
        let cost_item_id = cost_name.and_then(|n| ctx.cost_items.get(n));

        let row = match rec.get("material_id").and_then(Value::as_i64) {
            Some(material_id) => {
                let Some(material) = catalog.materials.get(&material_id) else {
                    out.dropped += 1;
                    tracing::warn!(index, work_id, material_id, "composition row references unknown material");
                    continue;
                };
                SpecificationRow {
                    work_id,
                    kind: ComponentKind::Material,
                    name: material.name.clone(),
                    unit_id: material.unit_id,
                    rate,
                    price: material.price,
                    material_id: Some(material_id),
                }
            }
            None => {
                let (Some(name), Some(_)) = (cost_name, cost_item_id) else {
                    out.dropped += 1;
                    tracing::warn!(
                        index,
                        work_id,
                        cost_item = ?cost_name,
                        "composition row has neither a material nor a resolved cost item"
                    );
                    continue;
                };
                SpecificationRow {
                    work_id,
                    kind: ComponentKind::Labor,
                    name: name.to_string(),
                    unit_id: rec.get("unit_id").and_then(Value::as_i64),
                    rate,
                    price: rec.get("price").and_then(Value::as_f64),
                    material_id: None,
                }
            }
        };

        out.links.push(CompositionLink {
            work_id,
            cost_item_id,
            material_id: row.material_id,
            rate,
        });
        out.specifications.push(row);
    }

    out
}

/// Removes the association and specification rows of the given works so they
/// can be recreated from the legacy data.
pub fn delete_for_works(conn: &Connection, work_ids: &BTreeSet<i64>) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut removed = 0usize;
    {
        let mut del_specs = tx.prepare("DELETE FROM specifications WHERE work_id = ?")?;
        let mut del_links = tx.prepare("DELETE FROM work_composition WHERE work_id = ?")?;
        for id in work_ids {
            removed += del_specs.execute([id])?;
            del_links.execute([id])?;
        }
    }
    tx.commit()?;
    Ok(removed)
}
