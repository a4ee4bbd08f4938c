use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::batch::{truncate_table, BatchUpserter, ImportResult, Progress};
use crate::composition::{
    self, cost_item_name, transform_composition, CompositionCatalog, LINKS_TABLE,
    SPECIFICATIONS_TABLE,
};
use crate::config::ImportConfig;
use crate::context::RunContext;
use crate::error::{ImportError, Result};
use crate::hierarchy::ParentGraph;
use crate::legacy;
use crate::ledger;
use crate::mapping::FieldMapper;
use crate::reconcile::{CanonicalUnitMap, CostItemDictionaryMap};
use crate::record::{EntityKind, RawRecord, TransformedRecord, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportOptions<'a> {
    /// Empty the target tables before importing.
    pub clear_existing: bool,
    /// Cap on raw records per entity kind.
    pub limit: Option<usize>,
    /// Checked between entity kinds only.
    pub cancel: Option<&'a AtomicBool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    pub kind: EntityKind,
    pub ok: bool,
    pub read: usize,
    pub transformed: usize,
    /// Records dropped for a missing key or an unresolved material or cost item.
    pub dropped: usize,
    /// Composition records without a known owning work.
    pub skipped: usize,
    /// Unit rows folded into an earlier row with the same name.
    pub collapsed: usize,
    pub unresolved_units: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<ImportResult>,
}

impl KindSummary {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            ok: false,
            read: 0,
            transformed: 0,
            dropped: 0,
            skipped: 0,
            collapsed: 0,
            unresolved_units: 0,
            succeeded: 0,
            failed: 0,
            error: None,
            results: Vec::new(),
        }
    }

    fn failed_with(kind: EntityKind, err: &ImportError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(kind)
        }
    }

    fn absorb(&mut self, result: ImportResult) {
        self.succeeded += result.succeeded;
        self.failed += result.failed();
        self.results.push(result);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub cancelled: bool,
    pub kinds: Vec<KindSummary>,
}

impl ImportReport {
    /// One flag per entity kind; kinds never attempted are `false`.
    pub fn outcomes(&self) -> BTreeMap<EntityKind, bool> {
        let mut out: BTreeMap<EntityKind, bool> =
            EntityKind::IMPORT_ORDER.iter().map(|k| (*k, false)).collect();
        for s in &self.kinds {
            out.insert(s.kind, s.ok);
        }
        out
    }

    pub fn summary(&self, kind: EntityKind) -> Option<&KindSummary> {
        self.kinds.iter().find(|s| s.kind == kind)
    }
}

/// Runs the legacy import over one connection, entity kind by entity kind.
pub struct Importer<'c> {
    conn: &'c Connection,
    config: &'c ImportConfig,
    upserter: BatchUpserter,
}

impl<'c> Importer<'c> {
    pub fn new(conn: &'c Connection, config: &'c ImportConfig) -> Self {
        Self {
            conn,
            config,
            upserter: BatchUpserter::new(config.batch_size),
        }
    }

    pub fn import_all(
        &self,
        source_dir: &Path,
        options: &ImportOptions<'_>,
        progress: &mut Progress<'_>,
    ) -> ImportReport {
        let run_id = match ledger::begin_run(self.conn, source_dir, options.clear_existing) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "could not record import run");
                None
            }
        };
        tracing::info!(
            run_id = ?run_id,
            source = %source_dir.to_string_lossy(),
            clear_existing = options.clear_existing,
            limit = ?options.limit,
            "import started"
        );

        let mut ctx = RunContext::new(
            self.initial_unit_map(source_dir, options),
            self.initial_cost_items(),
        );

        let mut failed_early: BTreeMap<EntityKind, ImportError> = BTreeMap::new();
        if options.clear_existing {
            for kind in EntityKind::IMPORT_ORDER.iter().rev() {
                for table in kind.target_tables() {
                    match truncate_table(self.conn, table) {
                        Ok(n) => tracing::info!(%kind, table, rows = n, "table cleared"),
                        Err(e) => {
                            tracing::error!(%kind, table, error = %e, "truncate failed; kind will be skipped");
                            failed_early.entry(*kind).or_insert(e);
                        }
                    }
                }
            }
        }

        let mut report = ImportReport {
            run_id: run_id.clone(),
            cancelled: false,
            kinds: Vec::new(),
        };

        for kind in EntityKind::IMPORT_ORDER {
            if options.cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false) {
                tracing::warn!(%kind, "import cancelled before entity kind");
                report.cancelled = true;
                break;
            }

            let summary = match failed_early.remove(&kind) {
                Some(e) => KindSummary::failed_with(kind, &e),
                None => {
                    progress(&format!("{kind}: reading legacy table"), 0);
                    match self.import_kind(kind, source_dir, &mut ctx, options, run_id.as_deref(), progress) {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::error!(%kind, error = %e, "entity kind import failed");
                            KindSummary::failed_with(kind, &e)
                        }
                    }
                }
            };

            if kind == EntityKind::Units && !summary.ok && !ctx.units.is_empty() {
                tracing::warn!("units import failed; unit references will be left empty");
                ctx.units.clear();
            }

            tracing::info!(
                %kind,
                ok = summary.ok,
                read = summary.read,
                transformed = summary.transformed,
                dropped = summary.dropped,
                skipped = summary.skipped,
                unresolved_units = summary.unresolved_units,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "entity kind finished"
            );
            progress(&format!("{kind}: done"), 100);
            report.kinds.push(summary);
        }

        if let Some(id) = run_id.as_deref() {
            let summary = serde_json::to_value(&report).unwrap_or_default();
            if let Err(e) = ledger::finish_run(self.conn, id, &summary) {
                tracing::warn!(run_id = id, error = %e, "could not finish import run record");
            }
        }
        report
    }

    /// With `clear_existing` the unit map comes only from the units about to
    /// be loaded; otherwise existing target units keep their ids and the
    /// source file adds to them.
    fn initial_unit_map(&self, source_dir: &Path, options: &ImportOptions<'_>) -> CanonicalUnitMap {
        let mut map = if options.clear_existing {
            CanonicalUnitMap::default()
        } else {
            CanonicalUnitMap::from_table(self.conn).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not read existing units");
                CanonicalUnitMap::default()
            })
        };
        match self.read_raw(source_dir, EntityKind::Units, options) {
            Ok((_, records)) => {
                if let Ok(units_cfg) = self.config.kind(EntityKind::Units) {
                    map.extend(&records, units_cfg);
                }
            }
            Err(e) => tracing::warn!(error = %e, "unit map built without the legacy units table"),
        }
        tracing::debug!(names = map.name_count(), "unit map ready");
        map
    }

    fn initial_cost_items(&self) -> CostItemDictionaryMap {
        CostItemDictionaryMap::load(self.conn).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read existing cost items");
            CostItemDictionaryMap::default()
        })
    }

    fn read_raw(
        &self,
        source_dir: &Path,
        kind: EntityKind,
        options: &ImportOptions<'_>,
    ) -> Result<(std::path::PathBuf, Vec<RawRecord>)> {
        let (path, table) = legacy::read_kind(source_dir, kind, self.config)?;
        let mut records = table.records;
        if let Some(limit) = options.limit {
            records.truncate(limit);
        }
        if table.deleted > 0 || table.undecodable_fields > 0 {
            tracing::info!(
                %kind,
                deleted = table.deleted,
                undecodable_fields = table.undecodable_fields,
                "legacy table read with exceptions"
            );
        }
        Ok((path, records))
    }

    fn import_kind(
        &self,
        kind: EntityKind,
        source_dir: &Path,
        ctx: &mut RunContext,
        options: &ImportOptions<'_>,
        run_id: Option<&str>,
        progress: &mut Progress<'_>,
    ) -> Result<KindSummary> {
        let (path, raw) = self.read_raw(source_dir, kind, options)?;
        if let Some(id) = run_id {
            if let Err(e) = ledger::record_file(self.conn, id, kind, &path, raw.len()) {
                tracing::warn!(%kind, error = %e, "could not fingerprint source file");
            }
        }

        let mut summary = KindSummary::new(kind);
        summary.read = raw.len();
        let unresolved_before = ctx.unresolved_units(kind);
        let mapper = FieldMapper::new(self.config);
        let mut mapped = Vec::with_capacity(raw.len());
        for r in &raw {
            mapped.push(mapper.transform(r, kind, ctx)?);
        }
        summary.unresolved_units = ctx.unresolved_units(kind) - unresolved_before;

        match kind {
            EntityKind::Units => {
                let rows = self.prepare_units(mapped, ctx, &mut summary);
                summary.transformed = rows.len();
                let result = self.upserter.apply(self.conn, "units", &rows, progress)?;
                self.forget_unwritten_units(&result, ctx)?;
                summary.absorb(result);
            }
            EntityKind::Materials => {
                let rows = keyed_rows(kind, mapped, &mut summary);
                summary.transformed = rows.len();
                let result = self.upserter.apply(self.conn, "materials", &rows, progress)?;
                summary.absorb(result);
            }
            EntityKind::Works => {
                let rows = self.prepare_works(mapped, options, &mut summary)?;
                summary.transformed = rows.len();
                let result = self.upserter.apply(self.conn, "works", &rows, progress)?;
                summary.absorb(result);
            }
            EntityKind::Composition => {
                self.import_composition(mapped, ctx, options, &mut summary, progress)?;
            }
        }

        summary.ok = summary.transformed == 0 || summary.succeeded > 0;
        Ok(summary)
    }

    fn prepare_units(
        &self,
        mapped: Vec<TransformedRecord>,
        ctx: &RunContext,
        summary: &mut KindSummary,
    ) -> Vec<TransformedRecord> {
        let mut rows = Vec::with_capacity(mapped.len());
        for mut rec in keyed_rows(EntityKind::Units, mapped, summary) {
            let name = rec
                .get("name")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            let Some(id) = rec.id() else { continue };
            if name.is_empty() {
                summary.dropped += 1;
                tracing::warn!(id, "unit without a name dropped");
                continue;
            }
            if !ctx.units.is_canonical(id, &name) {
                summary.collapsed += 1;
                tracing::debug!(id, name = %name, "duplicate unit folded into canonical row");
                continue;
            }
            rec.set("name", Value::Text(name));
            rows.push(rec);
        }
        rows
    }

    /// Unit rows that failed and are not in the table either must not be
    /// handed out as references.
    fn forget_unwritten_units(&self, result: &ImportResult, ctx: &mut RunContext) -> Result<()> {
        for failure in &result.failures {
            let Some(id) = failure.record.id() else { continue };
            let exists: Option<i64> = self
                .conn
                .query_row("SELECT id FROM units WHERE id = ?", [id], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                tracing::warn!(id, "unit row was not written; references to it will be left empty");
                ctx.units.forget(id);
            }
        }
        Ok(())
    }

    fn prepare_works(
        &self,
        mapped: Vec<TransformedRecord>,
        options: &ImportOptions<'_>,
        summary: &mut KindSummary,
    ) -> Result<Vec<TransformedRecord>> {
        let mut graph = if options.clear_existing {
            ParentGraph::default()
        } else {
            ParentGraph::load_works(self.conn)?
        };
        let mut rows = keyed_rows(EntityKind::Works, mapped, summary);
        for rec in rows.iter_mut() {
            let Some(id) = rec.id() else { continue };
            let parent = rec.get("parent_id").and_then(Value::as_i64);
            if let Err(e) = graph.set_parent(id, parent) {
                tracing::warn!(id, parent = ?parent, error = %e, "dropping cyclic parent reference");
                rec.set("parent_id", Value::Null);
            }
        }
        Ok(rows)
    }

    fn import_composition(
        &self,
        mapped: Vec<TransformedRecord>,
        ctx: &mut RunContext,
        options: &ImportOptions<'_>,
        summary: &mut KindSummary,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        let names: Vec<&str> = mapped.iter().filter_map(cost_item_name).collect();
        let before = ctx.cost_items.created();
        ctx.cost_items.resolve_all(self.conn, names)?;
        tracing::info!(
            created = ctx.cost_items.created() - before,
            known = ctx.cost_items.len(),
            "cost items resolved"
        );

        let catalog = CompositionCatalog::load(self.conn)?;
        let out = transform_composition(&mapped, ctx, &catalog);
        summary.skipped = out.skipped;
        summary.dropped += out.dropped;
        summary.transformed = out.specifications.len();
        if out.skipped > 0 {
            tracing::info!(skipped = out.skipped, "composition rows without a known work were skipped");
        }

        if !options.clear_existing {
            let removed = composition::delete_for_works(self.conn, &out.work_ids())?;
            tracing::debug!(removed, "previous specification rows removed");
        }

        let links: Vec<TransformedRecord> = out.links.iter().map(|l| l.to_record()).collect();
        let specs: Vec<TransformedRecord> =
            out.specifications.iter().map(|s| s.to_record()).collect();
        let links_result = self.upserter.apply(self.conn, LINKS_TABLE, &links, progress)?;
        summary.absorb(links_result);
        let specs_result = self.upserter.apply(self.conn, SPECIFICATIONS_TABLE, &specs, progress)?;
        summary.absorb(specs_result);
        Ok(())
    }
}

/// Drops mapped rows that have no usable `id`.
fn keyed_rows(
    kind: EntityKind,
    mapped: Vec<TransformedRecord>,
    summary: &mut KindSummary,
) -> Vec<TransformedRecord> {
    let mut rows = Vec::with_capacity(mapped.len());
    for (index, rec) in mapped.into_iter().enumerate() {
        if rec.id().is_none() {
            summary.dropped += 1;
            tracing::warn!(%kind, index, "record without an id dropped");
            continue;
        }
        rows.push(rec);
    }
    rows
}
