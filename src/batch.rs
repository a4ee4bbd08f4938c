use std::collections::HashSet;

use rusqlite::{params_from_iter, Connection};
use serde::Serialize;

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::{ImportError, Result};
use crate::record::TransformedRecord;

/// Progress sink: `(message, percent complete 0..=100)`.
pub type Progress<'a> = dyn FnMut(&str, u8) + 'a;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    /// Position of the record in the input slice.
    pub index: usize,
    pub record: TransformedRecord,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub table: String,
    pub total: usize,
    pub succeeded: usize,
    pub batches: usize,
    /// Batches that failed as a whole and were re-applied record by record.
    pub fallback_batches: usize,
    pub failures: Vec<RecordFailure>,
}

impl ImportResult {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Applies records to a table as "update if the id exists, else insert".
///
/// Each batch is one transaction. A failing batch is rolled back and replayed
/// one record per transaction, so a bad row costs only itself.
#[derive(Debug, Clone, Copy)]
pub struct BatchUpserter {
    batch_size: usize,
}

impl Default for BatchUpserter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchUpserter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn apply(
        &self,
        conn: &Connection,
        table: &str,
        records: &[TransformedRecord],
        progress: &mut Progress<'_>,
    ) -> Result<ImportResult> {
        validate_identifier(table)?;
        let mut seen_columns: HashSet<&str> = HashSet::new();
        for rec in records {
            if rec.is_empty() {
                return Err(ImportError::InvalidIdentifier(format!(
                    "{table}: record without columns"
                )));
            }
            for c in rec.columns() {
                if seen_columns.insert(c) {
                    validate_identifier(c)?;
                }
            }
        }

        let total = records.len();
        let mut result = ImportResult {
            table: table.to_string(),
            total,
            ..ImportResult::default()
        };
        if total == 0 {
            progress(&format!("{table}: nothing to import"), 100);
            return Ok(result);
        }

        let mut processed = 0usize;
        for (batch_no, chunk) in records.chunks(self.batch_size).enumerate() {
            let base = batch_no * self.batch_size;
            result.batches += 1;
            match apply_batch(conn, table, chunk) {
                Ok(()) => {
                    result.succeeded += chunk.len();
                    tracing::debug!(table, batch = batch_no, size = chunk.len(), "batch committed");
                }
                Err(e) => {
                    result.fallback_batches += 1;
                    tracing::warn!(
                        table,
                        batch = batch_no,
                        error = %e,
                        "batch failed; re-applying record by record"
                    );
                    for (i, rec) in chunk.iter().enumerate() {
                        match apply_batch(conn, table, std::slice::from_ref(rec)) {
                            Ok(()) => result.succeeded += 1,
                            Err(e) => {
                                tracing::warn!(table, index = base + i, error = %e, "record rejected");
                                result.failures.push(RecordFailure {
                                    index: base + i,
                                    record: rec.clone(),
                                    error: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
            processed += chunk.len();
            let percent = ((processed * 100) / total).min(100) as u8;
            progress(
                &format!("{table}: {processed}/{total} records"),
                percent,
            );
        }

        Ok(result)
    }
}

fn apply_batch(conn: &Connection, table: &str, records: &[TransformedRecord]) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for rec in records {
        let columns: Vec<&str> = rec.columns().collect();
        let sql = upsert_sql(table, &columns);
        let mut stmt = tx.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(rec.values()))?;
    }
    // Dropping an uncommitted transaction rolls it back.
    tx.commit()
}

/// Builds the upsert statement for one column layout. Names must already be
/// validated.
pub fn upsert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let mut sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        table,
        columns.join(", "),
        placeholders
    );
    if columns.contains(&"id") {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| **c != "id")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        if updates.is_empty() {
            sql.push_str(" ON CONFLICT(id) DO NOTHING");
        } else {
            sql.push_str(" ON CONFLICT(id) DO UPDATE SET ");
            sql.push_str(&updates.join(", "));
        }
    }
    sql
}

pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ImportError::InvalidIdentifier(name.to_string()))
    }
}

/// Deletes every row of `table`.
pub fn truncate_table(conn: &Connection, table: &str) -> Result<usize> {
    validate_identifier(table)?;
    conn.execute(&format!("DELETE FROM {table}"), [])
        .map_err(|source| ImportError::Truncate {
            table: table.to_string(),
            source,
        })
}
