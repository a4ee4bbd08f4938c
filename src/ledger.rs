use std::path::Path;

use chrono::Utc;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;
use crate::record::EntityKind;

pub fn file_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Inserts the `import_runs` row for a new run and returns its id.
pub fn begin_run(conn: &Connection, source_dir: &Path, clear_existing: bool) -> Result<String> {
    let run_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO import_runs(id, started_at, source_dir, clear_existing) VALUES(?, ?, ?, ?)",
        (
            &run_id,
            Utc::now().to_rfc3339(),
            source_dir.to_string_lossy().to_string(),
            clear_existing as i64,
        ),
    )?;
    Ok(run_id)
}

/// Fingerprints a source file consumed by the run.
pub fn record_file(
    conn: &Connection,
    run_id: &str,
    kind: EntityKind,
    path: &Path,
    record_count: usize,
) -> Result<()> {
    let digest = file_sha256(path)?;
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    conn.execute(
        "INSERT INTO import_run_files(run_id, kind, file_name, sha256, record_count)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(run_id, kind) DO UPDATE SET
           file_name = excluded.file_name,
           sha256 = excluded.sha256,
           record_count = excluded.record_count",
        (run_id, kind.as_str(), &file_name, &digest, record_count as i64),
    )?;
    Ok(())
}

pub fn finish_run(conn: &Connection, run_id: &str, summary: &serde_json::Value) -> Result<()> {
    let summary_json = serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string());
    conn.execute(
        "UPDATE import_runs SET finished_at = ?, summary_json = ? WHERE id = ?",
        (Utc::now().to_rfc3339(), &summary_json, run_id),
    )?;
    Ok(())
}
