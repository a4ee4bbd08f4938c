use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "costbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Creates the target tables if they do not exist yet. Existing tables are
/// left exactly as they are.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS materials(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            unit_id INTEGER,
            price REAL,
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_materials_unit ON materials(unit_id)",
        [],
    )?;

    // parent_id is not a foreign key: legacy groups may be listed after
    // their children. is_group is null when the legacy flag was blank.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS works(
            id INTEGER PRIMARY KEY,
            code TEXT,
            name TEXT NOT NULL,
            unit_id INTEGER,
            price REAL,
            is_group INTEGER,
            parent_id INTEGER,
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_works_unit ON works(unit_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_works_parent ON works(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cost_items(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS work_composition(
            id INTEGER PRIMARY KEY,
            work_id INTEGER NOT NULL,
            cost_item_id INTEGER,
            material_id INTEGER,
            rate REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(work_id) REFERENCES works(id),
            FOREIGN KEY(cost_item_id) REFERENCES cost_items(id),
            FOREIGN KEY(material_id) REFERENCES materials(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_work_composition_work ON work_composition(work_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS specifications(
            id INTEGER PRIMARY KEY,
            work_id INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('Material', 'Labor')),
            name TEXT NOT NULL,
            unit_id INTEGER,
            rate REAL NOT NULL DEFAULT 0,
            price REAL,
            material_id INTEGER,
            FOREIGN KEY(work_id) REFERENCES works(id),
            FOREIGN KEY(unit_id) REFERENCES units(id),
            FOREIGN KEY(material_id) REFERENCES materials(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_specifications_work ON specifications(work_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs(
            id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            source_dir TEXT NOT NULL,
            clear_existing INTEGER NOT NULL,
            summary_json TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_run_files(
            run_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            file_name TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            record_count INTEGER NOT NULL,
            PRIMARY KEY(run_id, kind),
            FOREIGN KEY(run_id) REFERENCES import_runs(id)
        )",
        [],
    )?;

    Ok(())
}

pub fn table_row_count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    conn.query_row(&sql, [], |r| r.get(0))
}
