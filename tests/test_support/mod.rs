#![allow(dead_code)]

use costbookd::{db, ImportConfig};
use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// Fresh workspace database under a temp dir.
pub fn open_workspace(prefix: &str) -> (PathBuf, Connection) {
    let workspace = temp_dir(prefix);
    let conn = db::open_db(&workspace).expect("open workspace db");
    (workspace, conn)
}

/// Fixtures are written as UTF-8 so test rows stay readable.
pub fn utf8_config() -> ImportConfig {
    ImportConfig {
        encoding: "utf-8".into(),
        batch_size: 4,
        ..ImportConfig::default()
    }
}

#[derive(Clone, Copy)]
pub struct DbfField {
    pub name: &'static str,
    pub kind: u8,
    pub len: u8,
}

pub const fn c(name: &'static str, len: u8) -> DbfField {
    DbfField { name, kind: b'C', len }
}

pub const fn n(name: &'static str, len: u8) -> DbfField {
    DbfField { name, kind: b'N', len }
}

pub const fn l(name: &'static str) -> DbfField {
    DbfField { name, kind: b'L', len: 1 }
}

pub struct DbfRow {
    pub deleted: bool,
    pub values: Vec<Vec<u8>>,
}

pub fn row(values: &[&str]) -> DbfRow {
    DbfRow {
        deleted: false,
        values: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
    }
}

pub fn deleted_row(values: &[&str]) -> DbfRow {
    DbfRow {
        deleted: true,
        ..row(values)
    }
}

/// Writes a dBase III table. Character values are left-aligned, numbers
/// right-aligned, both padded with spaces.
pub fn write_dbf(path: &Path, fields: &[DbfField], rows: &[DbfRow]) {
    let header_len = 32 + 32 * fields.len() + 1;
    let record_len = 1 + fields.iter().map(|f| f.len as usize).sum::<usize>();

    let mut out: Vec<u8> = Vec::new();
    out.push(0x03);
    out.extend_from_slice(&[124, 1, 1]);
    out.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(&(record_len as u16).to_le_bytes());
    out.extend_from_slice(&[0u8; 20]);

    for f in fields {
        let mut d = [0u8; 32];
        let name = f.name.as_bytes();
        d[..name.len().min(10)].copy_from_slice(&name[..name.len().min(10)]);
        d[11] = f.kind;
        d[16] = f.len;
        out.extend_from_slice(&d);
    }
    out.push(0x0D);

    for r in rows {
        out.push(if r.deleted { b'*' } else { b' ' });
        for (i, f) in fields.iter().enumerate() {
            let len = f.len as usize;
            let v = r.values.get(i).cloned().unwrap_or_default();
            let v = &v[..v.len().min(len)];
            let pad = vec![b' '; len - v.len()];
            if f.kind == b'N' {
                out.extend_from_slice(&pad);
                out.extend_from_slice(v);
            } else {
                out.extend_from_slice(v);
                out.extend_from_slice(&pad);
            }
        }
    }
    out.push(0x1A);
    std::fs::write(path, out).expect("write dbf fixture");
}

pub const UNIT_FIELDS: [DbfField; 2] = [c("ID", 8), c("NAME", 20)];
pub const MATERIAL_FIELDS: [DbfField; 4] = [c("ID", 8), c("NAME", 40), c("UNIT", 20), n("PRICE", 12)];
pub const WORK_FIELDS: [DbfField; 7] = [
    c("ID", 8),
    c("CODE", 12),
    c("NAME", 40),
    c("UNIT", 20),
    n("PRICE", 12),
    l("ISGROUP"),
    c("PARENT", 8),
];
pub const COMPOSITION_FIELDS: [DbfField; 6] = [
    c("WORK_ID", 8),
    c("MAT_ID", 8),
    c("COSTITEM", 40),
    n("NORM", 10),
    c("UNIT", 20),
    n("PRICE", 12),
];

/// A small but complete legacy dataset in `dir`, using the default file
/// names.
pub fn write_sample_dataset(dir: &Path) {
    write_dbf(
        &dir.join("UNITS.DBF"),
        &UNIT_FIELDS,
        &[row(&["1", "m2"]), row(&["2", "m2"]), row(&["3", " m2"]), row(&["4", "kg"]), row(&["5", "h"])],
    );
    write_dbf(
        &dir.join("MATERIAL.DBF"),
        &MATERIAL_FIELDS,
        &[row(&["10", "Cement M400", "kg", "12.50"]), row(&["11", "Primer", "2", "80"])],
    );
    write_dbf(
        &dir.join("WORKS.DBF"),
        &WORK_FIELDS,
        &[
            row(&["100", "01", "Finishing", "", "", "T", ""]),
            row(&["101", "01-001", "Floor screed", " m2", "350", "F", "100"]),
            row(&["102", "01-002", "Wall priming", "3", "120", "F", "100"]),
        ],
    );
    write_dbf(
        &dir.join("COMPOS.DBF"),
        &COMPOSITION_FIELDS,
        &[
            row(&["101", "10", "Materials", "18.5", "", ""]),
            row(&["101", "", "Plasterer labor", "0.9", "h", "450"]),
            row(&["102", "11", "Materials", "0,25", "", ""]),
            row(&["102", "", "Plasterer labor", "0.3", "h", "450"]),
            row(&["", "", "Orphan labor", "1", "h", "10"]),
            row(&["999", "", "Unknown work labor", "1", "h", "10"]),
            row(&["102", "77", "", "1", "", ""]),
        ],
    );
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_costbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn costbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// Sends a request and collects event lines until the response arrives.
pub fn request_with_events(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> (serde_json::Value, Vec<serde_json::Value>) {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut events = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("read response line");
        assert!(n > 0, "sidecar closed stdout before answering {method}");
        let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
        if value.get("event").is_some() {
            events.push(value);
            continue;
        }
        return (value, events);
    }
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    request_with_events(stdin, reader, id, method, params).0
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{method} failed: {value}"
    );
    value.get("result").cloned().unwrap_or_default()
}
