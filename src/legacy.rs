use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use encoding_rs::Encoding;

use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::record::{EntityKind, RawRecord, RawValue};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const END_OF_DATA: u8 = 0x1A;
const DELETED_FLAG: u8 = b'*';

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: char,
    pub length: usize,
    pub decimals: u8,
}

pub struct LegacyTable {
    pub fields: Vec<FieldDescriptor>,
    pub records: Vec<RawRecord>,
    /// Rows flagged as deleted in the file; never returned.
    pub deleted: usize,
    /// Field values kept as raw bytes because they did not decode.
    pub undecodable_fields: usize,
}

/// Finds `file_name` in `folder`, ignoring ASCII case (legacy tables are
/// usually upper-case on disk but referenced any way).
pub fn find_table_file(folder: &Path, file_name: &str) -> Result<PathBuf> {
    let exact = folder.join(file_name);
    if exact.is_file() {
        return Ok(exact);
    }
    if !folder.is_dir() {
        return Err(ImportError::FileNotFound(exact));
    }
    let wanted = file_name.to_ascii_uppercase();
    let mut candidates: Vec<PathBuf> = Vec::new();
    for ent in std::fs::read_dir(folder)? {
        let p = ent?.path();
        if !p.is_file() {
            continue;
        }
        let name = p.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if name.to_ascii_uppercase() == wanted {
            candidates.push(p);
        }
    }
    // Deterministic pick if the folder has case variants of the same name.
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or(ImportError::FileNotFound(exact))
}

/// Resolves the configured table for `kind` under `folder` and reads it.
pub fn read_kind(
    folder: &Path,
    kind: EntityKind,
    config: &ImportConfig,
) -> Result<(PathBuf, LegacyTable)> {
    let kind_cfg = config.kind(kind)?;
    let encoding = config.text_encoding()?;
    let path = find_table_file(folder, &kind_cfg.file)?;
    let table = read_table(&path, encoding)?;
    Ok((path, table))
}

/// Reads a whole dBase table. Every call re-reads the file from disk.
pub fn read_table(path: &Path, encoding: &'static Encoding) -> Result<LegacyTable> {
    if !path.is_file() {
        return Err(ImportError::FileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    parse_table(&bytes, encoding).map_err(|reason| ImportError::Decode {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_table(bytes: &[u8], encoding: &'static Encoding) -> std::result::Result<LegacyTable, String> {
    if bytes.len() < HEADER_LEN + 1 {
        return Err(format!("file too short for a table header ({} bytes)", bytes.len()));
    }
    let record_count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let record_len = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    if header_len <= HEADER_LEN || header_len > bytes.len() {
        return Err(format!("invalid header length {header_len}"));
    }
    if record_len == 0 {
        return Err("record length is zero".into());
    }

    let fields = parse_descriptors(&bytes[..header_len])?;
    let data_len: usize = fields.iter().map(|f| f.length).sum::<usize>() + 1;
    if data_len > record_len {
        return Err(format!(
            "field lengths ({data_len}) exceed declared record length ({record_len})"
        ));
    }

    // The header count is untrusted; the file size bounds what can be read.
    let readable = (bytes.len() - header_len) / record_len;
    let mut records = Vec::with_capacity(record_count.min(readable));
    let mut deleted = 0usize;
    let mut undecodable_fields = 0usize;
    let mut pos = header_len;
    for n in 0..record_count {
        if pos >= bytes.len() || bytes[pos] == END_OF_DATA {
            break;
        }
        if pos + record_len > bytes.len() {
            tracing::warn!(
                expected = record_count,
                read = n,
                "legacy table is truncated; keeping complete records only"
            );
            break;
        }
        let row = &bytes[pos..pos + record_len];
        pos += record_len;
        if row[0] == DELETED_FLAG {
            deleted += 1;
            continue;
        }

        let mut record = RawRecord::new();
        let mut offset = 1usize;
        for field in &fields {
            let raw = &row[offset..offset + field.length];
            offset += field.length;
            let value = decode_field(field, raw, encoding);
            if matches!(value, RawValue::Bytes(_)) {
                undecodable_fields += 1;
                tracing::warn!(
                    record = n,
                    field = %field.name,
                    encoding = encoding.name(),
                    "field did not decode; keeping raw bytes"
                );
            }
            record.push(field.name.clone(), value);
        }
        records.push(record);
    }

    Ok(LegacyTable {
        fields,
        records,
        deleted,
        undecodable_fields,
    })
}

fn parse_descriptors(header: &[u8]) -> std::result::Result<Vec<FieldDescriptor>, String> {
    let mut fields = Vec::new();
    let mut pos = HEADER_LEN;
    while pos < header.len() && header[pos] != HEADER_TERMINATOR {
        if pos + DESCRIPTOR_LEN > header.len() {
            return Err("field descriptor runs past the header".into());
        }
        let d = &header[pos..pos + DESCRIPTOR_LEN];
        let name_end = d[..11].iter().position(|b| *b == 0).unwrap_or(11);
        let name = String::from_utf8_lossy(&d[..name_end]).trim().to_string();
        if name.is_empty() {
            return Err(format!("empty field name at header offset {pos}"));
        }
        fields.push(FieldDescriptor {
            name,
            field_type: (d[11] as char).to_ascii_uppercase(),
            length: d[16] as usize,
            decimals: d[17],
        });
        pos += DESCRIPTOR_LEN;
    }
    if fields.is_empty() {
        return Err("table declares no fields".into());
    }
    Ok(fields)
}

fn decode_field(field: &FieldDescriptor, raw: &[u8], encoding: &'static Encoding) -> RawValue {
    let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(raw) else {
        return RawValue::Bytes(raw.to_vec());
    };
    // Values are right-padded; leading whitespace is data and kept.
    let text = text.trim_end_matches([' ', '\0']);

    match field.field_type {
        'N' | 'F' => {
            let t = text.trim();
            if t.is_empty() {
                RawValue::Null
            } else {
                match t.replace(',', ".").parse::<f64>() {
                    Ok(n) => RawValue::Number(n),
                    Err(_) => RawValue::Text(t.to_string()),
                }
            }
        }
        'L' => match text.trim() {
            "T" | "t" | "Y" | "y" => RawValue::Bool(true),
            "F" | "f" | "N" | "n" => RawValue::Bool(false),
            _ => RawValue::Null,
        },
        'D' => {
            let t = text.trim();
            if t.is_empty() {
                RawValue::Null
            } else {
                match NaiveDate::parse_from_str(t, "%Y%m%d") {
                    Ok(d) => RawValue::Text(d.format("%Y-%m-%d").to_string()),
                    Err(_) => RawValue::Text(t.to_string()),
                }
            }
        }
        _ => {
            if text.is_empty() {
                RawValue::Null
            } else {
                RawValue::Text(text.to_string())
            }
        }
    }
}
