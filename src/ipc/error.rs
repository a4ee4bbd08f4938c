use costbookd::ImportError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Stable error code for an engine error, as seen by the UI.
pub fn import_error_code(e: &ImportError) -> &'static str {
    match e {
        ImportError::FileNotFound(_) => "file_not_found",
        ImportError::UnknownEntityKind(_) => "unknown_entity_kind",
        ImportError::Decode { .. } => "decode_failed",
        ImportError::DictionaryWrite { .. } => "dictionary_write_failed",
        ImportError::Truncate { .. } => "truncate_failed",
        ImportError::InvalidIdentifier(_) => "invalid_identifier",
        ImportError::CircularReference { .. } => "circular_reference",
        ImportError::WorkNotFound(_) => "not_found",
        ImportError::Config(_) => "config_invalid",
        ImportError::Database(_) => "db_error",
        ImportError::Io(_) => "io_error",
    }
}

pub fn import_err(id: &str, e: &ImportError, details: Option<serde_json::Value>) -> serde_json::Value {
    err(id, import_error_code(e), e.to_string(), details)
}

/// Event line written ahead of the response to request `id`.
pub fn progress_event(id: &str, message: &str, percent: u8) -> serde_json::Value {
    json!({
        "event": "progress",
        "id": id,
        "message": message,
        "percent": percent,
    })
}
