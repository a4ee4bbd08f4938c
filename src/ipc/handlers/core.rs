use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use costbookd::{db, ImportConfig};
use serde_json::json;
use std::path::{Path, PathBuf};

const WORKSPACE_CONFIG: &str = "costbook.json";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "encoding": state.config.encoding,
            "batchSize": state.config.batch_size,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            // A workspace may carry its own import config. A broken one is
            // reported but must not prevent the workspace from opening.
            let mut warnings: Vec<serde_json::Value> = Vec::new();
            match load_workspace_config(&path) {
                Ok(Some(cfg)) => state.config = cfg,
                Ok(None) => state.config = ImportConfig::default(),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring workspace import config");
                    warnings.push(json!({
                        "code": "config_invalid",
                        "message": format!("{e:#}"),
                    }));
                    state.config = ImportConfig::default();
                }
            }
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "workspacePath": path.to_string_lossy(), "warnings": warnings }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn load_workspace_config(workspace: &Path) -> anyhow::Result<Option<ImportConfig>> {
    let p = workspace.join(WORKSPACE_CONFIG);
    if !p.is_file() {
        return Ok(None);
    }
    ImportConfig::load(&p).map(Some)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
