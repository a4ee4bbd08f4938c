use crate::ipc::error::{err, import_err, ok, progress_event};
use crate::ipc::types::{AppState, Request};
use costbookd::hierarchy;
use costbookd::{ImportConfig, ImportError, ImportOptions, Importer};
use serde_json::json;
use std::path::PathBuf;

fn handle_import_run(
    state: &mut AppState,
    req: &Request,
    emit: &mut dyn FnMut(serde_json::Value),
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(source_dir) = req
        .params
        .get("sourceDir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing sourceDir", None);
    };
    let clear_existing = req
        .params
        .get("clearExisting")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let limit = match req.params.get("limit") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_u64() {
            Some(n) => Some(n as usize),
            None => return err(&req.id, "bad_params", "limit must be a non-negative integer", None),
        },
    };

    let override_cfg = match req.params.get("configPath").and_then(|v| v.as_str()) {
        Some(p) => match ImportConfig::load(&PathBuf::from(p)) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                return err(
                    &req.id,
                    "config_invalid",
                    format!("{e:#}"),
                    Some(json!({ "configPath": p })),
                )
            }
        },
        None => None,
    };
    let config = override_cfg.as_ref().unwrap_or(&state.config);
    if let Err(e) = config.validate() {
        return import_err(&req.id, &e, None);
    }

    let options = ImportOptions {
        clear_existing,
        limit,
        cancel: None,
    };
    let req_id = req.id.clone();
    let mut progress = |message: &str, percent: u8| emit(progress_event(&req_id, message, percent));
    let report = Importer::new(conn, config).import_all(&source_dir, &options, &mut progress);

    let outcomes: serde_json::Map<String, serde_json::Value> = report
        .outcomes()
        .into_iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    ok(
        &req.id,
        json!({
            "runId": report.run_id,
            "cancelled": report.cancelled,
            "outcomes": outcomes,
            "kinds": report.kinds,
        }),
    )
}

fn handle_works_set_parent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(work_id) = req.params.get("workId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing workId", None);
    };
    let parent_id = match req.params.get("parentId") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "parentId must be an integer or null", None),
        },
    };

    match hierarchy::set_work_parent(conn, work_id, parent_id) {
        Ok(()) => ok(&req.id, json!({ "workId": work_id, "parentId": parent_id })),
        Err(e @ ImportError::CircularReference { .. }) => import_err(
            &req.id,
            &e,
            Some(json!({ "workId": work_id, "parentId": parent_id })),
        ),
        Err(e) => import_err(&req.id, &e, None),
    }
}

pub fn try_handle(
    state: &mut AppState,
    req: &Request,
    emit: &mut dyn FnMut(serde_json::Value),
) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.run" => Some(handle_import_run(state, req, emit)),
        "works.setParent" => Some(handle_works_set_parent(state, req)),
        _ => None,
    }
}
