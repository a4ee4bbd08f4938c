use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

/// Dispatches one request. `emit` receives event lines (progress) written
/// before the response.
pub fn handle_request(
    state: &mut AppState,
    req: Request,
    emit: &mut dyn FnMut(serde_json::Value),
) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::import_legacy::try_handle(state, &req, emit) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
