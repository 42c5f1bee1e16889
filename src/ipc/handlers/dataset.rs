use crate::ipc::error::ok;
use crate::ipc::helpers::{exam_err, parse_params, require_db};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Snapshot};
use serde_json::json;

fn handle_dataset_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let snap: Snapshot = match parse_params(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match store::import_snapshot(conn, &snap) {
        Ok(counts) => {
            tracing::info!(?counts, "snapshot imported");
            ok(&req.id, json!({ "imported": counts }))
        }
        Err(e) => exam_err(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dataset.import" => Some(handle_dataset_import(state, req)),
        _ => None,
    }
}
