use crate::error::ExamError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::de::DeserializeOwned;

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, serde_json::Value> {
    // A request without params reads as an empty object.
    let raw = if req.params.is_null() {
        serde_json::json!({})
    } else {
        req.params.clone()
    };
    serde_json::from_value(raw)
        .map_err(|e| err(&req.id, "bad_params", e.to_string(), None))
}

pub fn exam_err(req: &Request, e: &ExamError) -> serde_json::Value {
    tracing::warn!(method = %req.method, code = e.code(), error = %e, "request failed");
    err(&req.id, e.code(), e.to_string(), e.details())
}
