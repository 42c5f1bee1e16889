use crate::eligibility::{count_breakdown, resolve_eligible_students, CohortCombination, ExamFilterCriteria};
use crate::ipc::error::ok;
use crate::ipc::helpers::{exam_err, parse_params, require_db};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteDataset;
use serde::Deserialize;
use serde_json::json;

fn handle_resolve(state: &mut AppState, req: &Request, count_only: bool) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let criteria: ExamFilterCriteria = match parse_params(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match resolve_eligible_students(&criteria, &SqliteDataset::new(conn)) {
        Ok(ids) if count_only => ok(&req.id, json!({ "count": ids.len() })),
        Ok(ids) => ok(&req.id, json!({ "studentIds": ids })),
        Err(e) => exam_err(req, &e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreakdownParams {
    #[serde(flatten)]
    criteria: ExamFilterCriteria,
    #[serde(default)]
    combinations: Vec<CohortCombination>,
}

fn handle_breakdown(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let params: BreakdownParams = match parse_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match count_breakdown(&params.criteria, &params.combinations, &SqliteDataset::new(conn)) {
        Ok(b) => ok(&req.id, json!(b)),
        Err(e) => exam_err(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "eligibility.resolve" => Some(handle_resolve(state, req, false)),
        "eligibility.count" => Some(handle_resolve(state, req, true)),
        "eligibility.breakdown" => Some(handle_breakdown(state, req)),
        _ => None,
    }
}
