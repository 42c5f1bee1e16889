use crate::ipc::error::ok;
use crate::ipc::helpers::{exam_err, parse_params, require_db};
use crate::ipc::types::{AppState, Request};
use crate::rooms::{eligible_rooms, TimeSlot};
use crate::store;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct EligibleParams {
    #[serde(default)]
    slots: Vec<TimeSlot>,
}

fn handle_rooms_eligible(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let params: EligibleParams = match parse_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let result = store::load_rooms(conn).and_then(|rooms| {
        let bookings = store::load_bookings(conn)?;
        eligible_rooms(rooms, &bookings, &params.slots)
    });
    match result {
        Ok(rooms) => ok(&req.id, json!({ "rooms": rooms })),
        Err(e) => exam_err(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rooms.eligible" => Some(handle_rooms_eligible(state, req)),
        _ => None,
    }
}
