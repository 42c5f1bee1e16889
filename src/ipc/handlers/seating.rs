use crate::eligibility::{resolve_eligible_students, ExamFilterCriteria};
use crate::error::{ExamError, ExamResult};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{exam_err, parse_params, require_db};
use crate::ipc::types::{AppState, Request};
use crate::rooms::Room;
use crate::seating::{
    assign_seats, generate_seat_positions, sort_roster, AssignBy, RoomAssignment, SeatAssignment,
    StudentRecord,
};
use crate::store::{self, SqliteDataset};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

fn handle_positions(req: &Request) -> serde_json::Value {
    let Some(n) = req.params.get("maxStudentsPerBench").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing maxStudentsPerBench", None);
    };
    if n < 0 {
        return err(&req.id, "bad_params", "maxStudentsPerBench must not be negative", None);
    }
    match generate_seat_positions(n as usize) {
        Ok(letters) => {
            let positions: Vec<String> = letters.into_iter().map(String::from).collect();
            ok(&req.id, json!({ "positions": positions }))
        }
        Err(e) => exam_err(req, &e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignParams {
    students: Vec<StudentRecord>,
    rooms: Vec<RoomAssignment>,
    /// Absent means the caller already ordered the roster.
    #[serde(default)]
    assign_by: Option<AssignBy>,
}

fn handle_assign(req: &Request) -> serde_json::Value {
    let mut params: AssignParams = match parse_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Some(by) = params.assign_by {
        sort_roster(&mut params.students, by);
    }
    match assign_seats(&params.students, &params.rooms) {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => exam_err(req, &e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllotParams {
    #[serde(flatten)]
    criteria: ExamFilterCriteria,
    room_ids: Vec<i64>,
}

fn allot(conn: &Connection, params: &AllotParams) -> ExamResult<(String, Vec<SeatAssignment>)> {
    if params.room_ids.is_empty() {
        return Err(ExamError::invalid("roomIds must not be empty"));
    }
    let rooms: Vec<RoomAssignment> = store::load_rooms_by_id(conn, &params.room_ids)?
        .iter()
        .map(Room::to_assignment)
        .collect();

    let criteria = &params.criteria;
    let ids: Vec<i64> = resolve_eligible_students(criteria, &SqliteDataset::new(conn))?
        .into_iter()
        .collect();
    let mut students = store::load_student_records(conn, &ids, criteria)?;
    sort_roster(&mut students, criteria.assign_by);

    let seats = assign_seats(&students, &rooms)?;
    let allotment_id = store::save_allotment(conn, criteria, &seats)?;
    tracing::info!(
        allotment = %allotment_id,
        eligible = ids.len(),
        seated = seats.len(),
        rooms = rooms.len(),
        "allotment saved"
    );
    Ok((allotment_id, seats))
}

fn handle_allot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let params: AllotParams = match parse_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match allot(conn, &params) {
        Ok((allotment_id, assignments)) => ok(
            &req.id,
            json!({ "allotmentId": allotment_id, "assignments": assignments }),
        ),
        Err(e) => exam_err(req, &e),
    }
}

fn handle_allotment_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(allotment_id) = req.params.get("allotmentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing allotmentId", None);
    };
    match store::load_allotment(conn, allotment_id) {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => exam_err(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "seating.positions" => Some(handle_positions(req)),
        "seating.assign" => Some(handle_assign(req)),
        "seating.allot" => Some(handle_allot(state, req)),
        "seating.allotment" => Some(handle_allotment_get(state, req)),
        _ => None,
    }
}
