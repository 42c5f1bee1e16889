use crate::error::{ExamError, ExamResult};
use crate::seating::RoomAssignment;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: i64,
    #[serde(default)]
    pub floor_id: Option<i64>,
    #[serde(default)]
    pub floor_name: Option<String>,
    pub name: String,
    pub max_students_per_bench: i64,
    pub number_of_benches: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Room {
    pub fn to_assignment(&self) -> RoomAssignment {
        RoomAssignment {
            room_id: self.id,
            floor_id: self.floor_id,
            floor_name: self.floor_name.clone(),
            room_name: self.name.clone(),
            max_students_per_bench: self.max_students_per_bench,
            number_of_benches: self.number_of_benches,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl TimeSlot {
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

/// A room held by an already scheduled exam paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomBooking {
    pub exam_id: i64,
    pub room_id: i64,
    #[serde(flatten)]
    pub slot: TimeSlot,
}

/// Active rooms free during every requested slot, ordered by name.
pub fn eligible_rooms(
    rooms: Vec<Room>,
    bookings: &[RoomBooking],
    requested: &[TimeSlot],
) -> ExamResult<Vec<Room>> {
    for slot in requested {
        if slot.start_time >= slot.end_time {
            return Err(ExamError::invalid(format!(
                "slot starting {} must end after it starts",
                slot.start_time
            )));
        }
    }

    let mut out: Vec<Room> = rooms
        .into_iter()
        .filter(|room| room.is_active)
        .filter(|room| {
            !bookings
                .iter()
                .filter(|b| b.room_id == room.id)
                .any(|b| requested.iter().any(|slot| slot.overlaps(&b.slot)))
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Ok(out)
}
