use crate::eligibility::StudentId;
use crate::error::{ExamError, ExamResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const SEAT_LETTERS: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Key used to order the roster before seats are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssignBy {
    #[default]
    #[serde(rename = "UID")]
    Uid,
    #[serde(rename = "CU_REGISTRATION_NUMBER", alias = "REGISTRATION_NUMBER")]
    RegistrationNumber,
    #[serde(rename = "CU_ROLL_NUMBER", alias = "ROLL_NUMBER")]
    RollNumber,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentRecord {
    pub student_id: StudentId,
    pub uid: Option<String>,
    pub name: String,
    pub email: String,
    pub whatsapp_phone: String,
    pub cu_registration_application_number: Option<String>,
    pub registration_number: Option<String>,
    pub roll_number: Option<String>,
    pub program_course_id: Option<i64>,
    pub shift_id: Option<i64>,
}

impl StudentRecord {
    fn sort_key(&self, assign_by: AssignBy) -> &str {
        let key = match assign_by {
            AssignBy::Uid => &self.uid,
            AssignBy::RegistrationNumber => &self.cu_registration_application_number,
            AssignBy::RollNumber => &self.roll_number,
        };
        key.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAssignment {
    pub room_id: i64,
    #[serde(default)]
    pub floor_id: Option<i64>,
    #[serde(default)]
    pub floor_name: Option<String>,
    pub room_name: String,
    pub max_students_per_bench: i64,
    pub number_of_benches: i64,
}

impl RoomAssignment {
    /// Seats in the room, or `None` when the product does not fit.
    pub fn capacity(&self) -> Option<usize> {
        let seats = self
            .max_students_per_bench
            .max(0)
            .checked_mul(self.number_of_benches.max(0))?;
        usize::try_from(seats).ok()
    }

    fn validate(&self) -> ExamResult<()> {
        let max = SEAT_LETTERS.len() as i64;
        if self.max_students_per_bench < 1 || self.max_students_per_bench > max {
            return Err(ExamError::invalid(format!(
                "room {}: maxStudentsPerBench must be between 1 and {}, got {}",
                self.room_id,
                SEAT_LETTERS.len(),
                self.max_students_per_bench
            )));
        }
        if self.number_of_benches < 0 {
            return Err(ExamError::invalid(format!(
                "room {}: numberOfBenches must not be negative, got {}",
                self.room_id, self.number_of_benches
            )));
        }
        if self.capacity().is_none() {
            return Err(ExamError::invalid(format!(
                "room {}: {} benches of {} seats is too large",
                self.room_id, self.number_of_benches, self.max_students_per_bench
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatAssignment {
    pub student_id: StudentId,
    pub uid: String,
    pub name: String,
    pub email: String,
    pub whatsapp_phone: String,
    pub cu_registration_application_number: Option<String>,
    pub floor_name: Option<String>,
    pub room_id: i64,
    pub room_name: String,
    pub seat_number: String,
    pub program_course_id: Option<i64>,
    pub shift_id: Option<i64>,
    pub registration_number: Option<String>,
    pub roll_number: Option<String>,
}

/// Seat letters used on a bench of `max_students_per_bench`.
///
/// Two students sit at the ends (A and C, B stays empty). Three fill the bench.
/// From four upwards positions are taken from both ends inward and then put
/// back in alphabetical order.
pub fn generate_seat_positions(max_students_per_bench: usize) -> ExamResult<Vec<char>> {
    let n = max_students_per_bench;
    if n == 0 || n > SEAT_LETTERS.len() {
        return Err(ExamError::invalid(format!(
            "maxStudentsPerBench must be between 1 and {}, got {}",
            SEAT_LETTERS.len(),
            n
        )));
    }

    match n {
        1 => return Ok(vec!['A']),
        2 => return Ok(vec!['A', 'C']),
        3 => return Ok(vec!['A', 'B', 'C']),
        _ => {}
    }

    let mut picked: Vec<usize> = Vec::with_capacity(n);
    let mut left = 0usize;
    let mut right = n - 1;
    while picked.len() < n && left <= right {
        picked.push(left);
        left += 1;
        if picked.len() < n && right >= left {
            picked.push(right);
            right -= 1;
        }
    }
    picked.sort_unstable();

    Ok(picked.into_iter().map(|i| SEAT_LETTERS[i] as char).collect())
}

/// Stable ascending sort on the chosen key. Missing keys compare as "".
pub fn sort_roster(students: &mut [StudentRecord], assign_by: AssignBy) {
    students.sort_by(|a, b| a.sort_key(assign_by).cmp(b.sort_key(assign_by)));
}

/// Hands out seats room by room, bench by bench, in the order given. One
/// roster cursor runs across all rooms. Stops quietly when either students or
/// seats run out.
pub fn assign_seats(
    students: &[StudentRecord],
    rooms: &[RoomAssignment],
) -> ExamResult<Vec<SeatAssignment>> {
    let mut seen = HashSet::with_capacity(rooms.len());
    for room in rooms {
        room.validate()?;
        if !seen.insert(room.room_id) {
            return Err(ExamError::invalid(format!(
                "room {} listed more than once",
                room.room_id
            )));
        }
    }

    let capacity = rooms
        .iter()
        .filter_map(RoomAssignment::capacity)
        .fold(0usize, usize::saturating_add);
    let mut out = Vec::with_capacity(students.len().min(capacity));
    let mut roster = students.iter();

    'rooms: for room in rooms {
        let letters = generate_seat_positions(room.max_students_per_bench as usize)?;
        for bench in 1..=room.number_of_benches {
            for letter in &letters {
                let Some(student) = roster.next() else {
                    break 'rooms;
                };
                out.push(seat(student, room, format!("{bench}{letter}")));
            }
        }
    }

    if out.len() < students.len() {
        tracing::warn!(
            students = students.len(),
            capacity,
            seated = out.len(),
            "room capacity exhausted before roster"
        );
    }
    Ok(out)
}

fn seat(student: &StudentRecord, room: &RoomAssignment, seat_number: String) -> SeatAssignment {
    SeatAssignment {
        student_id: student.student_id,
        uid: student.uid.clone().unwrap_or_default(),
        name: student.name.clone(),
        email: student.email.clone(),
        whatsapp_phone: student.whatsapp_phone.clone(),
        cu_registration_application_number: student.cu_registration_application_number.clone(),
        floor_name: room.floor_name.clone(),
        room_id: room.room_id,
        room_name: room.room_name.clone(),
        seat_number,
        program_course_id: student.program_course_id,
        shift_id: student.shift_id,
        registration_number: student.registration_number.clone(),
        roll_number: student.roll_number.clone(),
    }
}
