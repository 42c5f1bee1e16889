use crate::eligibility::{
    latest_promotions, EligibilityDataset, ExamFilterCriteria, Gender, Paper, PromotionRecord,
    SelectionMeta, StudentAccount, StudentId, SubjectSelection,
};
use crate::error::{ExamError, ExamResult};
use crate::rooms::{Room, RoomBooking, TimeSlot};
use crate::seating::{SeatAssignment, StudentRecord};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn id_values(ids: &[i64]) -> Vec<Value> {
    ids.iter().map(|v| Value::Integer(*v)).collect()
}

/// Ids bound per `IN (...)` list. Stays well under SQLite's variable limit.
const IN_CHUNK: usize = 500;

/// Runs `query` once per slice of at most `IN_CHUNK` ids and concatenates
/// the rows.
fn query_in_chunks<T>(
    ids: &[i64],
    mut query: impl FnMut(&[i64]) -> ExamResult<Vec<T>>,
) -> ExamResult<Vec<T>> {
    let mut out = Vec::new();
    for chunk in ids.chunks(IN_CHUNK) {
        out.extend(query(chunk)?);
    }
    Ok(out)
}

/// Eligibility data read straight from the workspace database.
pub struct SqliteDataset<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDataset<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SqliteDataset<'_> {
    fn papers_in(&self, paper_ids: &[i64]) -> ExamResult<Vec<Paper>> {
        let sql = format!(
            "SELECT id, subject_id, subject_type_id, class_id, program_course_id,
                    academic_year_id, is_optional, is_active
             FROM papers
             WHERE id IN ({})",
            placeholders(paper_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(id_values(paper_ids)), |r| {
                Ok(Paper {
                    id: r.get(0)?,
                    subject_id: r.get(1)?,
                    subject_type_id: r.get(2)?,
                    class_id: r.get(3)?,
                    program_course_id: r.get(4)?,
                    academic_year_id: r.get(5)?,
                    is_optional: r.get::<_, i64>(6)? != 0,
                    is_active: r.get::<_, i64>(7)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn promotions_in(
        &self,
        class_id: i64,
        program_course_ids: &[i64],
    ) -> ExamResult<Vec<PromotionRecord>> {
        let sql = format!(
            "SELECT pr.id, pr.student_id, pr.program_course_id, pr.session_id,
                    s.academic_year_id, pr.class_id, pr.shift_id, pr.start_date,
                    pr.created_at, pr.is_alumni
             FROM promotions pr
             JOIN sessions s ON s.id = pr.session_id
             WHERE pr.class_id = ?
               AND pr.program_course_id IN ({})",
            placeholders(program_course_ids.len())
        );
        let mut bind = vec![Value::Integer(class_id)];
        bind.extend(id_values(program_course_ids));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), |r| {
                Ok(PromotionRecord {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    program_course_id: r.get(2)?,
                    session_id: r.get(3)?,
                    academic_year_id: r.get(4)?,
                    class_id: r.get(5)?,
                    shift_id: r.get(6)?,
                    start_date: r.get::<_, Option<NaiveDate>>(7)?,
                    created_at: r.get::<_, NaiveDateTime>(8)?,
                    is_alumni: r.get::<_, i64>(9)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn selections_in(&self, student_ids: &[StudentId]) -> ExamResult<Vec<SubjectSelection>> {
        let sql = format!(
            "SELECT id, student_id, subject_id, meta_id, version, is_active, updated_at, created_at
             FROM student_subject_selections
             WHERE student_id IN ({})",
            placeholders(student_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(id_values(student_ids)), |r| {
                Ok(SubjectSelection {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    subject_id: r.get(2)?,
                    subject_selection_meta_id: r.get(3)?,
                    version: r.get(4)?,
                    is_active: r.get::<_, i64>(5)? != 0,
                    updated_at: r.get::<_, Option<NaiveDateTime>>(6)?,
                    created_at: r.get::<_, NaiveDateTime>(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn accounts_in(&self, student_ids: &[StudentId]) -> ExamResult<Vec<StudentAccount>> {
        let sql = format!(
            "SELECT st.id, st.uid, u.is_active, pd.gender
             FROM students st
             JOIN users u ON u.id = st.user_id
             LEFT JOIN personal_details pd ON pd.user_id = u.id
             WHERE st.id IN ({})",
            placeholders(student_ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(id_values(student_ids)), |r| {
                let gender: Option<String> = r.get(3)?;
                Ok(StudentAccount {
                    student_id: r.get(0)?,
                    uid: r.get(1)?,
                    is_active: r.get::<_, i64>(2)? != 0,
                    gender: gender.as_deref().and_then(Gender::parse),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl EligibilityDataset for SqliteDataset<'_> {
    fn papers(&self, paper_ids: &[i64]) -> ExamResult<Vec<Paper>> {
        let mut papers = query_in_chunks(paper_ids, |ids| self.papers_in(ids))?;
        papers.sort_by_key(|p| p.id);
        Ok(papers)
    }

    fn promotions(
        &self,
        class_id: i64,
        program_course_ids: &[i64],
    ) -> ExamResult<Vec<PromotionRecord>> {
        let mut rows =
            query_in_chunks(program_course_ids, |pcs| self.promotions_in(class_id, pcs))?;
        rows.sort_by_key(|p| (p.student_id, p.id));
        Ok(rows)
    }

    fn subject_selections(&self, student_ids: &[StudentId]) -> ExamResult<Vec<SubjectSelection>> {
        let mut rows = query_in_chunks(student_ids, |ids| self.selections_in(ids))?;
        rows.sort_by_key(|s| s.id);
        Ok(rows)
    }

    fn selection_metas(&self) -> ExamResult<Vec<SelectionMeta>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, subject_type_id FROM subject_selection_meta ORDER BY id")?;
        let mut metas = stmt
            .query_map([], |r| {
                Ok(SelectionMeta {
                    id: r.get(0)?,
                    subject_type_id: r.get(1)?,
                    class_ids: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut map_stmt = self.conn.prepare(
            "SELECT meta_id, class_id FROM subject_selection_meta_classes ORDER BY meta_id, class_id",
        )?;
        let mappings = map_stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut by_meta: HashMap<i64, Vec<i64>> = HashMap::new();
        for (meta_id, class_id) in mappings {
            by_meta.entry(meta_id).or_default().push(class_id);
        }
        for meta in &mut metas {
            meta.class_ids = by_meta.remove(&meta.id).unwrap_or_default();
        }
        Ok(metas)
    }

    fn student_accounts(&self, student_ids: &[StudentId]) -> ExamResult<Vec<StudentAccount>> {
        let mut rows = query_in_chunks(student_ids, |ids| self.accounts_in(ids))?;
        rows.sort_by_key(|a| a.student_id);
        Ok(rows)
    }
}

/// Profile rows for the given students, unsorted. Inactive accounts are left
/// out unless the criteria carry an uploaded uid list.
pub fn load_student_records(
    conn: &Connection,
    student_ids: &[StudentId],
    criteria: &ExamFilterCriteria,
) -> ExamResult<Vec<StudentRecord>> {
    if student_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut rows = query_in_chunks(student_ids, |ids| {
        let sql = format!(
            "SELECT st.id, st.uid, u.name, u.email, u.whatsapp_number,
                    cr.application_number, st.registration_number, st.roll_number, u.is_active
             FROM students st
             JOIN users u ON u.id = st.user_id
             LEFT JOIN cu_registration_requests cr ON cr.student_id = st.id
             WHERE st.id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunk = stmt
            .query_map(params_from_iter(id_values(ids)), |r| {
                Ok((
                    StudentRecord {
                        student_id: r.get(0)?,
                        uid: r.get(1)?,
                        name: r.get(2)?,
                        email: r.get(3)?,
                        whatsapp_phone: r.get(4)?,
                        cu_registration_application_number: r.get(5)?,
                        registration_number: r.get(6)?,
                        roll_number: r.get(7)?,
                        program_course_id: None,
                        shift_id: None,
                    },
                    r.get::<_, i64>(8)? != 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunk)
    })?;
    rows.sort_by_key(|(rec, _)| rec.student_id);

    let dataset = SqliteDataset::new(conn);
    let promotions = dataset.promotions(criteria.class_id, &criteria.program_course_ids)?;
    let latest = latest_promotions(criteria, promotions);

    let waive_active = !criteria.uids.is_empty();
    Ok(rows
        .into_iter()
        .filter(|(_, active)| *active || waive_active)
        .map(|(mut rec, _)| {
            if let Some(p) = latest.get(&rec.student_id) {
                rec.program_course_id = Some(p.program_course_id);
                rec.shift_id = p.shift_id;
            }
            rec
        })
        .collect())
}

fn room_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: r.get(0)?,
        floor_id: r.get(1)?,
        floor_name: r.get(2)?,
        name: r.get(3)?,
        max_students_per_bench: r.get(4)?,
        number_of_benches: r.get(5)?,
        is_active: r.get::<_, i64>(6)? != 0,
    })
}

const ROOM_SELECT: &str = "SELECT r.id, r.floor_id, f.name, r.name, r.max_students_per_bench,
                                  r.number_of_benches, r.is_active
                           FROM rooms r
                           LEFT JOIN floors f ON f.id = r.floor_id";

pub fn load_rooms(conn: &Connection) -> ExamResult<Vec<Room>> {
    let sql = format!("{ROOM_SELECT} ORDER BY r.id");
    let mut stmt = conn.prepare(&sql)?;
    let rooms = stmt
        .query_map([], room_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rooms)
}

/// Rooms in exactly the order the ids were given. Repeated or inactive rooms
/// are refused.
pub fn load_rooms_by_id(conn: &Connection, room_ids: &[i64]) -> ExamResult<Vec<Room>> {
    let mut seen = HashSet::with_capacity(room_ids.len());
    if let Some(dup) = room_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(ExamError::invalid(format!("room {dup} listed more than once")));
    }

    let sql = format!("{ROOM_SELECT} WHERE r.id = ?");
    let mut stmt = conn.prepare(&sql)?;
    let mut out = Vec::with_capacity(room_ids.len());
    for id in room_ids {
        let room = stmt.query_row([id], room_from_row).optional()?;
        match room {
            Some(r) if r.is_active => out.push(r),
            Some(_) => return Err(ExamError::invalid(format!("room {id} is not active"))),
            None => return Err(ExamError::NotFound(format!("room {id} not found"))),
        }
    }
    Ok(out)
}

pub fn load_bookings(conn: &Connection) -> ExamResult<Vec<RoomBooking>> {
    let mut stmt = conn.prepare(
        "SELECT exam_id, room_id, start_time, end_time FROM room_bookings ORDER BY exam_id, room_id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(RoomBooking {
                exam_id: r.get(0)?,
                room_id: r.get(1)?,
                slot: TimeSlot {
                    start_time: r.get(2)?,
                    end_time: r.get(3)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_allotment(
    conn: &Connection,
    criteria: &ExamFilterCriteria,
    seats: &[SeatAssignment],
) -> ExamResult<String> {
    let allotment_id = Uuid::new_v4().to_string();
    let criteria_json = serde_json::to_string(criteria)
        .map_err(|e| ExamError::invalid(format!("criteria not serializable: {e}")))?;
    let created_at = chrono::Utc::now().naive_utc();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO allotments(id, criteria, created_at) VALUES(?, ?, ?)",
        (&allotment_id, &criteria_json, created_at),
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO allotment_seats(allotment_id, position, student_id, room_id, seat_number, row_json)
             VALUES(?, ?, ?, ?, ?, ?)",
        )?;
        for (i, seat) in seats.iter().enumerate() {
            let row_json = serde_json::to_string(seat)
                .map_err(|e| ExamError::invalid(format!("seat not serializable: {e}")))?;
            stmt.execute((
                &allotment_id,
                i as i64,
                seat.student_id,
                seat.room_id,
                &seat.seat_number,
                &row_json,
            ))?;
        }
    }
    tx.commit()?;
    Ok(allotment_id)
}

pub fn load_allotment(conn: &Connection, allotment_id: &str) -> ExamResult<Vec<SeatAssignment>> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM allotments WHERE id = ?", [allotment_id], |r| {
            r.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(ExamError::NotFound("allotment not found".into()));
    }

    let mut stmt = conn.prepare(
        "SELECT row_json FROM allotment_seats WHERE allotment_id = ? ORDER BY position",
    )?;
    let raw = stmt
        .query_map([allotment_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    raw.iter()
        .map(|s| {
            serde_json::from_str(s)
                .map_err(|e| ExamError::invalid(format!("stored seat row unreadable: {e}")))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub id: i64,
    pub academic_year_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRow {
    pub id: i64,
    pub student_id: i64,
    pub program_course_id: i64,
    pub session_id: i64,
    pub class_id: i64,
    #[serde(default)]
    pub shift_id: Option<i64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub is_alumni: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub whatsapp_number: String,
    pub is_active: bool,
    #[serde(default)]
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub roll_number: Option<String>,
    #[serde(default)]
    pub cu_registration_application_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloorRow {
    pub id: i64,
    pub name: String,
}

/// A workspace snapshot as supplied by the surrounding application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub sessions: Vec<SessionRow>,
    pub papers: Vec<Paper>,
    pub users: Vec<UserRow>,
    pub students: Vec<StudentRow>,
    pub promotions: Vec<PromotionRow>,
    pub selection_metas: Vec<SelectionMeta>,
    pub subject_selections: Vec<SubjectSelection>,
    pub floors: Vec<FloorRow>,
    pub rooms: Vec<Room>,
    pub room_bookings: Vec<RoomBooking>,
}

/// Upserts every row of the snapshot in one transaction. Returns per-table
/// row counts.
pub fn import_snapshot(conn: &Connection, snap: &Snapshot) -> ExamResult<BTreeMap<&'static str, usize>> {
    let tx = conn.unchecked_transaction()?;
    let mut counts = BTreeMap::new();

    for s in &snap.sessions {
        tx.execute(
            "INSERT INTO sessions(id, academic_year_id) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET academic_year_id = excluded.academic_year_id",
            (s.id, s.academic_year_id),
        )?;
    }
    counts.insert("sessions", snap.sessions.len());

    for p in &snap.papers {
        tx.execute(
            "INSERT OR REPLACE INTO papers(
                id, subject_id, subject_type_id, class_id, program_course_id,
                academic_year_id, is_optional, is_active
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                p.id,
                p.subject_id,
                p.subject_type_id,
                p.class_id,
                p.program_course_id,
                p.academic_year_id,
                p.is_optional as i64,
                p.is_active as i64,
            ),
        )?;
    }
    counts.insert("papers", snap.papers.len());

    for u in &snap.users {
        tx.execute(
            "INSERT INTO users(id, name, email, whatsapp_number, is_active)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               email = excluded.email,
               whatsapp_number = excluded.whatsapp_number,
               is_active = excluded.is_active",
            (u.id, &u.name, &u.email, &u.whatsapp_number, u.is_active as i64),
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO personal_details(user_id, gender) VALUES(?, ?)",
            (u.id, u.gender.map(Gender::as_str)),
        )?;
    }
    counts.insert("users", snap.users.len());

    for s in &snap.students {
        tx.execute(
            "INSERT INTO students(id, user_id, uid, registration_number, roll_number)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               user_id = excluded.user_id,
               uid = excluded.uid,
               registration_number = excluded.registration_number,
               roll_number = excluded.roll_number",
            (s.id, s.user_id, &s.uid, &s.registration_number, &s.roll_number),
        )?;
        if let Some(app) = &s.cu_registration_application_number {
            tx.execute(
                "INSERT OR REPLACE INTO cu_registration_requests(student_id, application_number)
                 VALUES(?, ?)",
                (s.id, app),
            )?;
        }
    }
    counts.insert("students", snap.students.len());

    for p in &snap.promotions {
        tx.execute(
            "INSERT OR REPLACE INTO promotions(
                id, student_id, program_course_id, session_id, class_id, shift_id,
                start_date, created_at, is_alumni
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                p.id,
                p.student_id,
                p.program_course_id,
                p.session_id,
                p.class_id,
                p.shift_id,
                p.start_date,
                p.created_at,
                p.is_alumni as i64,
            ),
        )?;
    }
    counts.insert("promotions", snap.promotions.len());

    for m in &snap.selection_metas {
        tx.execute(
            "INSERT INTO subject_selection_meta(id, subject_type_id) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET subject_type_id = excluded.subject_type_id",
            (m.id, m.subject_type_id),
        )?;
        tx.execute(
            "DELETE FROM subject_selection_meta_classes WHERE meta_id = ?",
            [m.id],
        )?;
        for class_id in &m.class_ids {
            tx.execute(
                "INSERT OR IGNORE INTO subject_selection_meta_classes(meta_id, class_id) VALUES(?, ?)",
                (m.id, class_id),
            )?;
        }
    }
    counts.insert("selectionMetas", snap.selection_metas.len());

    for s in &snap.subject_selections {
        tx.execute(
            "INSERT OR REPLACE INTO student_subject_selections(
                id, student_id, subject_id, meta_id, version, is_active, updated_at, created_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                s.id,
                s.student_id,
                s.subject_id,
                s.subject_selection_meta_id,
                s.version,
                s.is_active as i64,
                s.updated_at,
                s.created_at,
            ),
        )?;
    }
    counts.insert("subjectSelections", snap.subject_selections.len());

    for f in &snap.floors {
        tx.execute(
            "INSERT INTO floors(id, name) VALUES(?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            (f.id, &f.name),
        )?;
    }
    counts.insert("floors", snap.floors.len());

    for r in &snap.rooms {
        tx.execute(
            "INSERT INTO rooms(
                id, floor_id, name, max_students_per_bench, number_of_benches, is_active
             ) VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               floor_id = excluded.floor_id,
               name = excluded.name,
               max_students_per_bench = excluded.max_students_per_bench,
               number_of_benches = excluded.number_of_benches,
               is_active = excluded.is_active",
            (
                r.id,
                r.floor_id,
                &r.name,
                r.max_students_per_bench,
                r.number_of_benches,
                r.is_active as i64,
            ),
        )?;
    }
    counts.insert("rooms", snap.rooms.len());

    for b in &snap.room_bookings {
        tx.execute(
            "INSERT INTO room_bookings(exam_id, room_id, start_time, end_time) VALUES(?, ?, ?, ?)
             ON CONFLICT(exam_id, room_id, start_time) DO UPDATE SET end_time = excluded.end_time",
            (b.exam_id, b.room_id, b.slot.start_time, b.slot.end_time),
        )?;
    }
    counts.insert("roomBookings", snap.room_bookings.len());

    tx.commit()?;
    Ok(counts)
}
