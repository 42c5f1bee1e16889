use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "examseat.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id INTEGER PRIMARY KEY,
            academic_year_id INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS papers(
            id INTEGER PRIMARY KEY,
            subject_id INTEGER NOT NULL,
            subject_type_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            program_course_id INTEGER NOT NULL,
            academic_year_id INTEGER NOT NULL,
            is_optional INTEGER NOT NULL,
            is_active INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            whatsapp_number TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS personal_details(
            user_id INTEGER PRIMARY KEY,
            gender TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            uid TEXT,
            registration_number TEXT,
            roll_number TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cu_registration_requests(
            student_id INTEGER PRIMARY KEY,
            application_number TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotions(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            program_course_id INTEGER NOT NULL,
            session_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            shift_id INTEGER,
            start_date TEXT,
            created_at TEXT NOT NULL,
            is_alumni INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_promotions_class_course ON promotions(class_id, program_course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_selection_meta(
            id INTEGER PRIMARY KEY,
            subject_type_id INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_selection_meta_classes(
            meta_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            PRIMARY KEY(meta_id, class_id),
            FOREIGN KEY(meta_id) REFERENCES subject_selection_meta(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_subject_selections(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            meta_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            is_active INTEGER NOT NULL,
            updated_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(meta_id) REFERENCES subject_selection_meta(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_selections_student ON student_subject_selections(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS floors(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id INTEGER PRIMARY KEY,
            floor_id INTEGER,
            name TEXT NOT NULL,
            max_students_per_bench INTEGER NOT NULL,
            number_of_benches INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(floor_id) REFERENCES floors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS room_bookings(
            exam_id INTEGER NOT NULL,
            room_id INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            PRIMARY KEY(exam_id, room_id, start_time),
            FOREIGN KEY(room_id) REFERENCES rooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_room_bookings_room ON room_bookings(room_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS allotments(
            id TEXT PRIMARY KEY,
            criteria TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS allotment_seats(
            allotment_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            room_id INTEGER NOT NULL,
            seat_number TEXT NOT NULL,
            row_json TEXT NOT NULL,
            PRIMARY KEY(allotment_id, position),
            UNIQUE(allotment_id, student_id),
            UNIQUE(allotment_id, room_id, seat_number),
            FOREIGN KEY(allotment_id) REFERENCES allotments(id)
        )",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        let alumni: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('promotions') WHERE name = 'is_alumni'",
                [],
                |r| r.get(0),
            )
            .expect("pragma");
        assert_eq!(alumni, 1);
    }

    #[test]
    fn allotment_seats_reject_a_shared_seat() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        conn.execute(
            "INSERT INTO allotments(id, criteria, created_at) VALUES('a1', '{}', '2025-01-01 00:00:00')",
            [],
        )
        .expect("allotment");
        conn.execute(
            "INSERT INTO allotment_seats VALUES('a1', 0, 1, 7, '1A', '{}')",
            [],
        )
        .expect("first seat");
        let dup = conn.execute(
            "INSERT INTO allotment_seats VALUES('a1', 1, 2, 7, '1A', '{}')",
            [],
        );
        assert!(dup.is_err());
    }
}
