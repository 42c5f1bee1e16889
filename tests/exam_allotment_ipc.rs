use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_examseatd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examseatd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Class 3, year 2025. Paper 1 is mandatory for program course 10, paper 2 is
/// optional for program course 11. Students 1-5 sit in course 10; student 6 in
/// course 11 picked the optional subject, as did student 3 (already mandatory).
/// Student 7 is inactive, student 8 is alumni-only.
fn snapshot() -> serde_json::Value {
    let uids = ["U05", "U03", "U01", "U06", "U02", "U04", "U00", "U07"];
    let users: Vec<_> = (1..=8)
        .map(|i| {
            let gender = if i % 2 == 0 { "MALE" } else { "FEMALE" };
            json!({
                "id": i,
                "name": format!("Student {i}"),
                "email": format!("s{i}@college.test"),
                "isActive": i != 7,
                "gender": gender
            })
        })
        .collect();
    let students: Vec<_> = (1..=8)
        .map(|i| {
            json!({
                "id": i,
                "userId": i,
                "uid": uids[i - 1],
                "rollNumber": format!("R{:02}", 9 - i),
                "cuRegistrationApplicationNumber": format!("APP{:02}", i)
            })
        })
        .collect();
    let promotions: Vec<_> = (1..=8)
        .map(|i| {
            let program_course_id = if i == 6 { 11 } else { 10 };
            let shift_id = if i <= 3 { 1 } else { 2 };
            json!({
                "id": i,
                "studentId": i,
                "programCourseId": program_course_id,
                "sessionId": 1,
                "classId": 3,
                "shiftId": shift_id,
                "startDate": "2025-07-01",
                "createdAt": "2025-07-01T10:00:00",
                "isAlumni": i == 8
            })
        })
        .collect();

    json!({
        "sessions": [{ "id": 1, "academicYearId": 2025 }],
        "papers": [
            { "id": 1, "subjectId": 500, "subjectTypeId": 1, "classId": 3, "programCourseId": 10,
              "academicYearId": 2025, "isOptional": false, "isActive": true },
            { "id": 2, "subjectId": 600, "subjectTypeId": 2, "classId": 3, "programCourseId": 11,
              "academicYearId": 2025, "isOptional": true, "isActive": true }
        ],
        "users": users,
        "students": students,
        "promotions": promotions,
        "selectionMetas": [{ "id": 9, "subjectTypeId": 2, "classIds": [3] }],
        "subjectSelections": [
            { "id": 1, "studentId": 6, "subjectId": 600, "subjectSelectionMetaId": 9, "version": 1,
              "isActive": true, "createdAt": "2025-06-01T08:00:00" },
            { "id": 2, "studentId": 3, "subjectId": 600, "subjectSelectionMetaId": 9, "version": 1,
              "isActive": true, "createdAt": "2025-06-01T08:00:00" }
        ],
        "floors": [{ "id": 1, "name": "Ground" }],
        "rooms": [
            { "id": 20, "floorId": 1, "name": "G-02", "maxStudentsPerBench": 3, "numberOfBenches": 2 },
            { "id": 21, "floorId": 1, "name": "G-01", "maxStudentsPerBench": 2, "numberOfBenches": 1 },
            { "id": 22, "name": "Annex", "maxStudentsPerBench": 2, "numberOfBenches": 4, "isActive": false }
        ],
        "roomBookings": [
            { "examId": 77, "roomId": 21, "startTime": "2025-11-03T10:00:00", "endTime": "2025-11-03T12:00:00" }
        ]
    })
}

fn criteria() -> serde_json::Value {
    json!({
        "classId": 3,
        "programCourseIds": [10, 11],
        "paperIds": [1, 2],
        "academicYearIds": [2025]
    })
}

fn with(base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    let mut out = base;
    for (k, v) in extra.as_object().expect("object").iter() {
        out[k] = v.clone();
    }
    out
}

fn open_seeded() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir("examseat-allotment");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let imported = request_ok(&mut stdin, &mut reader, "seed", "dataset.import", snapshot());
    assert_eq!(imported["imported"]["students"], json!(8));
    (child, stdin, reader)
}

#[test]
fn eligible_set_unions_mandatory_and_optional_students() {
    let (_child, mut stdin, mut reader) = open_seeded();

    let resolved = request_ok(&mut stdin, &mut reader, "1", "eligibility.resolve", criteria());
    assert_eq!(resolved["studentIds"], json!([1, 2, 3, 4, 5, 6]));

    let count = request_ok(&mut stdin, &mut reader, "2", "eligibility.count", criteria());
    assert_eq!(count["count"], json!(6));

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "eligibility.resolve",
        with(criteria(), json!({ "paperIds": [] })),
    );
    assert_eq!(empty["studentIds"], json!([]));

    let by_shift = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "eligibility.resolve",
        with(criteria(), json!({ "shiftIds": [1] })),
    );
    assert_eq!(by_shift["studentIds"], json!([1, 2, 3]));

    let males = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "eligibility.resolve",
        with(criteria(), json!({ "gender": "MALE" })),
    );
    assert_eq!(males["studentIds"], json!([2, 4, 6]));

    // An uploaded roster overrides the inactive account of student 7.
    let uploaded = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "eligibility.resolve",
        with(criteria(), json!({ "uids": ["U00", "U01"] })),
    );
    assert_eq!(uploaded["studentIds"], json!([3, 7]));
}

#[test]
fn breakdown_counts_each_course_and_shift() {
    let (_child, mut stdin, mut reader) = open_seeded();

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "eligibility.breakdown",
        with(
            criteria(),
            json!({
                "combinations": [
                    { "programCourseId": 10, "shiftId": 1 },
                    { "programCourseId": 10, "shiftId": 2 },
                    { "programCourseId": 11, "shiftId": 0 }
                ]
            }),
        ),
    );
    let counts: Vec<i64> = out["breakdown"]
        .as_array()
        .expect("breakdown")
        .iter()
        .map(|c| c["count"].as_i64().expect("count"))
        .collect();
    assert_eq!(counts, vec![3, 2, 1]);
    assert_eq!(out["total"], json!(6));
}

#[test]
fn allotment_seats_sorted_roster_bench_by_bench() {
    let (_child, mut stdin, mut reader) = open_seeded();

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "seating.allot",
        with(criteria(), json!({ "assignBy": "UID", "roomIds": [20] })),
    );
    let assignments = out["assignments"].as_array().expect("assignments");
    let got: Vec<(String, String)> = assignments
        .iter()
        .map(|a| {
            (
                a["uid"].as_str().expect("uid").to_string(),
                a["seatNumber"].as_str().expect("seat").to_string(),
            )
        })
        .collect();
    let expected: Vec<(String, String)> = [
        ("U01", "1A"),
        ("U02", "1B"),
        ("U03", "1C"),
        ("U04", "2A"),
        ("U05", "2B"),
        ("U06", "2C"),
    ]
    .iter()
    .map(|(u, s)| (u.to_string(), s.to_string()))
    .collect();
    assert_eq!(got, expected);
    assert!(assignments
        .iter()
        .all(|a| a["roomName"] == json!("G-02") && a["floorName"] == json!("Ground")));
    assert_eq!(assignments[3]["programCourseId"], json!(11));

    let allotment_id = out["allotmentId"].as_str().expect("allotmentId").to_string();
    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "seating.allotment",
        json!({ "allotmentId": allotment_id }),
    );
    assert_eq!(stored["assignments"], out["assignments"]);

    // Same inputs, same seating.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "seating.allot",
        with(criteria(), json!({ "assignBy": "UID", "roomIds": [20] })),
    );
    assert_eq!(again["assignments"], out["assignments"]);
    assert_ne!(again["allotmentId"], out["allotmentId"]);
}

#[test]
fn allotment_spills_into_next_room_and_stops_at_capacity() {
    let (_child, mut stdin, mut reader) = open_seeded();

    // Roll numbers run backwards, so student 5 comes first.
    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "seating.allot",
        with(
            criteria(),
            json!({ "assignBy": "CU_ROLL_NUMBER", "roomIds": [21, 20], "paperIds": [1] }),
        ),
    );
    let seats: Vec<(i64, String, String)> = out["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .map(|a| {
            (
                a["studentId"].as_i64().expect("id"),
                a["roomName"].as_str().expect("room").to_string(),
                a["seatNumber"].as_str().expect("seat").to_string(),
            )
        })
        .collect();
    assert_eq!(
        seats,
        vec![
            (5, "G-01".to_string(), "1A".to_string()),
            (4, "G-01".to_string(), "1C".to_string()),
            (3, "G-02".to_string(), "1A".to_string()),
            (2, "G-02".to_string(), "1B".to_string()),
            (1, "G-02".to_string(), "1C".to_string()),
        ]
    );

    let missing = request_raw(
        &mut stdin,
        &mut reader,
        "2",
        "seating.allot",
        with(criteria(), json!({ "roomIds": [99] })),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));

    let no_rooms = request_raw(
        &mut stdin,
        &mut reader,
        "3",
        "seating.allot",
        with(criteria(), json!({ "roomIds": [] })),
    );
    assert_eq!(no_rooms["error"]["code"], json!("bad_params"));

    let repeated = request_raw(
        &mut stdin,
        &mut reader,
        "4",
        "seating.allot",
        with(criteria(), json!({ "roomIds": [21, 21] })),
    );
    assert_eq!(repeated["error"]["code"], json!("bad_params"));

    let closed = request_raw(
        &mut stdin,
        &mut reader,
        "5",
        "seating.allot",
        with(criteria(), json!({ "roomIds": [20, 22] })),
    );
    assert_eq!(closed["error"]["code"], json!("bad_params"));
}

#[test]
fn eligible_rooms_skip_overlapping_bookings() {
    let (_child, mut stdin, mut reader) = open_seeded();

    let clash = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "rooms.eligible",
        json!({ "slots": [{ "startTime": "2025-11-03T11:00:00", "endTime": "2025-11-03T13:00:00" }] }),
    );
    let names: Vec<&str> = clash["rooms"]
        .as_array()
        .expect("rooms")
        .iter()
        .map(|r| r["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["G-02"]);

    let free = request_ok(&mut stdin, &mut reader, "2", "rooms.eligible", json!({}));
    let names: Vec<&str> = free["rooms"]
        .as_array()
        .expect("rooms")
        .iter()
        .map(|r| r["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["G-01", "G-02"]);
}

#[test]
fn seating_assign_sorts_when_asked() {
    let (_child, mut stdin, mut reader) = open_seeded();

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "seating.assign",
        json!({
            "assignBy": "CU_REGISTRATION_NUMBER",
            "students": [
                { "studentId": 1, "uid": "A", "cuRegistrationApplicationNumber": "B" },
                { "studentId": 2, "uid": "B" },
                { "studentId": 3, "uid": "C", "cuRegistrationApplicationNumber": "A" }
            ],
            "rooms": [
                { "roomId": 1, "roomName": "Hall", "maxStudentsPerBench": 1, "numberOfBenches": 2 }
            ]
        }),
    );
    let ids: Vec<i64> = out["assignments"]
        .as_array()
        .expect("assignments")
        .iter()
        .map(|a| a["studentId"].as_i64().expect("id"))
        .collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(out["assignments"][1]["seatNumber"], json!("2A"));
}
