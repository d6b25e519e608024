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
    let exe = env!("CARGO_BIN_EXE_coursebookd");
    let mut child = Command::new(exe)
        .env_remove("COURSEBOOK_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coursebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
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
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().unwrap_or("").to_string()
}

#[test]
fn requests_before_workspace_selection_are_refused() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err_code(&mut stdin, &mut reader, "1", "courses.list", json!({}));
    assert_eq!(code, "no_workspace");
    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    drop(stdin);
    let _ = child.wait();
}

#[test]
fn single_seat_course_over_ipc() {
    let workspace = temp_dir("coursebook-ipc-seat");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (s, r) = (&mut stdin, &mut reader);

    request_ok(s, r, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let course = request_ok(
        s,
        r,
        "2",
        "courses.create",
        json!({ "code": "CS101", "title": "Intro", "maxSeats": 1 }),
    );
    let course_id = course["id"].as_str().expect("course id").to_string();
    assert_eq!(course["isApproved"], false);

    let code = request_err_code(
        s,
        r,
        "3",
        "enrollments.enroll",
        json!({ "studentId": "a", "courseId": course_id }),
    );
    assert_eq!(code, "course_not_approved");
    request_ok(s, r, "4", "courses.approve", json!({ "courseId": course_id }));

    let a = request_ok(
        s,
        r,
        "5",
        "enrollments.enroll",
        json!({ "studentId": "a", "courseId": course_id }),
    );
    assert_eq!(a["status"], "enrolled");
    let a_id = a["id"].as_str().expect("enrollment id").to_string();

    let full = request(
        s,
        r,
        "6",
        "enrollments.enroll",
        json!({ "studentId": "b", "courseId": course_id }),
    );
    assert_eq!(full["error"]["code"], "course_full");
    assert_eq!(full["error"]["details"]["maxSeats"], 1);

    let dup = request_err_code(
        s,
        r,
        "7",
        "enrollments.enroll",
        json!({ "studentId": "a", "courseId": course_id }),
    );
    assert_eq!(dup, "duplicate_enrollment");

    let dropped = request_ok(s, r, "8", "enrollments.drop", json!({ "enrollmentId": a_id }));
    assert_eq!(dropped["status"], "dropped");

    request_ok(
        s,
        r,
        "9",
        "enrollments.enroll",
        json!({ "studentId": "b", "courseId": course_id }),
    );
    let seats = request_ok(s, r, "10", "courses.recount", json!({ "courseId": course_id }));
    assert_eq!(seats["currentEnrollment"], 1);
    assert_eq!(seats["consistent"], true);

    let missing = request_err_code(s, r, "11", "enrollments.enroll", json!({ "studentId": "c" }));
    assert_eq!(missing, "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn attendance_grading_and_finalize_over_ipc() {
    let workspace = temp_dir("coursebook-ipc-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (s, r) = (&mut stdin, &mut reader);

    request_ok(s, r, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let course = request_ok(
        s,
        r,
        "2",
        "courses.create",
        json!({ "code": "BIO200", "title": "Cells", "maxSeats": 10, "instructorId": "prof" }),
    );
    let course_id = course["id"].as_str().expect("course id").to_string();
    request_ok(s, r, "3", "courses.approve", json!({ "courseId": course_id }));
    for (i, student) in ["s1", "s2"].iter().enumerate() {
        request_ok(
            s,
            r,
            &format!("enroll-{}", i),
            "enrollments.enroll",
            json!({ "studentId": student, "courseId": course_id }),
        );
    }

    let report = request_ok(
        s,
        r,
        "4",
        "attendance.recordSession",
        json!({
            "courseId": course_id,
            "date": "2024-09-02",
            "sessions": [
                { "studentId": "s1", "status": "present" },
                { "studentId": "s2", "status": "absent" }
            ]
        }),
    );
    assert_eq!(report["complete"], true);
    assert_eq!(report["outcomes"][0]["result"], "applied");
    assert_eq!(report["outcomes"][0]["attendance"]["percentage"], 100.0);
    assert_eq!(report["outcomes"][1]["attendance"]["attendedClasses"], 0);

    let dup = request_err_code(
        s,
        r,
        "5",
        "attendance.recordSession",
        json!({
            "courseId": course_id,
            "date": "2024-09-02",
            "sessions": [{ "studentId": "s1", "status": "present" }]
        }),
    );
    assert_eq!(dup, "duplicate_session");
    let unknown = request_err_code(
        s,
        r,
        "6",
        "attendance.recordSession",
        json!({
            "courseId": course_id,
            "date": "2024-09-03",
            "sessions": [{ "studentId": "ghost", "status": "present" }]
        }),
    );
    assert_eq!(unknown, "unknown_enrollment");
    let bad_status = request_err_code(
        s,
        r,
        "7",
        "attendance.recordSession",
        json!({
            "courseId": course_id,
            "date": "2024-09-03",
            "sessions": [{ "studentId": "s1", "status": "asleep" }]
        }),
    );
    assert_eq!(bad_status, "bad_params");

    request_ok(
        s,
        r,
        "8",
        "setup.update",
        json!({ "section": "grading", "patch": { "defaultLatePenaltyPercent": 10 } }),
    );
    let bad_setup = request_err_code(
        s,
        r,
        "9",
        "setup.update",
        json!({ "section": "attendance", "patch": { "sessionWriteAttempts": 0 } }),
    );
    assert_eq!(bad_setup, "bad_params");

    let assignment = request_ok(
        s,
        r,
        "10",
        "assignments.create",
        json!({
            "courseId": course_id,
            "title": "Lab report",
            "totalPoints": 100,
            "dueDate": "2000-01-01T00:00:00Z",
            "lateSubmission": { "allowed": true }
        }),
    );
    assert_eq!(assignment["lateSubmission"]["penaltyPercent"], 10.0);
    let assignment_id = assignment["id"].as_str().expect("assignment id").to_string();

    let sub = request_ok(
        s,
        r,
        "11",
        "submissions.submit",
        json!({ "assignmentId": assignment_id, "studentId": "s1" }),
    );
    assert_eq!(sub["isLate"], true);
    let sub_id = sub["id"].as_str().expect("submission id").to_string();
    let graded = request_ok(
        s,
        r,
        "12",
        "submissions.grade",
        json!({ "submissionId": sub_id, "points": 80 }),
    );
    assert_eq!(graded["grade"]["letterGrade"], "C-");
    let invalid = request_err_code(
        s,
        r,
        "13",
        "submissions.grade",
        json!({ "submissionId": sub_id, "points": 101 }),
    );
    assert_eq!(invalid, "invalid_points");

    request_ok(
        s,
        r,
        "14",
        "grades.upsert",
        json!({ "studentId": "s1", "courseId": course_id, "percentage": 91 }),
    );
    let locked = request_ok(
        s,
        r,
        "15",
        "grades.finalize",
        json!({ "studentId": "s1", "courseId": course_id }),
    );
    assert_eq!(locked["finalized"], true);
    assert_eq!(locked["letterGrade"], "A-");
    let refused = request_err_code(
        s,
        r,
        "16",
        "grades.upsert",
        json!({ "studentId": "s1", "courseId": course_id, "percentage": 99 }),
    );
    assert_eq!(refused, "already_finalized");

    let gpa = request_ok(s, r, "17", "grades.cumulativeGpa", json!({ "studentId": "s1" }));
    assert_eq!(gpa["official"], 3.7);
    assert_eq!(gpa["provisional"], 3.7);
    let none = request_ok(s, r, "18", "grades.cumulativeGpa", json!({ "studentId": "s2" }));
    assert!(none["provisional"].is_null());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
