use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_f64, get_required_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::submission;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};

fn submit(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let student_id = get_required_str(params, "studentId")?;
    let content = get_optional_str(params, "content")?;
    to_json(&submission::submit(
        conn,
        &assignment_id,
        &student_id,
        content,
        Utc::now(),
    )?)
}

fn grade(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let submission_id = get_required_str(params, "submissionId")?;
    let points = get_required_f64(params, "points")?;
    let feedback = get_optional_str(params, "feedback")?;
    to_json(&submission::grade(
        conn,
        &submission_id,
        points,
        feedback,
        Utc::now(),
    )?)
}

fn get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let submission_id = get_required_str(params, "submissionId")?;
    to_json(&submission::get(conn, &submission_id)?)
}

fn list_for_assignment(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let rows = submission::list_for_assignment(conn, &assignment_id)?;
    Ok(json!({ "submissions": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "submissions.submit" => with_db(state, req, submit),
        "submissions.grade" => with_db(state, req, grade),
        "submissions.get" => with_db(state, req, get),
        "submissions.listForAssignment" => with_db(state, req, list_for_assignment),
        _ => return None,
    };
    Some(resp)
}
