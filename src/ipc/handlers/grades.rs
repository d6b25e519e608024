use crate::course_grade;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_f64, get_required_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};

fn upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    let percentage = get_required_f64(params, "percentage")?;
    to_json(&course_grade::upsert_grade(
        conn,
        &student_id,
        &course_id,
        percentage,
        Utc::now(),
    )?)
}

fn finalize(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    to_json(&course_grade::finalize(
        conn,
        &student_id,
        &course_id,
        Utc::now(),
    )?)
}

fn get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    to_json(&course_grade::get(conn, &student_id, &course_id)?)
}

fn list_for_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let grades = course_grade::list_for_student(conn, &student_id)?;
    Ok(json!({ "grades": to_json(&grades)? }))
}

fn cumulative_gpa(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    to_json(&course_grade::cumulative_gpa(conn, &student_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "grades.upsert" => with_db(state, req, upsert),
        "grades.finalize" => with_db(state, req, finalize),
        "grades.get" => with_db(state, req, get),
        "grades.listForStudent" => with_db(state, req, list_for_student),
        "grades.cumulativeGpa" => with_db(state, req, cumulative_gpa),
        _ => return None,
    };
    Some(resp)
}
