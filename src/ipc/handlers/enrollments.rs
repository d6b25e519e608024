use crate::enrollment;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};

fn enroll(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    to_json(&enrollment::enroll(conn, &student_id, &course_id, Utc::now())?)
}

fn drop_enrollment(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    to_json(&enrollment::drop(conn, &enrollment_id, Utc::now())?)
}

fn complete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    to_json(&enrollment::complete(conn, &enrollment_id, Utc::now())?)
}

fn suspend(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    to_json(&enrollment::suspend(conn, &enrollment_id)?)
}

fn reinstate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    to_json(&enrollment::reinstate(conn, &enrollment_id)?)
}

fn get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    to_json(&enrollment::get(conn, &enrollment_id)?)
}

fn list_for_course(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let rows = enrollment::list_for_course(conn, &course_id)?;
    Ok(json!({ "enrollments": to_json(&rows)? }))
}

fn list_for_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let rows = enrollment::list_for_student(conn, &student_id)?;
    Ok(json!({ "enrollments": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "enrollments.enroll" => with_db(state, req, enroll),
        "enrollments.drop" => with_db(state, req, drop_enrollment),
        "enrollments.complete" => with_db(state, req, complete),
        "enrollments.suspend" => with_db(state, req, suspend),
        "enrollments.reinstate" => with_db(state, req, reinstate),
        "enrollments.get" => with_db(state, req, get),
        "enrollments.listForCourse" => with_db(state, req, list_for_course),
        "enrollments.listForStudent" => with_db(state, req, list_for_student),
        _ => return None,
    };
    Some(resp)
}
