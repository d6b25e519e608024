use crate::catalog::{self, LateSubmissionPolicy, NewAssignment, NewCourse};
use crate::config;
use crate::enrollment;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_required_bool, get_required_datetime, get_required_f64,
    get_required_i64, get_required_str, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let new = NewCourse {
        code: get_required_str(params, "code")?,
        title: get_required_str(params, "title")?,
        instructor_id: get_optional_str(params, "instructorId")?,
        max_seats: get_required_i64(params, "maxSeats")?,
    };
    let course = catalog::create_course(conn, new, Utc::now())?;
    to_json(&course)
}

fn courses_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    to_json(&catalog::get_course(conn, &course_id)?)
}

fn courses_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let courses = catalog::list_courses(conn)?;
    Ok(json!({ "courses": to_json(&courses)? }))
}

fn courses_approve(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    to_json(&catalog::approve_course(conn, &course_id)?)
}

fn courses_set_active(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let active = get_required_bool(params, "active")?;
    to_json(&catalog::set_course_active(conn, &course_id, active)?)
}

fn courses_set_capacity(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let max_seats = get_required_i64(params, "maxSeats")?;
    to_json(&catalog::set_course_capacity(conn, &course_id, max_seats)?)
}

fn courses_recount(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let seats = enrollment::recount(conn, &course_id)?;
    let mut out = to_json(&seats)?;
    out["consistent"] = json!(seats.consistent());
    Ok(out)
}

fn parse_late_policy(conn: &Connection, params: &Value) -> Result<LateSubmissionPolicy, HandlerErr> {
    let Some(raw) = params.get("lateSubmission") else {
        return Ok(LateSubmissionPolicy {
            allowed: false,
            penalty_percent: 0.0,
        });
    };
    let allowed = get_required_bool(raw, "allowed")?;
    let penalty_percent = match raw.get("penaltyPercent") {
        Some(v) => v
            .as_f64()
            .ok_or_else(|| HandlerErr::bad_params("penaltyPercent must be a number"))?,
        None if allowed => config::grading_settings(conn)?.default_late_penalty_percent,
        None => 0.0,
    };
    Ok(LateSubmissionPolicy {
        allowed,
        penalty_percent,
    })
}

fn assignments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let new = NewAssignment {
        course_id: get_required_str(params, "courseId")?,
        title: get_required_str(params, "title")?,
        total_points: get_required_f64(params, "totalPoints")?,
        due_date: get_required_datetime(params, "dueDate")?,
        late_submission: parse_late_policy(conn, params)?,
    };
    to_json(&catalog::create_assignment(conn, new, Utc::now())?)
}

fn assignments_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    to_json(&catalog::get_assignment(conn, &assignment_id)?)
}

fn assignments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let assignments = catalog::list_assignments(conn, &course_id)?;
    Ok(json!({ "assignments": to_json(&assignments)? }))
}

fn assignments_set_due_date(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let due_date = get_required_datetime(params, "dueDate")?;
    to_json(&catalog::set_assignment_due_date(conn, &assignment_id, due_date)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "courses.create" => with_db(state, req, courses_create),
        "courses.get" => with_db(state, req, courses_get),
        "courses.list" => with_db(state, req, |conn, _| courses_list(conn)),
        "courses.approve" => with_db(state, req, courses_approve),
        "courses.setActive" => with_db(state, req, courses_set_active),
        "courses.setCapacity" => with_db(state, req, courses_set_capacity),
        "courses.recount" => with_db(state, req, courses_recount),
        "assignments.create" => with_db(state, req, assignments_create),
        "assignments.get" => with_db(state, req, assignments_get),
        "assignments.list" => with_db(state, req, assignments_list),
        "assignments.setDueDate" => with_db(state, req, assignments_set_due_date),
        _ => return None,
    };
    Some(resp)
}
