use crate::attendance::{self, AttendanceStatus, SessionMark};
use crate::config;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_marks(params: &Value) -> Result<Vec<SessionMark>, HandlerErr> {
    let Some(rows) = params.get("sessions").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing sessions"));
    };
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let student_id = get_required_str(row, "studentId")
                .map_err(|_| HandlerErr::bad_params(format!("sessions[{}].studentId missing", i)))?;
            let status_raw = row.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let status = AttendanceStatus::parse(status_raw).ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: format!("sessions[{}].status must be present, absent, late or excused", i),
                details: Some(json!({ "status": status_raw })),
            })?;
            Ok(SessionMark { student_id, status })
        })
        .collect()
}

fn record_session(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let date = attendance::parse_date(&get_required_str(params, "date")?)?;
    let marks = parse_marks(params)?;
    let settings = config::attendance_settings(conn)?;
    let report = attendance::record_session(conn, &course_id, date, &marks, &settings, Utc::now())?;
    let mut out = to_json(&report)?;
    out["complete"] = json!(report.is_complete());
    Ok(out)
}

fn reapply_session(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let report = attendance::reapply_session(conn, &session_id)?;
    let mut out = to_json(&report)?;
    out["complete"] = json!(report.is_complete());
    Ok(out)
}

fn get_session(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    to_json(&attendance::get_session(conn, &session_id)?)
}

fn list_sessions(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let sessions = attendance::list_sessions(conn, &course_id)?;
    Ok(json!({ "sessions": to_json(&sessions)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "attendance.recordSession" => with_db(state, req, record_session),
        "attendance.reapplySession" => with_db(state, req, reapply_session),
        "attendance.getSession" => with_db(state, req, get_session),
        "attendance.listSessions" => with_db(state, req, list_sessions),
        _ => return None,
    };
    Some(resp)
}
