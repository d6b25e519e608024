use crate::error::CoreError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn core_details(e: &CoreError) -> Option<serde_json::Value> {
    match e {
        CoreError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
        CoreError::CourseFull {
            course_id,
            max_seats,
        } => Some(json!({ "courseId": course_id, "maxSeats": max_seats })),
        CoreError::AlreadyTerminal {
            enrollment_id,
            status,
        }
        | CoreError::InvalidTransition {
            enrollment_id,
            status,
            ..
        } => Some(json!({ "enrollmentId": enrollment_id, "status": status })),
        CoreError::UnknownEnrollment {
            student_id,
            course_id,
        }
        | CoreError::DuplicateEnrollment {
            student_id,
            course_id,
        }
        | CoreError::AlreadyFinalized {
            student_id,
            course_id,
        } => Some(json!({ "studentId": student_id, "courseId": course_id })),
        CoreError::InvalidPoints {
            points,
            total_points,
        } => Some(json!({ "points": points, "totalPoints": total_points })),
        _ => None,
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: core_details(&e),
        }
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: format!("{e:#}"),
            details: None,
        }
    }
}
