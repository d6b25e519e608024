use thiserror::Error;

/// Every failure a core operation can report. Business-rule violations each
/// get their own variant; anything the storage layer throws lands in
/// `Storage`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("student {student_id} already holds an enrollment in course {course_id}")]
    DuplicateEnrollment {
        student_id: String,
        course_id: String,
    },

    #[error("attendance already recorded for course {course_id} on {date}")]
    DuplicateSession { course_id: String, date: String },

    #[error("submission already exists for student {student_id} on assignment {assignment_id}")]
    DuplicateSubmission {
        assignment_id: String,
        student_id: String,
    },

    #[error("course code already in use: {code}")]
    DuplicateCourse { code: String },

    #[error("course {course_id} is full ({max_seats} seats)")]
    CourseFull { course_id: String, max_seats: i64 },

    #[error("course {course_id} is not open for enrollment")]
    CourseNotApproved { course_id: String },

    #[error("student {student_id} is not enrolled in course {course_id}")]
    UnknownEnrollment {
        student_id: String,
        course_id: String,
    },

    #[error("points {points} outside 0..={total_points}")]
    InvalidPoints { points: f64, total_points: f64 },

    #[error("late submission not accepted for assignment {assignment_id}")]
    LateSubmissionRejected { assignment_id: String },

    #[error("course grade for student {student_id} in course {course_id} is finalized")]
    AlreadyFinalized {
        student_id: String,
        course_id: String,
    },

    #[error("enrollment {enrollment_id} is already {status}")]
    AlreadyTerminal {
        enrollment_id: String,
        status: String,
    },

    #[error("cannot {action} enrollment {enrollment_id} while {status}")]
    InvalidTransition {
        enrollment_id: String,
        status: String,
        action: &'static str,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable kind, used as the IPC error code.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "not_found",
            CoreError::DuplicateEnrollment { .. } => "duplicate_enrollment",
            CoreError::DuplicateSession { .. } => "duplicate_session",
            CoreError::DuplicateSubmission { .. } => "duplicate_submission",
            CoreError::DuplicateCourse { .. } => "duplicate_course",
            CoreError::CourseFull { .. } => "course_full",
            CoreError::CourseNotApproved { .. } => "course_not_approved",
            CoreError::UnknownEnrollment { .. } => "unknown_enrollment",
            CoreError::InvalidPoints { .. } => "invalid_points",
            CoreError::LateSubmissionRejected { .. } => "late_submission_rejected",
            CoreError::AlreadyFinalized { .. } => "already_finalized",
            CoreError::AlreadyTerminal { .. } => "already_terminal",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::Storage(_) => "storage_failed",
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }
}

/// True when SQLite rejected a write because of a UNIQUE / PRIMARY KEY clash.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == rusqlite::ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// True for the transient lock errors worth another attempt.
pub fn is_busy(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => matches!(
            err.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}
