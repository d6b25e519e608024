//! Enrollment ledger: the only writer of `courses.current_enrollment`.
//!
//! The seat counter tracks enrollments that hold a seat, meaning status
//! `enrolled` or `completed`. Every transition that changes that set moves
//! the counter in the same transaction, using a conditional increment so a
//! full course can never be over-claimed.

use crate::attendance;
use crate::catalog;
use crate::db::{self, new_id, ts};
use crate::error::{is_unique_violation, CoreError, CoreResult};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Enrolled,
    Completed,
    Dropped,
    Suspended,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enrolled => "enrolled",
            Self::Completed => "completed",
            Self::Dropped => "dropped",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enrolled" => Some(Self::Enrolled),
            "completed" => Some(Self::Completed),
            "dropped" => Some(Self::Dropped),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }

    pub fn holds_seat(self) -> bool {
        matches!(self, Self::Enrolled | Self::Completed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Dropped)
    }
}

impl ToSql for EnrollmentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EnrollmentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        EnrollmentStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("bad enrollment status {s}").into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub total_classes: i64,
    pub attended_classes: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGrade {
    pub percentage: f64,
    pub letter_grade: String,
    pub gpa_point: f64,
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub status: EnrollmentStatus,
    pub enrollment_date: String,
    pub completion_date: Option<String>,
    pub attendance: AttendanceSummary,
    pub final_grade: Option<FinalGrade>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatCount {
    pub current_enrollment: i64,
    pub derived: i64,
    pub max_seats: i64,
}

impl SeatCount {
    pub fn consistent(&self) -> bool {
        self.current_enrollment == self.derived
    }
}

const ENROLLMENT_COLUMNS: &str = "id, student_id, course_id, status, enrollment_date, completion_date,
     total_classes, attended_classes, attendance_percentage,
     final_percentage, final_letter_grade, final_gpa_point, final_finalized";

fn enrollment_from_row(r: &Row<'_>) -> rusqlite::Result<Enrollment> {
    let final_percentage: Option<f64> = r.get(9)?;
    let final_letter: Option<String> = r.get(10)?;
    let final_gpa: Option<f64> = r.get(11)?;
    let final_grade = match (final_percentage, final_letter, final_gpa) {
        (Some(percentage), Some(letter_grade), Some(gpa_point)) => Some(FinalGrade {
            percentage,
            letter_grade,
            gpa_point,
            finalized: r.get::<_, i64>(12)? != 0,
        }),
        _ => None,
    };
    Ok(Enrollment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        status: r.get(3)?,
        enrollment_date: r.get(4)?,
        completion_date: r.get(5)?,
        attendance: AttendanceSummary {
            total_classes: r.get(6)?,
            attended_classes: r.get(7)?,
            percentage: r.get(8)?,
        },
        final_grade,
    })
}

pub fn find(conn: &Connection, enrollment_id: &str) -> CoreResult<Option<Enrollment>> {
    let sql = format!("SELECT {} FROM enrollments WHERE id = ?", ENROLLMENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [enrollment_id], enrollment_from_row)
        .optional()?)
}

pub fn get(conn: &Connection, enrollment_id: &str) -> CoreResult<Enrollment> {
    find(conn, enrollment_id)?.ok_or_else(|| CoreError::not_found("enrollment", enrollment_id))
}

pub fn find_by_pair(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> CoreResult<Option<Enrollment>> {
    let sql = format!(
        "SELECT {} FROM enrollments WHERE student_id = ? AND course_id = ?",
        ENROLLMENT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (student_id, course_id), enrollment_from_row)
        .optional()?)
}

/// The enrollment for the pair, only when it is currently `enrolled`.
pub fn find_active(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> CoreResult<Option<Enrollment>> {
    Ok(find_by_pair(conn, student_id, course_id)?
        .filter(|e| e.status == EnrollmentStatus::Enrolled))
}

pub fn list_for_course(conn: &Connection, course_id: &str) -> CoreResult<Vec<Enrollment>> {
    catalog::get_course(conn, course_id)?;
    let sql = format!(
        "SELECT {} FROM enrollments WHERE course_id = ? ORDER BY enrollment_date, student_id",
        ENROLLMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([course_id], enrollment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_for_student(conn: &Connection, student_id: &str) -> CoreResult<Vec<Enrollment>> {
    let sql = format!(
        "SELECT {} FROM enrollments WHERE student_id = ? ORDER BY enrollment_date, course_id",
        ENROLLMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], enrollment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Claim one seat. Returns false when the course is already at capacity.
fn claim_seat(conn: &Connection, course_id: &str) -> CoreResult<bool> {
    let n = conn.execute(
        "UPDATE courses SET current_enrollment = current_enrollment + 1
         WHERE id = ? AND current_enrollment < max_seats",
        [course_id],
    )?;
    Ok(n == 1)
}

fn release_seat(conn: &Connection, course_id: &str) -> CoreResult<()> {
    conn.execute(
        "UPDATE courses SET current_enrollment = MAX(current_enrollment - 1, 0) WHERE id = ?",
        [course_id],
    )?;
    Ok(())
}

/// Status change guarded on the status the caller observed.
fn set_status(
    conn: &Connection,
    enrollment: &Enrollment,
    to: EnrollmentStatus,
    completion_date: Option<String>,
    action: &'static str,
) -> CoreResult<()> {
    let n = conn.execute(
        "UPDATE enrollments SET status = ?, completion_date = ? WHERE id = ? AND status = ?",
        (to, completion_date, &enrollment.id, enrollment.status),
    )?;
    if n == 0 {
        return Err(CoreError::InvalidTransition {
            enrollment_id: enrollment.id.clone(),
            status: enrollment.status.as_str().to_string(),
            action,
        });
    }
    Ok(())
}

fn terminal_error(enrollment: &Enrollment) -> CoreError {
    CoreError::AlreadyTerminal {
        enrollment_id: enrollment.id.clone(),
        status: enrollment.status.as_str().to_string(),
    }
}

fn finalized_grade_exists(conn: &Connection, student_id: &str, course_id: &str) -> CoreResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM course_grades WHERE student_id = ? AND course_id = ? AND finalized = 1",
            (student_id, course_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Enroll `student_id` in `course_id`.
///
/// A previously dropped enrollment for the same pair is reactivated in place
/// with a fresh attendance summary, so `(student, course)` stays unique.
pub fn enroll(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    now: DateTime<Utc>,
) -> CoreResult<Enrollment> {
    let student_id = student_id.trim();
    if student_id.is_empty() {
        return Err(CoreError::InvalidInput("studentId must not be empty".into()));
    }

    let tx = db::write_tx(conn)?;
    let course = catalog::get_course(&tx, course_id)?;
    if !course.open_for_enrollment() {
        debug!(course_id, student_id, "enroll rejected: course not open");
        return Err(CoreError::CourseNotApproved {
            course_id: course_id.to_string(),
        });
    }

    let existing = find_by_pair(&tx, student_id, course_id)?;
    if let Some(prev) = &existing {
        if prev.status != EnrollmentStatus::Dropped {
            debug!(course_id, student_id, status = prev.status.as_str(), "enroll rejected: duplicate");
            return Err(CoreError::DuplicateEnrollment {
                student_id: student_id.to_string(),
                course_id: course_id.to_string(),
            });
        }
        if finalized_grade_exists(&tx, student_id, course_id)? {
            return Err(CoreError::AlreadyFinalized {
                student_id: student_id.to_string(),
                course_id: course_id.to_string(),
            });
        }
    }

    if !claim_seat(&tx, course_id)? {
        debug!(course_id, student_id, max_seats = course.max_seats, "enroll rejected: full");
        return Err(CoreError::CourseFull {
            course_id: course_id.to_string(),
            max_seats: course.max_seats,
        });
    }

    let enrollment_id = match existing {
        Some(prev) => {
            tx.execute(
                "UPDATE enrollments SET
                   status = 'enrolled',
                   enrollment_date = ?,
                   completion_date = NULL,
                   total_classes = 0,
                   attended_classes = 0,
                   attendance_percentage = 0,
                   final_percentage = NULL,
                   final_letter_grade = NULL,
                   final_gpa_point = NULL,
                   final_finalized = 0
                 WHERE id = ? AND status = 'dropped'",
                (ts(now), &prev.id),
            )?;
            tx.execute(
                "DELETE FROM course_grades WHERE student_id = ? AND course_id = ? AND finalized = 0",
                (student_id, course_id),
            )?;
            prev.id
        }
        None => {
            let id = new_id();
            let res = tx.execute(
                "INSERT INTO enrollments(id, student_id, course_id, status, enrollment_date)
                 VALUES(?, ?, ?, 'enrolled', ?)",
                (&id, student_id, course_id, ts(now)),
            );
            match res {
                Ok(_) => id,
                Err(e) if is_unique_violation(&e) => {
                    return Err(CoreError::DuplicateEnrollment {
                        student_id: student_id.to_string(),
                        course_id: course_id.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    tx.commit()?;
    info!(%enrollment_id, course_id, student_id, "student enrolled");
    get(conn, &enrollment_id)
}

pub fn drop(conn: &Connection, enrollment_id: &str, now: DateTime<Utc>) -> CoreResult<Enrollment> {
    let tx = db::write_tx(conn)?;
    let current = get(&tx, enrollment_id)?;
    if current.status.is_terminal() {
        return Err(terminal_error(&current));
    }
    set_status(&tx, &current, EnrollmentStatus::Dropped, Some(ts(now)), "drop")?;
    if current.status.holds_seat() {
        release_seat(&tx, &current.course_id)?;
    }
    let voided = attendance::void_pending_entries(&tx, enrollment_id)?;
    tx.commit()?;
    info!(enrollment_id, course_id = %current.course_id, voided, "enrollment dropped");
    get(conn, enrollment_id)
}

/// Completed students keep their seat; the counter is untouched.
pub fn complete(conn: &Connection, enrollment_id: &str, now: DateTime<Utc>) -> CoreResult<Enrollment> {
    let tx = db::write_tx(conn)?;
    let current = get(&tx, enrollment_id)?;
    match current.status {
        EnrollmentStatus::Completed | EnrollmentStatus::Dropped => {
            return Err(terminal_error(&current))
        }
        EnrollmentStatus::Suspended => {
            return Err(CoreError::InvalidTransition {
                enrollment_id: enrollment_id.to_string(),
                status: current.status.as_str().to_string(),
                action: "complete",
            })
        }
        EnrollmentStatus::Enrolled => {}
    }
    set_status(&tx, &current, EnrollmentStatus::Completed, Some(ts(now)), "complete")?;
    tx.commit()?;
    info!(enrollment_id, course_id = %current.course_id, "enrollment completed");
    get(conn, enrollment_id)
}

/// Suspension releases the seat until the student is reinstated.
pub fn suspend(conn: &Connection, enrollment_id: &str) -> CoreResult<Enrollment> {
    let tx = db::write_tx(conn)?;
    let current = get(&tx, enrollment_id)?;
    match current.status {
        EnrollmentStatus::Completed | EnrollmentStatus::Dropped => {
            return Err(terminal_error(&current))
        }
        EnrollmentStatus::Suspended => {
            return Err(CoreError::InvalidTransition {
                enrollment_id: enrollment_id.to_string(),
                status: current.status.as_str().to_string(),
                action: "suspend",
            })
        }
        EnrollmentStatus::Enrolled => {}
    }
    set_status(&tx, &current, EnrollmentStatus::Suspended, None, "suspend")?;
    release_seat(&tx, &current.course_id)?;
    tx.commit()?;
    info!(enrollment_id, course_id = %current.course_id, "enrollment suspended");
    get(conn, enrollment_id)
}

pub fn reinstate(conn: &Connection, enrollment_id: &str) -> CoreResult<Enrollment> {
    let tx = db::write_tx(conn)?;
    let current = get(&tx, enrollment_id)?;
    match current.status {
        EnrollmentStatus::Completed | EnrollmentStatus::Dropped => {
            return Err(terminal_error(&current))
        }
        EnrollmentStatus::Enrolled => {
            return Err(CoreError::InvalidTransition {
                enrollment_id: enrollment_id.to_string(),
                status: current.status.as_str().to_string(),
                action: "reinstate",
            })
        }
        EnrollmentStatus::Suspended => {}
    }
    if !claim_seat(&tx, &current.course_id)? {
        let course = catalog::get_course(&tx, &current.course_id)?;
        return Err(CoreError::CourseFull {
            course_id: course.id,
            max_seats: course.max_seats,
        });
    }
    set_status(&tx, &current, EnrollmentStatus::Enrolled, None, "reinstate")?;
    tx.commit()?;
    info!(enrollment_id, course_id = %current.course_id, "enrollment reinstated");
    get(conn, enrollment_id)
}

/// Compare the cached counter against the rows it summarizes. Read-only.
pub fn recount(conn: &Connection, course_id: &str) -> CoreResult<SeatCount> {
    let course = catalog::get_course(conn, course_id)?;
    let derived: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrollments
         WHERE course_id = ? AND status IN ('enrolled', 'completed')",
        [course_id],
        |r| r.get(0),
    )?;
    Ok(SeatCount {
        current_enrollment: course.current_enrollment,
        derived,
        max_seats: course.max_seats,
    })
}
