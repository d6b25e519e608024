//! Courses and assignments: the entities the ledger, aggregator and graders
//! hang off. Nothing here touches `current_enrollment` except reading it.

use crate::db::{self, new_id, ts};
use crate::error::{is_unique_violation, CoreError, CoreResult};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub code: String,
    pub title: String,
    pub instructor_id: Option<String>,
    pub max_seats: i64,
    pub current_enrollment: i64,
    pub is_approved: bool,
    pub is_active: bool,
    pub created_at: String,
}

impl Course {
    pub fn open_for_enrollment(&self) -> bool {
        self.is_approved && self.is_active
    }
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub code: String,
    pub title: String,
    pub instructor_id: Option<String>,
    pub max_seats: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LateSubmissionPolicy {
    pub allowed: bool,
    pub penalty_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub total_points: f64,
    pub due_date: String,
    pub late_submission: LateSubmissionPolicy,
    pub created_at: String,
}

impl Assignment {
    pub fn due_at(&self) -> CoreResult<DateTime<Utc>> {
        db::parse_ts(&self.due_date).ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "assignment {} has unreadable due date {}",
                self.id, self.due_date
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub course_id: String,
    pub title: String,
    pub total_points: f64,
    pub due_date: DateTime<Utc>,
    pub late_submission: LateSubmissionPolicy,
}

const COURSE_COLUMNS: &str = "id, code, title, instructor_id, max_seats, current_enrollment,
     is_approved, is_active, created_at";

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: r.get(0)?,
        code: r.get(1)?,
        title: r.get(2)?,
        instructor_id: r.get(3)?,
        max_seats: r.get(4)?,
        current_enrollment: r.get(5)?,
        is_approved: r.get::<_, i64>(6)? != 0,
        is_active: r.get::<_, i64>(7)? != 0,
        created_at: r.get(8)?,
    })
}

const ASSIGNMENT_COLUMNS: &str = "id, course_id, title, total_points, due_date,
     late_allowed, late_penalty_percent, created_at";

fn assignment_from_row(r: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        course_id: r.get(1)?,
        title: r.get(2)?,
        total_points: r.get(3)?,
        due_date: r.get(4)?,
        late_submission: LateSubmissionPolicy {
            allowed: r.get::<_, i64>(5)? != 0,
            penalty_percent: r.get(6)?,
        },
        created_at: r.get(7)?,
    })
}

pub fn create_course(conn: &Connection, new: NewCourse, now: DateTime<Utc>) -> CoreResult<Course> {
    let code = new.code.trim().to_string();
    let title = new.title.trim().to_string();
    if code.is_empty() {
        return Err(CoreError::InvalidInput("code must not be empty".into()));
    }
    if title.is_empty() {
        return Err(CoreError::InvalidInput("title must not be empty".into()));
    }
    if new.max_seats < 1 {
        return Err(CoreError::InvalidInput("maxSeats must be at least 1".into()));
    }

    let id = new_id();
    let res = conn.execute(
        "INSERT INTO courses(id, code, title, instructor_id, max_seats, current_enrollment,
                             is_approved, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, 0, 0, 1, ?)",
        (&id, &code, &title, &new.instructor_id, new.max_seats, ts(now)),
    );
    match res {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(CoreError::DuplicateCourse { code }),
        Err(e) => return Err(e.into()),
    }
    info!(course_id = %id, code = %code, max_seats = new.max_seats, "course created");
    get_course(conn, &id)
}

pub fn find_course(conn: &Connection, course_id: &str) -> CoreResult<Option<Course>> {
    let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
    Ok(conn
        .query_row(&sql, [course_id], course_from_row)
        .optional()?)
}

pub fn get_course(conn: &Connection, course_id: &str) -> CoreResult<Course> {
    find_course(conn, course_id)?.ok_or_else(|| CoreError::not_found("course", course_id))
}

pub fn list_courses(conn: &Connection) -> CoreResult<Vec<Course>> {
    let sql = format!("SELECT {} FROM courses ORDER BY code", COURSE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn approve_course(conn: &Connection, course_id: &str) -> CoreResult<Course> {
    let n = conn.execute("UPDATE courses SET is_approved = 1 WHERE id = ?", [course_id])?;
    if n == 0 {
        return Err(CoreError::not_found("course", course_id));
    }
    info!(course_id, "course approved");
    get_course(conn, course_id)
}

pub fn set_course_active(conn: &Connection, course_id: &str, active: bool) -> CoreResult<Course> {
    let n = conn.execute(
        "UPDATE courses SET is_active = ? WHERE id = ?",
        (active as i64, course_id),
    )?;
    if n == 0 {
        return Err(CoreError::not_found("course", course_id));
    }
    info!(course_id, active, "course activity changed");
    get_course(conn, course_id)
}

/// Change the seat limit. The guard keeps it at or above the live counter.
pub fn set_course_capacity(conn: &Connection, course_id: &str, max_seats: i64) -> CoreResult<Course> {
    if max_seats < 1 {
        return Err(CoreError::InvalidInput("maxSeats must be at least 1".into()));
    }
    let n = conn.execute(
        "UPDATE courses SET max_seats = ?1 WHERE id = ?2 AND current_enrollment <= ?1",
        (max_seats, course_id),
    )?;
    if n == 0 {
        let course = get_course(conn, course_id)?;
        return Err(CoreError::InvalidInput(format!(
            "maxSeats {} is below current enrollment {}",
            max_seats, course.current_enrollment
        )));
    }
    info!(course_id, max_seats, "course capacity changed");
    get_course(conn, course_id)
}

pub fn create_assignment(
    conn: &Connection,
    new: NewAssignment,
    now: DateTime<Utc>,
) -> CoreResult<Assignment> {
    let title = new.title.trim().to_string();
    if title.is_empty() {
        return Err(CoreError::InvalidInput("title must not be empty".into()));
    }
    if !new.total_points.is_finite() || new.total_points <= 0.0 {
        return Err(CoreError::InvalidInput("totalPoints must be positive".into()));
    }
    let penalty = new.late_submission.penalty_percent;
    if !penalty.is_finite() || !(0.0..=100.0).contains(&penalty) {
        return Err(CoreError::InvalidInput(
            "penaltyPercent must be between 0 and 100".into(),
        ));
    }
    get_course(conn, &new.course_id)?;

    let id = new_id();
    conn.execute(
        "INSERT INTO assignments(id, course_id, title, total_points, due_date,
                                 late_allowed, late_penalty_percent, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &new.course_id,
            &title,
            new.total_points,
            ts(new.due_date),
            new.late_submission.allowed as i64,
            penalty,
            ts(now),
        ),
    )?;
    info!(assignment_id = %id, course_id = %new.course_id, "assignment created");
    get_assignment(conn, &id)
}

pub fn find_assignment(conn: &Connection, assignment_id: &str) -> CoreResult<Option<Assignment>> {
    let sql = format!("SELECT {} FROM assignments WHERE id = ?", ASSIGNMENT_COLUMNS);
    Ok(conn
        .query_row(&sql, [assignment_id], assignment_from_row)
        .optional()?)
}

pub fn get_assignment(conn: &Connection, assignment_id: &str) -> CoreResult<Assignment> {
    find_assignment(conn, assignment_id)?
        .ok_or_else(|| CoreError::not_found("assignment", assignment_id))
}

pub fn list_assignments(conn: &Connection, course_id: &str) -> CoreResult<Vec<Assignment>> {
    get_course(conn, course_id)?;
    let sql = format!(
        "SELECT {} FROM assignments WHERE course_id = ? ORDER BY due_date, title",
        ASSIGNMENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([course_id], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moving the due date never touches `is_late` on existing submissions.
pub fn set_assignment_due_date(
    conn: &Connection,
    assignment_id: &str,
    due_date: DateTime<Utc>,
) -> CoreResult<Assignment> {
    let n = conn.execute(
        "UPDATE assignments SET due_date = ? WHERE id = ?",
        (ts(due_date), assignment_id),
    )?;
    if n == 0 {
        return Err(CoreError::not_found("assignment", assignment_id));
    }
    info!(assignment_id, due_date = %ts(due_date), "assignment due date moved");
    get_assignment(conn, assignment_id)
}
