use crate::catalog::{self, Assignment};
use crate::db::{new_id, ts};
use crate::enrollment;
use crate::error::{is_unique_violation, CoreError, CoreResult};
use crate::grade;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionGrade {
    pub points: f64,
    pub percentage: f64,
    pub letter_grade: String,
    pub feedback: Option<String>,
    pub graded_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub content: Option<String>,
    pub submitted_at: String,
    pub is_late: bool,
    pub grade: Option<SubmissionGrade>,
}

const SUBMISSION_COLUMNS: &str = "id, assignment_id, student_id, content, submitted_at, is_late,
     grade_points, grade_percentage, grade_letter, grade_feedback, graded_at";

fn submission_from_row(r: &Row<'_>) -> rusqlite::Result<Submission> {
    let points: Option<f64> = r.get(6)?;
    let percentage: Option<f64> = r.get(7)?;
    let letter: Option<String> = r.get(8)?;
    let graded_at: Option<String> = r.get(10)?;
    let grade = match (points, percentage, letter, graded_at) {
        (Some(points), Some(percentage), Some(letter_grade), Some(graded_at)) => {
            Some(SubmissionGrade {
                points,
                percentage,
                letter_grade,
                feedback: r.get(9)?,
                graded_at,
            })
        }
        _ => None,
    };
    Ok(Submission {
        id: r.get(0)?,
        assignment_id: r.get(1)?,
        student_id: r.get(2)?,
        content: r.get(3)?,
        submitted_at: r.get(4)?,
        is_late: r.get::<_, i64>(5)? != 0,
        grade,
    })
}

/// Accept a student's work. Lateness is decided here, against the due date
/// as it stands right now, and never recomputed.
pub fn submit(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
    content: Option<String>,
    now: DateTime<Utc>,
) -> CoreResult<Submission> {
    let assignment = catalog::get_assignment(conn, assignment_id)?;
    if enrollment::find_active(conn, student_id, &assignment.course_id)?.is_none() {
        return Err(CoreError::UnknownEnrollment {
            student_id: student_id.to_string(),
            course_id: assignment.course_id,
        });
    }

    let is_late = now > assignment.due_at()?;
    if is_late && !assignment.late_submission.allowed {
        debug!(assignment_id, student_id, "submission rejected: late");
        return Err(CoreError::LateSubmissionRejected {
            assignment_id: assignment_id.to_string(),
        });
    }

    let id = new_id();
    let res = conn.execute(
        "INSERT INTO submissions(id, assignment_id, student_id, content, submitted_at, is_late)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, assignment_id, student_id, &content, ts(now), is_late as i64),
    );
    match res {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(CoreError::DuplicateSubmission {
                assignment_id: assignment_id.to_string(),
                student_id: student_id.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    }
    info!(submission_id = %id, assignment_id, student_id, is_late, "submission received");
    get(conn, &id)
}

/// Percentage earned for `points`, after any late deduction.
pub fn score_percentage(
    assignment: &Assignment,
    is_late: bool,
    points: f64,
) -> CoreResult<f64> {
    if !points.is_finite() || points < 0.0 || points > assignment.total_points {
        return Err(CoreError::InvalidPoints {
            points,
            total_points: assignment.total_points,
        });
    }
    let raw = points / assignment.total_points * 100.0;
    if !is_late {
        return Ok(raw);
    }
    if !assignment.late_submission.allowed {
        return Err(CoreError::LateSubmissionRejected {
            assignment_id: assignment.id.clone(),
        });
    }
    Ok(grade::apply_late_penalty(
        raw,
        assignment.late_submission.penalty_percent,
    ))
}

/// Grade (or re-grade) a submission. The stored percentage is always derived
/// from the points; callers cannot set it directly.
pub fn grade(
    conn: &Connection,
    submission_id: &str,
    points: f64,
    feedback: Option<String>,
    now: DateTime<Utc>,
) -> CoreResult<Submission> {
    let submission = get(conn, submission_id)?;
    let assignment = catalog::get_assignment(conn, &submission.assignment_id)?;
    let percentage = score_percentage(&assignment, submission.is_late, points)?;
    let letter = grade::letter_and_gpa(percentage).letter;

    conn.execute(
        "UPDATE submissions SET
           grade_points = ?,
           grade_percentage = ?,
           grade_letter = ?,
           grade_feedback = ?,
           graded_at = ?
         WHERE id = ?",
        (points, percentage, letter, &feedback, ts(now), submission_id),
    )?;
    info!(submission_id, points, percentage, letter, "submission graded");
    get(conn, submission_id)
}

pub fn find(conn: &Connection, submission_id: &str) -> CoreResult<Option<Submission>> {
    let sql = format!("SELECT {} FROM submissions WHERE id = ?", SUBMISSION_COLUMNS);
    Ok(conn
        .query_row(&sql, [submission_id], submission_from_row)
        .optional()?)
}

pub fn get(conn: &Connection, submission_id: &str) -> CoreResult<Submission> {
    find(conn, submission_id)?.ok_or_else(|| CoreError::not_found("submission", submission_id))
}

pub fn list_for_assignment(conn: &Connection, assignment_id: &str) -> CoreResult<Vec<Submission>> {
    catalog::get_assignment(conn, assignment_id)?;
    let sql = format!(
        "SELECT {} FROM submissions WHERE assignment_id = ? ORDER BY submitted_at, student_id",
        SUBMISSION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([assignment_id], submission_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
