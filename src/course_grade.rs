//! Course-level final grades, separate from per-assignment grades.
//!
//! A grade can be rewritten freely until it is finalized. Every write is
//! guarded on `finalized = 0` in SQL as well as checked up front, so the
//! latch holds even against a concurrent finalize. The grade is mirrored
//! onto the enrollment in the same transaction.

use crate::db::{self, new_id, ts};
use crate::enrollment::{self, EnrollmentStatus};
use crate::error::{CoreError, CoreResult};
use crate::grade;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGrade {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub percentage: f64,
    pub letter_grade: String,
    pub gpa_point: f64,
    pub finalized: bool,
    pub updated_at: String,
    pub finalized_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeGpa {
    pub student_id: String,
    /// Mean over every course grade, finalized or not. This is the displayed GPA.
    pub provisional: Option<f64>,
    /// Mean over finalized grades only.
    pub official: Option<f64>,
    pub graded_courses: i64,
    pub finalized_courses: i64,
}

const GRADE_COLUMNS: &str = "id, student_id, course_id, percentage, letter_grade, gpa_point,
     finalized, updated_at, finalized_at";

fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<CourseGrade> {
    Ok(CourseGrade {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        percentage: r.get(3)?,
        letter_grade: r.get(4)?,
        gpa_point: r.get(5)?,
        finalized: r.get::<_, i64>(6)? != 0,
        updated_at: r.get(7)?,
        finalized_at: r.get(8)?,
    })
}

pub fn find(conn: &Connection, student_id: &str, course_id: &str) -> CoreResult<Option<CourseGrade>> {
    let sql = format!(
        "SELECT {} FROM course_grades WHERE student_id = ? AND course_id = ?",
        GRADE_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (student_id, course_id), grade_from_row)
        .optional()?)
}

pub fn get(conn: &Connection, student_id: &str, course_id: &str) -> CoreResult<CourseGrade> {
    find(conn, student_id, course_id)?.ok_or_else(|| {
        CoreError::not_found("course grade", format!("{}/{}", student_id, course_id))
    })
}

fn finalized_error(student_id: &str, course_id: &str) -> CoreError {
    CoreError::AlreadyFinalized {
        student_id: student_id.to_string(),
        course_id: course_id.to_string(),
    }
}

pub fn upsert_grade(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    percentage: f64,
    now: DateTime<Utc>,
) -> CoreResult<CourseGrade> {
    if !percentage.is_finite() || percentage < 0.0 {
        return Err(CoreError::InvalidInput(format!(
            "percentage must be a non-negative number, got {}",
            percentage
        )));
    }
    let letter = grade::letter_and_gpa(percentage);

    let tx = db::write_tx(conn)?;
    let holds_enrollment = enrollment::find_by_pair(&tx, student_id, course_id)?
        .filter(|e| matches!(e.status, EnrollmentStatus::Enrolled | EnrollmentStatus::Completed));
    let Some(enr) = holds_enrollment else {
        return Err(CoreError::UnknownEnrollment {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
        });
    };

    match find(&tx, student_id, course_id)? {
        Some(existing) if existing.finalized => {
            debug!(student_id, course_id, "grade update rejected: finalized");
            return Err(finalized_error(student_id, course_id));
        }
        Some(existing) => {
            let n = tx.execute(
                "UPDATE course_grades SET percentage = ?, letter_grade = ?, gpa_point = ?, updated_at = ?
                 WHERE id = ? AND finalized = 0",
                (percentage, letter.letter, letter.gpa_point, ts(now), &existing.id),
            )?;
            if n == 0 {
                return Err(finalized_error(student_id, course_id));
            }
        }
        None => {
            tx.execute(
                "INSERT INTO course_grades(id, student_id, course_id, percentage, letter_grade,
                                           gpa_point, finalized, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
                (
                    new_id(),
                    student_id,
                    course_id,
                    percentage,
                    letter.letter,
                    letter.gpa_point,
                    ts(now),
                ),
            )?;
        }
    }

    tx.execute(
        "UPDATE enrollments SET final_percentage = ?, final_letter_grade = ?, final_gpa_point = ?
         WHERE id = ? AND final_finalized = 0",
        (percentage, letter.letter, letter.gpa_point, &enr.id),
    )?;
    tx.commit()?;
    info!(student_id, course_id, percentage, letter = letter.letter, "course grade saved");
    get(conn, student_id, course_id)
}

/// One-way latch. After this, `upsert_grade` for the pair always fails.
pub fn finalize(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    now: DateTime<Utc>,
) -> CoreResult<CourseGrade> {
    let tx = db::write_tx(conn)?;
    let existing = get(&tx, student_id, course_id)?;
    if existing.finalized {
        return Err(finalized_error(student_id, course_id));
    }
    let n = tx.execute(
        "UPDATE course_grades SET finalized = 1, finalized_at = ? WHERE id = ? AND finalized = 0",
        (ts(now), &existing.id),
    )?;
    if n == 0 {
        return Err(finalized_error(student_id, course_id));
    }
    tx.execute(
        "UPDATE enrollments SET final_finalized = 1 WHERE student_id = ? AND course_id = ?",
        (student_id, course_id),
    )?;
    tx.commit()?;
    info!(student_id, course_id, "course grade finalized");
    get(conn, student_id, course_id)
}

pub fn cumulative_gpa(conn: &Connection, student_id: &str) -> CoreResult<CumulativeGpa> {
    let (provisional, graded_courses, official, finalized_courses) = conn.query_row(
        "SELECT
           AVG(gpa_point),
           COUNT(*),
           AVG(CASE WHEN finalized = 1 THEN gpa_point END),
           COALESCE(SUM(finalized), 0)
         FROM course_grades
         WHERE student_id = ?",
        [student_id],
        |r| {
            Ok((
                r.get::<_, Option<f64>>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, i64>(3)?,
            ))
        },
    )?;
    Ok(CumulativeGpa {
        student_id: student_id.to_string(),
        provisional,
        official,
        graded_courses,
        finalized_courses,
    })
}

pub fn list_for_student(conn: &Connection, student_id: &str) -> CoreResult<Vec<CourseGrade>> {
    let sql = format!(
        "SELECT {} FROM course_grades WHERE student_id = ? ORDER BY course_id",
        GRADE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
