//! Attendance aggregation.
//!
//! Recording a session happens in two phases. Phase one validates the roster
//! and writes the session with all of its entries in one transaction. Phase
//! two folds each entry into its enrollment's running summary, one
//! transaction per student, and flips the entry's `applied` flag in the same
//! transaction. An entry is folded in at most once, and a failed student can
//! be retried later with `reapply_session` without touching the others.
//! Only an `enrolled` enrollment accepts an entry; dropping a student voids
//! their pending entries so a later re-enrollment starts clean.

use crate::catalog;
use crate::config::AttendanceSettings;
use crate::db::{self, new_id, ts};
use crate::enrollment::{self, AttendanceSummary, EnrollmentStatus};
use crate::error::{is_busy, is_unique_violation, CoreError, CoreResult};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "excused" => Some(Self::Excused),
            _ => None,
        }
    }

    pub fn counts_as_attended(self) -> bool {
        matches!(self, Self::Present | Self::Late)
    }
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        AttendanceStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("bad attendance status {s}").into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMark {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub student_id: String,
    pub enrollment_id: String,
    pub status: AttendanceStatus,
    pub applied: bool,
    pub voided: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub id: String,
    pub course_id: String,
    pub date: String,
    pub recorded_at: String,
    pub entries: Vec<SessionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    #[serde(rename_all = "camelCase")]
    Applied { attendance: AttendanceSummary },
    AlreadyApplied,
    Voided,
    #[serde(rename_all = "camelCase")]
    Failed { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOutcome {
    pub student_id: String,
    pub enrollment_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session: AttendanceSession,
    pub outcomes: Vec<StudentOutcome>,
}

impl SessionReport {
    pub fn failed(&self) -> impl Iterator<Item = &StudentOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

pub fn parse_date(raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| CoreError::InvalidInput(format!("date must be YYYY-MM-DD, got {}", raw)))
}

/// Record one class meeting and fold it into every listed enrollment.
///
/// Business-rule failures (unknown course, duplicate date, a student without
/// an active enrollment) reject the whole request before anything is
/// written. Once the session is stored, per-student failures are reported in
/// the outcome list instead of failing the call.
pub fn record_session(
    conn: &Connection,
    course_id: &str,
    date: NaiveDate,
    marks: &[SessionMark],
    settings: &AttendanceSettings,
    now: DateTime<Utc>,
) -> CoreResult<SessionReport> {
    let mut seen = HashSet::new();
    for m in marks {
        if !seen.insert(m.student_id.as_str()) {
            return Err(CoreError::InvalidInput(format!(
                "student {} listed more than once",
                m.student_id
            )));
        }
    }

    let attempts = settings.session_write_attempts.max(1);
    let mut attempt = 1;
    let session_id = loop {
        match write_session(conn, course_id, date, marks, now) {
            Ok(id) => break id,
            Err(CoreError::Storage(e)) if is_busy(&e) && attempt < attempts => {
                warn!(course_id, attempt, "attendance session write busy; retrying");
                std::thread::sleep(Duration::from_millis(25 * attempt as u64));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    };
    info!(%session_id, course_id, %date, students = marks.len(), "attendance session recorded");

    let outcomes = apply_pending(conn, &session_id)?;
    let session = get_session(conn, &session_id)?;
    Ok(SessionReport { session, outcomes })
}

fn write_session(
    conn: &Connection,
    course_id: &str,
    date: NaiveDate,
    marks: &[SessionMark],
    now: DateTime<Utc>,
) -> CoreResult<String> {
    let date_key = date.format(DATE_FORMAT).to_string();
    let tx = db::write_tx(conn)?;
    catalog::get_course(&tx, course_id)?;

    let duplicate = tx
        .query_row(
            "SELECT 1 FROM attendance_sessions WHERE course_id = ? AND session_date = ?",
            (course_id, &date_key),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if duplicate {
        debug!(course_id, date = %date_key, "session rejected: duplicate");
        return Err(CoreError::DuplicateSession {
            course_id: course_id.to_string(),
            date: date_key,
        });
    }

    let mut enrollment_ids = Vec::with_capacity(marks.len());
    for m in marks {
        let Some(e) = enrollment::find_active(&tx, &m.student_id, course_id)? else {
            debug!(course_id, student_id = %m.student_id, "session rejected: not enrolled");
            return Err(CoreError::UnknownEnrollment {
                student_id: m.student_id.clone(),
                course_id: course_id.to_string(),
            });
        };
        enrollment_ids.push(e.id);
    }

    let session_id = new_id();
    let res = tx.execute(
        "INSERT INTO attendance_sessions(id, course_id, session_date, recorded_at)
         VALUES(?, ?, ?, ?)",
        (&session_id, course_id, &date_key, ts(now)),
    );
    match res {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(CoreError::DuplicateSession {
                course_id: course_id.to_string(),
                date: date_key,
            })
        }
        Err(e) => return Err(e.into()),
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO attendance_entries(session_id, student_id, enrollment_id, status, sort_order, applied)
             VALUES(?, ?, ?, ?, ?, 0)",
        )?;
        for (i, (m, enrollment_id)) in marks.iter().zip(&enrollment_ids).enumerate() {
            stmt.execute((&session_id, &m.student_id, enrollment_id, m.status, i as i64))?;
        }
    }
    tx.commit()?;
    Ok(session_id)
}

/// Retry aggregation for entries a previous call could not apply.
pub fn reapply_session(conn: &Connection, session_id: &str) -> CoreResult<SessionReport> {
    get_session(conn, session_id)?;
    let outcomes = apply_pending(conn, session_id)?;
    let session = get_session(conn, session_id)?;
    Ok(SessionReport { session, outcomes })
}

fn apply_pending(conn: &Connection, session_id: &str) -> CoreResult<Vec<StudentOutcome>> {
    let entries = load_entries(conn, session_id)?;
    let mut outcomes = Vec::with_capacity(entries.len());
    for entry in entries {
        let outcome = if entry.applied {
            Outcome::AlreadyApplied
        } else if entry.voided {
            Outcome::Voided
        } else {
            match apply_entry(conn, session_id, &entry) {
                Ok(Some(attendance)) => Outcome::Applied { attendance },
                Ok(None) => Outcome::AlreadyApplied,
                Err(e) => {
                    if e.is_storage() {
                        warn!(
                            session_id,
                            student_id = %entry.student_id,
                            error = %e,
                            "attendance aggregation failed for student"
                        );
                    } else {
                        debug!(
                            session_id,
                            student_id = %entry.student_id,
                            code = e.code(),
                            "attendance entry left pending"
                        );
                    }
                    Outcome::Failed {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }
                }
            }
        };
        outcomes.push(StudentOutcome {
            student_id: entry.student_id,
            enrollment_id: entry.enrollment_id,
            outcome,
        });
    }
    Ok(outcomes)
}

/// Fold one entry into its enrollment. `None` means someone else already
/// applied or voided it.
fn apply_entry(
    conn: &Connection,
    session_id: &str,
    entry: &SessionEntry,
) -> CoreResult<Option<AttendanceSummary>> {
    let tx = db::write_tx(conn)?;
    let claimed = tx.execute(
        "UPDATE attendance_entries SET applied = 1
         WHERE session_id = ? AND student_id = ? AND applied = 0 AND voided = 0",
        (session_id, &entry.student_id),
    )?;
    if claimed == 0 {
        return Ok(None);
    }
    let current = enrollment::get(&tx, &entry.enrollment_id)?;
    if current.status != EnrollmentStatus::Enrolled {
        return Err(CoreError::UnknownEnrollment {
            student_id: entry.student_id.clone(),
            course_id: current.course_id,
        });
    }
    let attended = entry.status.counts_as_attended() as i64;
    tx.execute(
        "UPDATE enrollments SET
           total_classes = total_classes + 1,
           attended_classes = attended_classes + ?1,
           attendance_percentage = (attended_classes + ?1) * 100.0 / (total_classes + 1)
         WHERE id = ?2 AND status = 'enrolled'",
        (attended, &entry.enrollment_id),
    )?;
    let summary = enrollment::get(&tx, &entry.enrollment_id)?.attendance;
    tx.commit()?;
    Ok(Some(summary))
}

/// Void the not-yet-applied entries of an enrollment that is leaving the
/// course. Runs inside the caller's transaction.
pub(crate) fn void_pending_entries(conn: &Connection, enrollment_id: &str) -> CoreResult<usize> {
    let n = conn.execute(
        "UPDATE attendance_entries SET voided = 1
         WHERE enrollment_id = ? AND applied = 0 AND voided = 0",
        [enrollment_id],
    )?;
    Ok(n)
}

fn entry_from_row(r: &Row<'_>) -> rusqlite::Result<SessionEntry> {
    Ok(SessionEntry {
        student_id: r.get(0)?,
        enrollment_id: r.get(1)?,
        status: r.get(2)?,
        applied: r.get::<_, i64>(3)? != 0,
        voided: r.get::<_, i64>(4)? != 0,
    })
}

fn load_entries(conn: &Connection, session_id: &str) -> CoreResult<Vec<SessionEntry>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, enrollment_id, status, applied, voided
         FROM attendance_entries
         WHERE session_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([session_id], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_session(conn: &Connection, session_id: &str) -> CoreResult<AttendanceSession> {
    let head = conn
        .query_row(
            "SELECT id, course_id, session_date, recorded_at FROM attendance_sessions WHERE id = ?",
            [session_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((id, course_id, date, recorded_at)) = head else {
        return Err(CoreError::not_found("attendance session", session_id));
    };
    let entries = load_entries(conn, &id)?;
    Ok(AttendanceSession {
        id,
        course_id,
        date,
        recorded_at,
        entries,
    })
}

pub fn list_sessions(conn: &Connection, course_id: &str) -> CoreResult<Vec<AttendanceSession>> {
    catalog::get_course(conn, course_id)?;
    let mut stmt = conn
        .prepare("SELECT id FROM attendance_sessions WHERE course_id = ? ORDER BY session_date")?;
    let ids = stmt
        .query_map([course_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.iter().map(|id| get_session(conn, id)).collect()
}
