use chrono::{DateTime, Duration, TimeZone, Utc};
use coursebook::catalog::{self, Assignment, LateSubmissionPolicy, NewAssignment, NewCourse};
use coursebook::{db, enrollment, submission, CoreError};
use rusqlite::Connection;

fn due() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 1, 23, 59, 0)
        .single()
        .expect("valid timestamp")
}

fn setup(conn: &Connection, late: LateSubmissionPolicy) -> Assignment {
    let course = catalog::create_course(
        conn,
        NewCourse {
            code: "ENG201".into(),
            title: "Essays".into(),
            instructor_id: None,
            max_seats: 10,
        },
        due() - Duration::days(30),
    )
    .expect("create course");
    catalog::approve_course(conn, &course.id).expect("approve");
    enrollment::enroll(conn, "s1", &course.id, due() - Duration::days(29)).expect("enroll");
    catalog::create_assignment(
        conn,
        NewAssignment {
            course_id: course.id,
            title: "Essay 1".into(),
            total_points: 100.0,
            due_date: due(),
            late_submission: late,
        },
        due() - Duration::days(7),
    )
    .expect("create assignment")
}

fn late_ok(penalty_percent: f64) -> LateSubmissionPolicy {
    LateSubmissionPolicy {
        allowed: true,
        penalty_percent,
    }
}

const NO_LATE: LateSubmissionPolicy = LateSubmissionPolicy {
    allowed: false,
    penalty_percent: 0.0,
};

#[test]
fn late_submission_loses_the_penalty() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, late_ok(10.0));
    let s = submission::submit(&conn, &a.id, "s1", Some("draft".into()), due() + Duration::hours(5))
        .expect("submit");
    assert!(s.is_late);

    let graded = submission::grade(&conn, &s.id, 80.0, Some("ok".into()), due() + Duration::days(2))
        .expect("grade");
    let g = graded.grade.expect("grade stored");
    assert_eq!(g.points, 80.0);
    assert!((g.percentage - 72.0).abs() < 1e-9);
    assert_eq!(g.letter_grade, "C-");
    assert_eq!(g.feedback.as_deref(), Some("ok"));
}

#[test]
fn on_time_submission_is_graded_raw_and_regrade_overwrites() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, late_ok(10.0));
    let s = submission::submit(&conn, &a.id, "s1", None, due() - Duration::hours(1)).expect("submit");
    assert!(!s.is_late);
    assert!(s.grade.is_none());

    let first = submission::grade(&conn, &s.id, 93.0, None, due()).expect("grade");
    let g = first.grade.expect("grade");
    assert_eq!(g.percentage, 93.0);
    assert_eq!(g.letter_grade, "A");

    let second = submission::grade(&conn, &s.id, 59.5, Some("rescored".into()), due())
        .expect("regrade");
    let g = second.grade.expect("grade");
    assert_eq!(g.percentage, 59.5);
    assert_eq!(g.letter_grade, "F");
    assert_eq!(g.feedback.as_deref(), Some("rescored"));
}

#[test]
fn submitting_exactly_at_the_deadline_is_on_time() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, NO_LATE);
    let s = submission::submit(&conn, &a.id, "s1", None, due()).expect("submit");
    assert!(!s.is_late);
}

#[test]
fn late_submission_is_rejected_when_policy_forbids_it() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, NO_LATE);
    let res = submission::submit(&conn, &a.id, "s1", None, due() + Duration::seconds(1));
    assert!(matches!(res, Err(CoreError::LateSubmissionRejected { .. })), "{:?}", res);
    assert!(submission::list_for_assignment(&conn, &a.id).expect("list").is_empty());
}

#[test]
fn grading_a_late_submission_after_late_work_was_disallowed_fails() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, late_ok(10.0));
    let s = submission::submit(&conn, &a.id, "s1", None, due() + Duration::days(1)).expect("submit");
    conn.execute("UPDATE assignments SET late_allowed = 0 WHERE id = ?", [&a.id])
        .expect("tighten policy");

    let res = submission::grade(&conn, &s.id, 90.0, None, due() + Duration::days(2));
    assert!(matches!(res, Err(CoreError::LateSubmissionRejected { .. })));
    assert!(submission::get(&conn, &s.id).expect("get").grade.is_none());
}

#[test]
fn points_outside_the_range_are_rejected_and_nothing_is_stored() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, NO_LATE);
    let s = submission::submit(&conn, &a.id, "s1", None, due()).expect("submit");

    for bad in [-1.0, 100.5, f64::NAN] {
        let res = submission::grade(&conn, &s.id, bad, None, due());
        assert!(matches!(res, Err(CoreError::InvalidPoints { .. })), "{} -> {:?}", bad, res);
    }
    assert!(submission::get(&conn, &s.id).expect("get").grade.is_none());

    let full = submission::grade(&conn, &s.id, 100.0, None, due()).expect("full marks");
    assert_eq!(full.grade.expect("grade").letter_grade, "A+");
}

#[test]
fn moving_the_due_date_does_not_change_lateness() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, late_ok(20.0));
    let s = submission::submit(&conn, &a.id, "s1", None, due() + Duration::hours(2)).expect("submit");
    assert!(s.is_late);

    catalog::set_assignment_due_date(&conn, &a.id, due() + Duration::days(3)).expect("extend");
    let after = submission::get(&conn, &s.id).expect("get");
    assert!(after.is_late);

    let graded = submission::grade(&conn, &s.id, 50.0, None, due()).expect("grade");
    assert!((graded.grade.expect("grade").percentage - 40.0).abs() < 1e-9);
}

#[test]
fn one_submission_per_student_and_enrollment_required() {
    let conn = db::open_in_memory().expect("db");
    let a = setup(&conn, NO_LATE);
    submission::submit(&conn, &a.id, "s1", None, due()).expect("submit");

    let again = submission::submit(&conn, &a.id, "s1", None, due());
    assert!(matches!(again, Err(CoreError::DuplicateSubmission { .. })));

    let outsider = submission::submit(&conn, &a.id, "s9", None, due());
    assert!(matches!(outsider, Err(CoreError::UnknownEnrollment { .. })));

    let missing = submission::grade(&conn, "nope", 10.0, None, due());
    assert!(matches!(missing, Err(CoreError::NotFound { entity: "submission", .. })));
}
