use chrono::{DateTime, TimeZone, Utc};
use coursebook::catalog::{self, NewCourse};
use coursebook::{course_grade, db, enrollment, CoreError};
use rusqlite::Connection;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, day, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn open_course(conn: &Connection, code: &str) -> String {
    let course = catalog::create_course(
        conn,
        NewCourse {
            code: code.to_string(),
            title: code.to_string(),
            instructor_id: None,
            max_seats: 20,
        },
        at(1),
    )
    .expect("create course");
    catalog::approve_course(conn, &course.id).expect("approve").id
}

fn enrolled(conn: &Connection, student_id: &str, code: &str) -> (String, String) {
    let course_id = open_course(conn, code);
    let e = enrollment::enroll(conn, student_id, &course_id, at(1)).expect("enroll");
    (course_id, e.id)
}

#[test]
fn finalized_grade_cannot_be_changed() {
    let conn = db::open_in_memory().expect("db");
    let (course_id, enrollment_id) = enrolled(&conn, "s1", "MATH101");

    let draft = course_grade::upsert_grade(&conn, "s1", &course_id, 81.0, at(2)).expect("draft");
    assert_eq!(draft.letter_grade, "B-");
    assert!(!draft.finalized);

    let revised = course_grade::upsert_grade(&conn, "s1", &course_id, 88.0, at(3)).expect("revise");
    assert_eq!(revised.id, draft.id);
    assert_eq!(revised.letter_grade, "B+");
    assert_eq!(revised.gpa_point, 3.3);

    let locked = course_grade::finalize(&conn, "s1", &course_id, at(4)).expect("finalize");
    assert!(locked.finalized);
    assert!(locked.finalized_at.is_some());

    let late_change = course_grade::upsert_grade(&conn, "s1", &course_id, 95.0, at(5));
    assert!(matches!(late_change, Err(CoreError::AlreadyFinalized { .. })), "{:?}", late_change);
    let twice = course_grade::finalize(&conn, "s1", &course_id, at(5));
    assert!(matches!(twice, Err(CoreError::AlreadyFinalized { .. })));

    let stored = course_grade::get(&conn, "s1", &course_id).expect("get");
    assert_eq!(stored, locked);

    let mirrored = enrollment::get(&conn, &enrollment_id)
        .expect("enrollment")
        .final_grade
        .expect("final grade mirrored");
    assert_eq!(mirrored.percentage, 88.0);
    assert_eq!(mirrored.letter_grade, "B+");
    assert!(mirrored.finalized);
}

#[test]
fn grading_requires_a_seat_holding_enrollment() {
    let conn = db::open_in_memory().expect("db");
    let course_id = open_course(&conn, "HIST200");
    let res = course_grade::upsert_grade(&conn, "nobody", &course_id, 90.0, at(2));
    assert!(matches!(res, Err(CoreError::UnknownEnrollment { .. })));

    let e = enrollment::enroll(&conn, "s1", &course_id, at(1)).expect("enroll");
    enrollment::drop(&conn, &e.id, at(2)).expect("drop");
    let res = course_grade::upsert_grade(&conn, "s1", &course_id, 90.0, at(3));
    assert!(matches!(res, Err(CoreError::UnknownEnrollment { .. })));

    let missing = course_grade::finalize(&conn, "s1", &course_id, at(3));
    assert!(matches!(missing, Err(CoreError::NotFound { .. })));
}

#[test]
fn completed_students_can_still_be_graded() {
    let conn = db::open_in_memory().expect("db");
    let (course_id, enrollment_id) = enrolled(&conn, "s1", "CHEM300");
    enrollment::complete(&conn, &enrollment_id, at(10)).expect("complete");

    let g = course_grade::upsert_grade(&conn, "s1", &course_id, 74.0, at(11)).expect("grade");
    assert_eq!(g.letter_grade, "C");
}

#[test]
fn negative_or_non_finite_percentages_are_rejected() {
    let conn = db::open_in_memory().expect("db");
    let (course_id, _) = enrolled(&conn, "s1", "ART101");
    for bad in [-0.5, f64::NAN, f64::INFINITY] {
        let res = course_grade::upsert_grade(&conn, "s1", &course_id, bad, at(2));
        assert!(matches!(res, Err(CoreError::InvalidInput(_))), "{}", bad);
    }
    assert!(course_grade::find(&conn, "s1", &course_id).expect("find").is_none());
}

#[test]
fn cumulative_gpa_separates_provisional_from_official() {
    let conn = db::open_in_memory().expect("db");
    let empty = course_grade::cumulative_gpa(&conn, "s1").expect("empty gpa");
    assert_eq!(empty.provisional, None);
    assert_eq!(empty.official, None);
    assert_eq!(empty.graded_courses, 0);

    let (a, _) = enrolled(&conn, "s1", "A100");
    let (b, _) = enrolled(&conn, "s1", "B100");
    course_grade::upsert_grade(&conn, "s1", &a, 95.0, at(2)).expect("a");
    course_grade::upsert_grade(&conn, "s1", &b, 85.0, at(2)).expect("b");
    course_grade::finalize(&conn, "s1", &a, at(3)).expect("finalize a");

    let gpa = course_grade::cumulative_gpa(&conn, "s1").expect("gpa");
    assert_eq!(gpa.graded_courses, 2);
    assert_eq!(gpa.finalized_courses, 1);
    assert!((gpa.provisional.expect("provisional") - 3.5).abs() < 1e-9);
    assert!((gpa.official.expect("official") - 4.0).abs() < 1e-9);

    let listed = course_grade::list_for_student(&conn, "s1").expect("list");
    assert_eq!(listed.len(), 2);
}

#[test]
fn dropped_student_with_finalized_grade_cannot_reenroll() {
    let conn = db::open_in_memory().expect("db");
    let (course_id, enrollment_id) = enrolled(&conn, "s1", "PHIL101");
    course_grade::upsert_grade(&conn, "s1", &course_id, 65.0, at(2)).expect("grade");
    course_grade::finalize(&conn, "s1", &course_id, at(3)).expect("finalize");
    enrollment::drop(&conn, &enrollment_id, at(4)).expect("drop");

    let res = enrollment::enroll(&conn, "s1", &course_id, at(5));
    assert!(matches!(res, Err(CoreError::AlreadyFinalized { .. })));
    let seats = enrollment::recount(&conn, &course_id).expect("recount");
    assert_eq!(seats.current_enrollment, 0);
    assert!(seats.consistent());
}

#[test]
fn reenrolling_clears_a_provisional_grade() {
    let conn = db::open_in_memory().expect("db");
    let (course_id, enrollment_id) = enrolled(&conn, "s1", "PHIL102");
    course_grade::upsert_grade(&conn, "s1", &course_id, 65.0, at(2)).expect("grade");
    enrollment::drop(&conn, &enrollment_id, at(3)).expect("drop");

    let back = enrollment::enroll(&conn, "s1", &course_id, at(4)).expect("re-enroll");
    assert_eq!(back.final_grade, None);
    assert!(course_grade::find(&conn, "s1", &course_id).expect("find").is_none());
}
