use chrono::{DateTime, TimeZone, Utc};
use coursebook::catalog::{self, NewCourse};
use coursebook::enrollment;
use coursebook::{db, CoreError};
use proptest::prelude::*;

const STUDENTS: [&str; 4] = ["ana", "ben", "cho", "dev"];

#[derive(Debug, Clone, Copy)]
enum Op {
    Enroll(usize),
    Drop(usize),
    Complete(usize),
    Suspend(usize),
    Reinstate(usize),
}

fn op() -> impl Strategy<Value = Op> {
    let student = 0..STUDENTS.len();
    prop_oneof![
        3 => student.clone().prop_map(Op::Enroll),
        2 => student.clone().prop_map(Op::Drop),
        1 => student.clone().prop_map(Op::Complete),
        1 => student.clone().prop_map(Op::Suspend),
        1 => student.prop_map(Op::Reinstate),
    ]
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn business_error(e: &CoreError) -> bool {
    matches!(
        e,
        CoreError::DuplicateEnrollment { .. }
            | CoreError::CourseFull { .. }
            | CoreError::AlreadyTerminal { .. }
            | CoreError::InvalidTransition { .. }
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn seat_counter_matches_seat_holding_rows(
        max_seats in 1i64..4,
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        let conn = db::open_in_memory().expect("db");
        let course = catalog::create_course(
            &conn,
            NewCourse {
                code: "PROP1".into(),
                title: "Property course".into(),
                instructor_id: None,
                max_seats,
            },
            now(),
        )
        .expect("create course");
        catalog::approve_course(&conn, &course.id).expect("approve");

        for op in ops {
            let res = match op {
                Op::Enroll(i) => enrollment::enroll(&conn, STUDENTS[i], &course.id, now()).map(|_| ()),
                Op::Drop(i) | Op::Complete(i) | Op::Suspend(i) | Op::Reinstate(i) => {
                    let Some(e) = enrollment::find_by_pair(&conn, STUDENTS[i], &course.id)
                        .expect("lookup")
                    else {
                        continue;
                    };
                    match op {
                        Op::Drop(_) => enrollment::drop(&conn, &e.id, now()).map(|_| ()),
                        Op::Complete(_) => enrollment::complete(&conn, &e.id, now()).map(|_| ()),
                        Op::Suspend(_) => enrollment::suspend(&conn, &e.id).map(|_| ()),
                        _ => enrollment::reinstate(&conn, &e.id).map(|_| ()),
                    }
                }
            };
            if let Err(e) = &res {
                prop_assert!(business_error(e), "unexpected error {:?} for {:?}", e, op);
            }

            let count = enrollment::recount(&conn, &course.id).expect("recount");
            prop_assert!(count.consistent(), "{:?} after {:?}", count, op);
            prop_assert!(count.current_enrollment >= 0);
            prop_assert!(count.current_enrollment <= count.max_seats);
        }

        let rows = enrollment::list_for_course(&conn, &course.id).expect("list");
        let holding = rows.iter().filter(|e| e.status.holds_seat()).count() as i64;
        let course = catalog::get_course(&conn, &course.id).expect("course");
        prop_assert_eq!(holding, course.current_enrollment);
        prop_assert!(rows.len() <= STUDENTS.len());
    }
}
