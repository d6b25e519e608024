use serde::Serialize;

/// Inclusive lower bound, letter, GPA point. Descending; the last row is the
/// catch-all for everything under 60.
const LETTER_TABLE: [(f64, &str, f64); 12] = [
    (97.0, "A+", 4.0),
    (93.0, "A", 4.0),
    (90.0, "A-", 3.7),
    (87.0, "B+", 3.3),
    (83.0, "B", 3.0),
    (80.0, "B-", 2.7),
    (77.0, "C+", 2.3),
    (73.0, "C", 2.0),
    (70.0, "C-", 1.7),
    (67.0, "D+", 1.3),
    (60.0, "D", 1.0),
    (f64::NEG_INFINITY, "F", 0.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterGrade {
    pub letter: &'static str,
    pub gpa_point: f64,
}

/// Map a percentage to its letter grade and GPA point.
///
/// Total over all `f64`: NaN and negatives look up as 0, anything over 100
/// looks up as 100.
pub fn letter_and_gpa(percentage: f64) -> LetterGrade {
    let p = clamp_percentage(percentage);
    let (_, letter, gpa_point) = LETTER_TABLE
        .iter()
        .copied()
        .find(|(floor, _, _)| p >= *floor)
        .unwrap_or(LETTER_TABLE[LETTER_TABLE.len() - 1]);
    LetterGrade { letter, gpa_point }
}

fn clamp_percentage(p: f64) -> f64 {
    if p.is_nan() {
        return 0.0;
    }
    p.clamp(0.0, 100.0)
}

/// Apply a late deduction expressed as a percent of the earned score.
pub fn apply_late_penalty(raw_percentage: f64, penalty_percent: f64) -> f64 {
    (raw_percentage - raw_percentage * (penalty_percent / 100.0)).max(0.0)
}
