use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ENV_WORKSPACE: &str = "COURSEBOOK_WORKSPACE";
pub const ENV_LOG: &str = "COURSEBOOK_LOG";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Attendance,
    Grading,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Attendance, SetupSection::Grading];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
            Self::Grading => "grading",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Attendance => "setup.attendance",
            Self::Grading => "setup.grading",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSettings {
    /// Attempts at writing the session record when SQLite reports busy.
    pub session_write_attempts: u32,
}

impl Default for AttendanceSettings {
    fn default() -> Self {
        Self {
            session_write_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradingSettings {
    pub default_late_penalty_percent: f64,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            default_late_penalty_percent: 10.0,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    let v = match section {
        SetupSection::Attendance => serde_json::to_value(AttendanceSettings::default()),
        SetupSection::Grading => serde_json::to_value(GradingSettings::default()),
    };
    v.unwrap_or_else(|_| Value::Object(Map::new()))
}

fn parse_int_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let Some(n) = v.as_i64() else {
        return Err(format!("{} must be an integer", key));
    };
    if n < min || n > max {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(n)
}

fn parse_number_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let Some(n) = v.as_f64() else {
        return Err(format!("{} must be a number", key));
    };
    if !n.is_finite() || n < min || n > max {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(n)
}

/// Validate `patch` field by field and merge it into `current`.
pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Attendance => match k.as_str() {
                "sessionWriteAttempts" => {
                    obj.insert(k.clone(), Value::from(parse_int_range(v, k, 1, 10)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "defaultLatePenaltyPercent" => {
                    obj.insert(k.clone(), Value::from(parse_number_range(v, k, 0.0, 100.0)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults rather than failing.
            if merge_section_patch(section, &mut current, saved_obj).is_err() {
                tracing::warn!(section = section.name(), "ignoring invalid saved setup section");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

pub fn attendance_settings(conn: &Connection) -> anyhow::Result<AttendanceSettings> {
    let v = load_section(conn, SetupSection::Attendance)?;
    Ok(serde_json::from_value(v)?)
}

pub fn grading_settings(conn: &Connection) -> anyhow::Result<GradingSettings> {
    let v = load_section(conn, SetupSection::Grading)?;
    Ok(serde_json::from_value(v)?)
}
