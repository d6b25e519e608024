use crate::config::{self, SetupSection};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use serde_json::{Map, Value};

fn setup_get(conn: &rusqlite::Connection) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(
            section.name().to_string(),
            config::load_section(conn, section)?,
        );
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &rusqlite::Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_raw = get_required_str(params, "section")?;
    let section = SetupSection::parse(&section_raw)
        .ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    match config::update_section(conn, section, patch)? {
        Ok(current) => Ok(current),
        Err(msg) => Err(HandlerErr::bad_params(msg)),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, |conn, _| setup_get(conn))),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
