pub mod auth;
pub mod bank;
pub mod citadel;
pub mod combat;
pub mod comm;
pub mod corp;
pub mod fine;
pub mod movement;
pub mod news;
pub mod planet;
pub mod sector;
pub mod ship;
pub mod stardock;
pub mod tavern;
pub mod trade;

use crate::error::{codes, EngineError};
use serde_json::Value;

/// Helpers shared by every handler body for pulling typed fields out of the
/// loosely-typed `data` object without a ream of `if let` boilerplate.
pub fn require_str<'a>(data: &'a Value, field: &str) -> Result<&'a str, EngineError> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Malformed(format!("missing field '{field}'")))
}

pub fn require_i64(data: &Value, field: &str) -> Result<i64, EngineError> {
    data.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| EngineError::Malformed(format!("missing field '{field}'")))
}

pub fn optional_i64(data: &Value, field: &str) -> Option<i64> {
    data.get(field).and_then(Value::as_i64)
}

pub fn require_u32_positive(data: &Value, field: &str) -> Result<u32, EngineError> {
    let v = require_i64(data, field)?;
    if v <= 0 {
        return Err(EngineError::Malformed(format!("'{field}' must be positive")));
    }
    Ok(v as u32)
}

/// Handlers talk to their `&Store` through `Deref<Target = Connection>`, so
/// every query/exec call surfaces a raw `rusqlite::Error` rather than
/// [`crate::store::StoreError`] -- this is the conversion every handler's
/// `.map_err(super::db_err)` calls expect.
pub fn db_err(e: rusqlite::Error) -> EngineError {
    EngineError::Db(e.to_string())
}

pub const ERR_DB: i32 = codes::ERR_DB;
