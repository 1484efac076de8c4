//! Stable error/refusal taxonomy shared by every handler.
//!
//! `error` envelopes carry an [`EngineError`] (validation/IO failure, connection
//! stays open); `refused` envelopes carry a [`Refusal`] (policy rejection, with
//! optional structured `meta`). Handlers never panic: a [`crate::store::StoreError`]
//! always converts to `EngineError::Db` rather than propagating a `rusqlite` panic.

use serde_json::Value;
use thiserror::Error;

/// Stable numeric codes. Part of the wire contract -- never renumber.
pub mod codes {
    pub const ERR_DB: i32 = 1000;
    pub const ERR_INVALID_SCHEMA: i32 = 1001;
    pub const ERR_NOT_AUTHENTICATED: i32 = 1002;
    pub const ERR_SECTOR_NOT_FOUND: i32 = 1003;
    pub const ERR_PLANET_NOT_FOUND: i32 = 1004;
    pub const ERR_AUTOPILOT_PATH_INVALID: i32 = 1005;
    pub const ERR_SERIALIZATION: i32 = 1006;
    pub const ERR_VERSION_NOT_SUPPORTED: i32 = 1007;
    pub const ERR_SERVER_ERROR: i32 = 1008;
    pub const ERR_UNKNOWN_COMMAND: i32 = 1009;
    pub const ERR_MALFORMED: i32 = 1010;

    pub const REF_NO_WARP_LINK: i32 = 2000;
    pub const REF_TURN_COST_EXCEEDS: i32 = 2001;
    pub const REF_SAFE_ZONE_ONLY: i32 = 2002;
    pub const REF_RATE_LIMITED: i32 = 2003;
    pub const REF_INSUFFICIENT_FUNDS: i32 = 2004;
    pub const REF_NOT_PERMITTED: i32 = 2005;
    pub const REF_ALREADY_IN_PROGRESS: i32 = 2006;
    pub const REF_MAX_LEVEL: i32 = 2007;
    pub const REF_NOT_DOCKED: i32 = 2008;
    pub const REF_CARGO_CAP_EXCEEDS: i32 = 2009;
    pub const REF_INSUFFICIENT_RESOURCES: i32 = 2010;
    pub const REF_COOLDOWN: i32 = 2011;
    pub const REF_SHIP_DESTROYED: i32 = 2012;
}

/// A validation/IO failure. The connection stays open; the client may retry.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Db(String),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("schema invalid: {0}")]
    InvalidSchema(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("not found: {1}")]
    NotFound(i32, String),
}

impl EngineError {
    pub fn code(&self) -> i32 {
        use codes::*;
        match self {
            EngineError::Db(_) => ERR_DB,
            EngineError::Malformed(_) => ERR_MALFORMED,
            EngineError::UnknownCommand(_) => ERR_UNKNOWN_COMMAND,
            EngineError::InvalidSchema(_) => ERR_INVALID_SCHEMA,
            EngineError::Internal(_) => ERR_SERVER_ERROR,
            EngineError::NotFound(code, _) => *code,
        }
    }

    pub fn sector_not_found() -> Self {
        EngineError::NotFound(codes::ERR_SECTOR_NOT_FOUND, "sector not found".into())
    }

    pub fn planet_not_found(message: impl Into<String>) -> Self {
        EngineError::NotFound(codes::ERR_PLANET_NOT_FOUND, message.into())
    }
}

impl From<crate::store::StoreError> for EngineError {
    fn from(e: crate::store::StoreError) -> Self {
        EngineError::Db(e.to_string())
    }
}

/// A policy rejection: the request was well-formed and authenticated but the
/// game rules refuse it (insufficient funds, no warp link, out of turns, ...).
#[derive(Debug, Clone)]
pub struct Refusal {
    pub code: i32,
    pub message: String,
    pub meta: Option<Value>,
}

impl Refusal {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Refusal {
            code,
            message: message.into(),
            meta: None,
        }
    }

    pub fn with_meta(code: i32, message: impl Into<String>, meta: Value) -> Self {
        Refusal {
            code,
            message: message.into(),
            meta: Some(meta),
        }
    }

    pub fn not_authenticated() -> Self {
        Refusal::new(codes::ERR_NOT_AUTHENTICATED, "not authenticated")
    }
}

/// Outcome of running a handler body: either branch emits exactly one envelope.
pub type HandlerResult<T> = Result<T, HandlerError>;

#[derive(Debug)]
pub enum HandlerError {
    Engine(EngineError),
    Refused(Refusal),
}

impl From<EngineError> for HandlerError {
    fn from(e: EngineError) -> Self {
        HandlerError::Engine(e)
    }
}

impl From<Refusal> for HandlerError {
    fn from(r: Refusal) -> Self {
        HandlerError::Refused(r)
    }
}

impl From<rusqlite::Error> for HandlerError {
    fn from(e: rusqlite::Error) -> Self {
        HandlerError::Engine(EngineError::Db(e.to_string()))
    }
}

impl From<crate::store::StoreError> for HandlerError {
    fn from(e: crate::store::StoreError) -> Self {
        HandlerError::Engine(e.into())
    }
}
