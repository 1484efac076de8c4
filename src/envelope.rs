//! Wire frame shapes: one inbound request, three possible outbound replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub command: String,
    pub request_id: Option<String>,
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutboundFrame {
    Ok {
        #[serde(rename = "type")]
        type_: String,
        request_id: Option<String>,
        data: Value,
    },
    Error {
        error: ErrorBody,
        request_id: Option<String>,
    },
    Refused {
        error: ErrorBody,
        request_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl OutboundFrame {
    pub fn ok(type_: impl Into<String>, request_id: Option<String>, data: Value) -> Self {
        OutboundFrame::Ok {
            type_: type_.into(),
            request_id,
            data,
        }
    }

    pub fn error(code: i32, message: impl Into<String>, request_id: Option<String>) -> Self {
        OutboundFrame::Error {
            error: ErrorBody {
                code,
                message: message.into(),
                meta: None,
            },
            request_id,
        }
    }

    pub fn from_engine_error(e: &crate::error::EngineError, request_id: Option<String>) -> Self {
        OutboundFrame::error(e.code(), e.to_string(), request_id)
    }

    pub fn from_refusal(r: &crate::error::Refusal, request_id: Option<String>) -> Self {
        OutboundFrame::Refused {
            error: ErrorBody {
                code: r.code,
                message: r.message.clone(),
                meta: r.meta.clone(),
            },
            request_id,
        }
    }

    /// Serialize to a single line of JSON with the trailing newline the
    /// line-framed wire protocol expects.
    pub fn to_line(&self) -> String {
        let mut s = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","error":{"code":1006,"message":"serialization failure"}}"#
                .to_string()
        });
        s.push('\n');
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_parses_minimal_request() {
        let line = r#"{"command":"sector.scan"}"#;
        let frame: InboundFrame = serde_json::from_str(line).unwrap();
        assert_eq!(frame.command, "sector.scan");
        assert!(frame.request_id.is_none());
    }

    #[test]
    fn ok_frame_echoes_request_id() {
        let frame = OutboundFrame::ok("sector.scan.v1", Some("r1".into()), serde_json::json!({}));
        let line = frame.to_line();
        assert!(line.contains("\"request_id\":\"r1\""));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn refused_frame_carries_meta() {
        let refusal = crate::error::Refusal::with_meta(
            2004,
            "insufficient funds",
            serde_json::json!({"missing": {"ore": 40}}),
        );
        let frame = OutboundFrame::from_refusal(&refusal, None);
        let line = frame.to_line();
        assert!(line.contains("\"missing\""));
        assert!(line.contains("\"status\":\"refused\""));
    }
}
