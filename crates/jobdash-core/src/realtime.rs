use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const HEARTBEAT_PING: &str = "ping";
pub const HEARTBEAT_PONG: &str = "pong";

pub const NEW_NOTIFICATION: &str = "NEW_NOTIFICATION";

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Normal closes are deliberate shutdowns by either side and never trigger a
/// reconnect. Every other code does.
pub fn is_normal_close(code: u16) -> bool {
    matches!(code, CLOSE_NORMAL | CLOSE_GOING_AWAY | CLOSE_NO_STATUS)
}

pub fn is_heartbeat_reply(raw: &str, sentinel: &str) -> bool {
    raw.trim() == sentinel
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame decode failed: {0}")]
    Malformed(String),
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
}

/// Server-pushed events. Closed set: anything else is a decode error.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewNotification(Value),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::NewNotification(_) => NEW_NOTIFICATION,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            ServerEvent::NewNotification(data) => data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub fn decode_server_event(raw: &str) -> Result<ServerEvent, FrameError> {
    let frame: RawFrame =
        serde_json::from_str(raw).map_err(|err| FrameError::Malformed(err.to_string()))?;
    match frame.kind.as_str() {
        NEW_NOTIFICATION => Ok(ServerEvent::NewNotification(frame.data)),
        _ => Err(FrameError::UnknownType(frame.kind)),
    }
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, FrameError> {
    let frame = RawFrame {
        kind: event.kind().to_string(),
        data: event.payload().clone(),
    };
    serde_json::to_string(&frame).map_err(|err| FrameError::Encode(err.to_string()))
}
