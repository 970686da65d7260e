//! obs-websocket v5 framing.
//!
//! Only the opcodes and request types this controller uses are modelled;
//! everything rides on `serde_json::Value` payloads so new fields on the
//! OBS side never break parsing.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Protocol opcodes (subset).
pub mod opcode {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// EventSubscription bit for media input events.
pub const EVENT_SUBSCRIPTION_MEDIA_INPUTS: u64 = 1 << 8;

/// Generic protocol frame: `{"op": <u8>, "d": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    pub d: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAuth {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub authentication: Option<HelloAuth>,
    pub rpc_version: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// Build the Identify frame answering a Hello.
///
/// The v5 auth string is `b64(sha256(b64(sha256(password + salt)) + challenge))`.
pub fn identify_frame(hello: &Hello, password: &str, event_subscriptions: u64) -> Frame {
    let authentication = hello
        .authentication
        .as_ref()
        .map(|auth| auth_response(password, &auth.salt, &auth.challenge));

    let mut d = serde_json::json!({
        "rpcVersion": 1,
        "eventSubscriptions": event_subscriptions,
    });
    if let Some(auth) = authentication {
        d["authentication"] = Value::String(auth);
    }

    Frame {
        op: opcode::IDENTIFY,
        d,
    }
}

pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    let secret = b64.encode(hasher.finalize());

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(challenge.as_bytes());
    b64.encode(hasher.finalize())
}

/// Build a request frame.
pub fn request_frame(request_type: &str, request_id: &str, request_data: Option<Value>) -> Frame {
    let mut d = serde_json::json!({
        "requestType": request_type,
        "requestId": request_id,
    });
    if let Some(data) = request_data {
        d["requestData"] = data;
    }
    Frame {
        op: opcode::REQUEST,
        d,
    }
}

/// Playback state reported by `GetMediaInputStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaState {
    Playing,
    Paused,
    Stopped,
    Ended,
    Opening,
    Buffering,
    None,
    Error,
    Unknown(String),
}

impl MediaState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "OBS_MEDIA_STATE_PLAYING" => MediaState::Playing,
            "OBS_MEDIA_STATE_PAUSED" => MediaState::Paused,
            "OBS_MEDIA_STATE_STOPPED" => MediaState::Stopped,
            "OBS_MEDIA_STATE_ENDED" => MediaState::Ended,
            "OBS_MEDIA_STATE_OPENING" => MediaState::Opening,
            "OBS_MEDIA_STATE_BUFFERING" => MediaState::Buffering,
            "OBS_MEDIA_STATE_NONE" => MediaState::None,
            "OBS_MEDIA_STATE_ERROR" => MediaState::Error,
            other => MediaState::Unknown(other.to_string()),
        }
    }
}

/// Snapshot of a media input returned by `GetMediaInputStatus`.
#[derive(Debug, Clone)]
pub struct MediaStatus {
    pub state: MediaState,
    pub cursor_ms: Option<i64>,
    pub duration_ms: Option<i64>,
}

/// Normalised media playback event delivered to the playback monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    Started,
    Ended,
}
