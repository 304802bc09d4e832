//! Cross-frame message envelope
//!
//! Every message is a JSON object tagged with [`MESSAGE_SOURCE`]:
//!
//! ```json
//! { "source": "adscreen", "requestId": "...", "srcFrameId": "...",
//!   "isRequest": true, "type": "ping", "payload": { "ping": true } }
//! ```
//!
//! Payloads are decoded into the closed [`Request`] / [`Response`] unions.
//! Untagged messages belong to someone else and are ignored; tagged messages
//! that fail to decode are errors.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use ads_core::{AdSnapshot, ProtocolError, Size};

pub const MESSAGE_SOURCE: &str = "adscreen";

// =============================================================================
// Identifiers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Ping,
    SetRegistered,
    StartScreen,
    ChildrenDoneLoading,
    CaptureFillGraphic,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::SetRegistered => "setRegistered",
            Self::StartScreen => "startScreen",
            Self::ChildrenDoneLoading => "childrenDoneLoading",
            Self::CaptureFillGraphic => "captureFillGraphic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ping" => Some(Self::Ping),
            "setRegistered" => Some(Self::SetRegistered),
            "startScreen" => Some(Self::StartScreen),
            "childrenDoneLoading" => Some(Self::ChildrenDoneLoading),
            "captureFillGraphic" => Some(Self::CaptureFillGraphic),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Typed payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Liveness and identity probe.
    Ping,
    /// The parent has recorded the child under `frame_id`.
    SetRegistered { frame_id: String },
    /// Begin screening; `top_url` is the top-level page when known.
    StartScreen { top_url: Option<String> },
    /// Whether the receiver's nested frames have finished loading.
    ChildrenDoneLoading,
    /// Find and capture a graphic of `size` inside the receiver's subtree.
    CaptureFillGraphic { size: Size, ad: AdSnapshot },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong { frame_id: String },
    Registered { registered: bool },
    ScreenStarted,
    ChildrenLoaded { done: bool },
    FillGraphic { captured: bool },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameIdPayload {
    frame_id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartScreenPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_url: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillGraphicRequestPayload {
    width: f64,
    height: f64,
    ad: AdSnapshot,
}

fn decode_payload<T: DeserializeOwned>(kind: RequestKind, payload: Option<Value>) -> Result<T, ProtocolError> {
    let payload = payload.ok_or_else(|| ProtocolError::BadPayload {
        kind: kind.to_string(),
        reason: "missing payload".to_string(),
    })?;
    serde_json::from_value(payload).map_err(|e| ProtocolError::BadPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

fn flag(kind: RequestKind, payload: Option<Value>, name: &str) -> Result<bool, ProtocolError> {
    let value: Value = decode_payload(kind, payload)?;
    value
        .get(name)
        .and_then(Value::as_bool)
        .ok_or_else(|| ProtocolError::BadPayload {
            kind: kind.to_string(),
            reason: format!("missing boolean '{name}'"),
        })
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Ping => RequestKind::Ping,
            Self::SetRegistered { .. } => RequestKind::SetRegistered,
            Self::StartScreen { .. } => RequestKind::StartScreen,
            Self::ChildrenDoneLoading => RequestKind::ChildrenDoneLoading,
            Self::CaptureFillGraphic { .. } => RequestKind::CaptureFillGraphic,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Ping => json!({ "ping": true }),
            Self::SetRegistered { frame_id } => json!(FrameIdPayload {
                frame_id: frame_id.clone()
            }),
            Self::StartScreen { top_url } => json!(StartScreenPayload {
                top_url: top_url.clone()
            }),
            Self::ChildrenDoneLoading => json!({}),
            Self::CaptureFillGraphic { size, ad } => json!(FillGraphicRequestPayload {
                width: size.width,
                height: size.height,
                ad: ad.clone(),
            }),
        }
    }

    pub fn decode(kind: RequestKind, payload: Option<Value>) -> Result<Self, ProtocolError> {
        Ok(match kind {
            RequestKind::Ping => Self::Ping,
            RequestKind::SetRegistered => {
                let p: FrameIdPayload = decode_payload(kind, payload)?;
                Self::SetRegistered { frame_id: p.frame_id }
            }
            RequestKind::StartScreen => {
                let top_url = match payload {
                    Some(payload) => {
                        let p: StartScreenPayload = decode_payload(kind, Some(payload))?;
                        p.top_url
                    }
                    None => None,
                };
                Self::StartScreen { top_url }
            }
            RequestKind::ChildrenDoneLoading => Self::ChildrenDoneLoading,
            RequestKind::CaptureFillGraphic => {
                let p: FillGraphicRequestPayload = decode_payload(kind, payload)?;
                Self::CaptureFillGraphic {
                    size: Size::new(p.width, p.height),
                    ad: p.ad,
                }
            }
        })
    }
}

impl Response {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Pong { .. } => RequestKind::Ping,
            Self::Registered { .. } => RequestKind::SetRegistered,
            Self::ScreenStarted => RequestKind::StartScreen,
            Self::ChildrenLoaded { .. } => RequestKind::ChildrenDoneLoading,
            Self::FillGraphic { .. } => RequestKind::CaptureFillGraphic,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Pong { frame_id } => json!({ "pong": true, "frameId": frame_id }),
            Self::Registered { registered } => json!({ "registered": registered }),
            Self::ScreenStarted => json!({ "started": true }),
            Self::ChildrenLoaded { done } => json!({ "done": done }),
            Self::FillGraphic { captured } => json!({ "captured": captured }),
        }
    }

    pub fn decode(kind: RequestKind, payload: Option<Value>) -> Result<Self, ProtocolError> {
        Ok(match kind {
            RequestKind::Ping => {
                let p: FrameIdPayload = decode_payload(kind, payload)?;
                Self::Pong { frame_id: p.frame_id }
            }
            RequestKind::SetRegistered => Self::Registered {
                registered: flag(kind, payload, "registered")?,
            },
            RequestKind::StartScreen => Self::ScreenStarted,
            RequestKind::ChildrenDoneLoading => Self::ChildrenLoaded {
                done: flag(kind, payload, "done")?,
            },
            RequestKind::CaptureFillGraphic => Self::FillGraphic {
                captured: flag(kind, payload, "captured")?,
            },
        })
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source: String,
    pub request_id: RequestId,
    pub src_frame_id: String,
    pub is_request: bool,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn request(request_id: RequestId, src_frame_id: &str, request: &Request) -> Self {
        Self {
            source: MESSAGE_SOURCE.to_string(),
            request_id,
            src_frame_id: src_frame_id.to_string(),
            is_request: true,
            kind: request.kind(),
            payload: Some(request.payload()),
            error: None,
        }
    }

    /// Answer `request` with either a payload or an error.
    pub fn response(request: &Envelope, src_frame_id: &str, result: Result<Response, String>) -> Self {
        let (payload, error) = match result {
            Ok(response) => (Some(response.payload()), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            source: MESSAGE_SOURCE.to_string(),
            request_id: request.request_id.clone(),
            src_frame_id: src_frame_id.to_string(),
            is_request: false,
            kind: request.kind,
            payload,
            error,
        }
    }

    /// Decode a received message. `Ok(None)` means the message is not ours.
    pub fn decode(message: &Value) -> Result<Option<Self>, ProtocolError> {
        let Some(object) = message.as_object() else {
            return Ok(None);
        };
        if object.get("source").and_then(Value::as_str) != Some(MESSAGE_SOURCE) {
            return Ok(None);
        }

        let kind = object.get("type").and_then(Value::as_str).unwrap_or_default();
        if RequestKind::from_name(kind).is_none() {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(message.clone())
            .map(Some)
            .map_err(|e| ProtocolError::BadPayload {
                kind: kind.to_string(),
                reason: e.to_string(),
            })
    }

    /// Decode a serialized message.
    pub fn decode_str(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::NotJson(e.to_string()))?;
        Self::decode(&value)
    }

    pub fn to_value(&self) -> Value {
        json!(self)
    }

    pub fn to_request(&self) -> Result<Request, ProtocolError> {
        Request::decode(self.kind, self.payload.clone())
    }

    /// Typed response to a request of kind `expected`.
    pub fn to_response(&self, expected: RequestKind) -> Result<Response, ProtocolError> {
        if self.kind != expected {
            return Err(ProtocolError::Mismatch {
                expected: expected.to_string(),
                got: self.kind.to_string(),
            });
        }
        if let Some(error) = &self.error {
            return Err(ProtocolError::Remote(error.clone()));
        }
        Response::decode(self.kind, self.payload.clone())
    }
}
