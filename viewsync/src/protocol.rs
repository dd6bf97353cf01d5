//! Wire protocol shared by every instance in a group.
//!
//! Wire format (JSON, one object per frame):
//! ```text
//! { "type": "camera" | "selection" | "ambiance" | "layer"
//!         | "join" | "leave" | "ping" | "pong",
//!   "groupId": string, "instanceId": string,
//!   "timestamp": epoch millis, "payload": <kind-specific | null> }
//! ```
//!
//! Frames are decoded exactly once, at the transport boundary, into
//! [`SyncMessage`]. Everything past that point works on typed payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::camera::CameraState;
use crate::error::ProtocolError;
use crate::role::ChannelKind;

/// Feature selection on one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionState {
    pub layer_id: String,
    pub feature_indices: Vec<u32>,
}

/// Lighting / sun position shared between views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbianceState {
    /// Minutes since local midnight.
    pub time_of_day: u32,
    /// ISO-8601 calendar date.
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadows_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_realistic_sun: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerVisibility {
    pub layer_id: String,
    pub visible: bool,
}

/// One variant per message type, each with its own payload.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Camera(CameraState),
    Selection(SelectionState),
    Ambiance(AmbianceState),
    Layer(LayerVisibility),
    Join,
    Leave,
    Ping,
    Pong,
}

impl MessageBody {
    /// The `type` string on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::Camera(_) => "camera",
            MessageBody::Selection(_) => "selection",
            MessageBody::Ambiance(_) => "ambiance",
            MessageBody::Layer(_) => "layer",
            MessageBody::Join => "join",
            MessageBody::Leave => "leave",
            MessageBody::Ping => "ping",
            MessageBody::Pong => "pong",
        }
    }

    /// Data kind gated by role and flags; `None` for control messages.
    pub fn channel_kind(&self) -> Option<ChannelKind> {
        match self {
            MessageBody::Camera(_) => Some(ChannelKind::Camera),
            MessageBody::Selection(_) => Some(ChannelKind::Selection),
            MessageBody::Ambiance(_) => Some(ChannelKind::Ambiance),
            MessageBody::Layer(_) => Some(ChannelKind::Layer),
            _ => None,
        }
    }

    fn payload(&self) -> Result<serde_json::Value, ProtocolError> {
        let value = match self {
            MessageBody::Camera(state) => serde_json::to_value(state),
            MessageBody::Selection(state) => serde_json::to_value(state),
            MessageBody::Ambiance(state) => serde_json::to_value(state),
            MessageBody::Layer(state) => serde_json::to_value(state),
            MessageBody::Join | MessageBody::Leave | MessageBody::Ping | MessageBody::Pong => {
                return Ok(serde_json::Value::Null)
            }
        };
        value.map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    fn from_wire(kind: &str, payload: serde_json::Value) -> Result<Self, ProtocolError> {
        Ok(match kind {
            "camera" => MessageBody::Camera(parse_payload("camera", payload)?),
            "selection" => MessageBody::Selection(parse_payload("selection", payload)?),
            "ambiance" => MessageBody::Ambiance(parse_payload("ambiance", payload)?),
            "layer" => MessageBody::Layer(parse_payload("layer", payload)?),
            "join" => MessageBody::Join,
            "leave" => MessageBody::Leave,
            "ping" => MessageBody::Ping,
            "pong" => MessageBody::Pong,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        })
    }
}

fn parse_payload<T: DeserializeOwned>(
    kind: &'static str,
    payload: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    group_id: String,
    instance_id: String,
    timestamp: u64,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMessage {
    pub body: MessageBody,
    pub group_id: String,
    pub instance_id: String,
    /// Sender's wall clock, epoch millis. Not comparable across instances.
    pub timestamp: u64,
}

impl SyncMessage {
    pub fn new(body: MessageBody, group_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            body,
            group_id: group_id.into(),
            instance_id: instance_id.into(),
            timestamp: now_millis(),
        }
    }

    pub fn camera(group_id: &str, instance_id: &str, state: CameraState) -> Self {
        Self::new(MessageBody::Camera(state), group_id, instance_id)
    }

    pub fn selection(group_id: &str, instance_id: &str, state: SelectionState) -> Self {
        Self::new(MessageBody::Selection(state), group_id, instance_id)
    }

    pub fn ambiance(group_id: &str, instance_id: &str, state: AmbianceState) -> Self {
        Self::new(MessageBody::Ambiance(state), group_id, instance_id)
    }

    pub fn layer(group_id: &str, instance_id: &str, state: LayerVisibility) -> Self {
        Self::new(MessageBody::Layer(state), group_id, instance_id)
    }

    pub fn join(group_id: &str, instance_id: &str) -> Self {
        Self::new(MessageBody::Join, group_id, instance_id)
    }

    pub fn leave(group_id: &str, instance_id: &str) -> Self {
        Self::new(MessageBody::Leave, group_id, instance_id)
    }

    pub fn ping(group_id: &str, instance_id: &str) -> Self {
        Self::new(MessageBody::Ping, group_id, instance_id)
    }

    pub fn pong(group_id: &str, instance_id: &str) -> Self {
        Self::new(MessageBody::Pong, group_id, instance_id)
    }

    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let envelope = Envelope {
            kind: self.body.type_name().to_string(),
            group_id: self.group_id.clone(),
            instance_id: self.instance_id.clone(),
            timestamp: self.timestamp,
            payload: self.body.payload()?,
        };
        serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON frame. Unknown types and bad payloads are errors.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(Self {
            body: MessageBody::from_wire(&envelope.kind, envelope.payload)?,
            group_id: envelope.group_id,
            instance_id: envelope.instance_id,
            timestamp: envelope.timestamp,
        })
    }
}
