//! Gateway message envelope

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chorus_core::Snowflake;

use super::{
    HelloPayload, IdentifyPayload, OpCode, RequestMembersPayload, ResumePayload, StatusUpdatePayload,
};

/// Every gateway payload travels in this envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event name (dispatches only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (dispatches only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event data; serialized as `null` when absent
    #[serde(default)]
    pub d: Option<Value>,
}

impl GatewayMessage {
    fn control(op: OpCode, d: Option<Value>) -> Self {
        Self { op, t: None, s: None, d }
    }

    fn with_payload(op: OpCode, payload: &impl Serialize) -> Self {
        Self::control(op, serde_json::to_value(payload).ok())
    }

    // === Client messages ===

    /// Heartbeat (op 1) carrying the last sequence seen
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::control(OpCode::Heartbeat, last_sequence.map(Value::from))
    }

    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::with_payload(OpCode::Identify, payload)
    }

    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self::with_payload(OpCode::Resume, payload)
    }

    #[must_use]
    pub fn presence(payload: &StatusUpdatePayload) -> Self {
        Self::with_payload(OpCode::Presence, payload)
    }

    #[must_use]
    pub fn request_members(payload: &RequestMembersPayload) -> Self {
        Self::with_payload(OpCode::RequestMembers, payload)
    }

    /// Guild sync (op 12); `d` is a bare list of guild ids
    #[must_use]
    pub fn guild_sync(guild_ids: &[Snowflake]) -> Self {
        Self::with_payload(OpCode::GuildSync, &guild_ids)
    }

    // === Server messages ===

    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    #[must_use]
    pub fn hello(payload: &HelloPayload) -> Self {
        Self::with_payload(OpCode::Hello, payload)
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::control(OpCode::HeartbeatAck, None)
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self::control(OpCode::Reconnect, None)
    }

    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::control(OpCode::InvalidateSession, Some(Value::Bool(resumable)))
    }

    // === Parsing ===

    /// Deserialize `d` into a typed payload (`null` when absent)
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.d {
            Some(d) => T::deserialize(d),
            None => T::deserialize(&Value::Null),
        }
    }

    /// Hello payload, if this is op 10
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.payload().ok()
    }

    /// Resumable flag of an op 9; a missing flag means "not resumable"
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidateSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    /// Sequence carried by a heartbeat (op 1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_u64))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayMessage(op={})", self.op)
        }
    }
}
