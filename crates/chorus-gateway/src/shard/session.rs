//! Shard session state machine
//!
//! Pure protocol logic with no I/O: feed it decoded messages, get back what the
//! connection should do. The runner owns the sockets, timers, and retries.

use std::time::Duration;

use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{GatewayMessage, OpCode, ResumePayload};

/// Connection state of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardState {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Connected,
    /// The gateway discarded the session; a fresh identify follows
    Invalidated,
    /// Terminal: retries exhausted or a non-recoverable close code
    Failed,
}

impl ShardState {
    /// A HELLO has been processed on the current connection
    pub fn is_handshaken(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::Connected)
    }
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Invalidated => "invalidated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How to open a session after HELLO
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Identify,
    Resume { session_id: String, sequence: u64 },
}

/// A dispatch (op 0) as the translator sees it
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub name: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

/// What the connection must do after a message
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start heartbeating, then send IDENTIFY or RESUME
    Hello {
        interval: Duration,
        handshake: Handshake,
    },
    HeartbeatAck,
    /// The gateway asked for an immediate heartbeat
    HeartbeatRequested,
    /// READY: a new session is established
    Ready(Dispatch),
    /// RESUMED: the old session continues
    Resumed { replayed: u64, dispatch: Dispatch },
    Dispatch(Dispatch),
    /// Replayed dispatch already applied
    Duplicate { sequence: u64 },
    /// Client-bound op codes carry nothing for us
    Ignored(OpCode),
}

/// Session state of one shard across connections
#[derive(Debug, Clone)]
pub struct Session {
    shard_id: u32,
    state: ShardState,
    session_id: Option<String>,
    sequence: Option<u64>,
    /// Sequence at the moment RESUME was sent
    resume_from: Option<u64>,
}

impl Session {
    #[must_use]
    pub fn new(shard_id: u32) -> Self {
        Self {
            shard_id,
            state: ShardState::Disconnected,
            session_id: None,
            sequence: None,
            resume_from: None,
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn state(&self) -> ShardState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Session id and sequence are both known
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        Some(ResumePayload {
            token: token.to_string(),
            session_id: self.session_id.clone()?,
            seq: self.sequence?,
        })
    }

    // === Connection lifecycle ===

    pub fn connecting(&mut self) {
        self.state = ShardState::Connecting;
    }

    /// Transport is up; the gateway speaks first
    pub fn transport_open(&mut self) {
        self.state = ShardState::AwaitingHello;
    }

    pub fn disconnected(&mut self) {
        if self.state != ShardState::Failed {
            self.state = ShardState::Disconnected;
        }
    }

    pub fn fail(&mut self) {
        self.state = ShardState::Failed;
    }

    /// Forget the session; the next HELLO leads to IDENTIFY
    pub fn clear(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_from = None;
    }

    // === Protocol ===

    /// Process one inbound message
    ///
    /// # Errors
    /// Errors end the connection: protocol violations, RECONNECT requests and
    /// INVALID_SESSION all surface here.
    pub fn handle(&mut self, message: GatewayMessage) -> GatewayResult<Action> {
        match message.op {
            OpCode::Hello => self.on_hello(&message),
            OpCode::HeartbeatAck => Ok(Action::HeartbeatAck),
            OpCode::Heartbeat => Ok(Action::HeartbeatRequested),
            OpCode::Reconnect => Err(GatewayError::ReconnectRequested),
            OpCode::InvalidateSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                if !resumable {
                    self.clear();
                    self.state = ShardState::Invalidated;
                }
                Err(GatewayError::SessionInvalidated { resumable })
            }
            OpCode::Dispatch => self.on_dispatch(message),
            other => Ok(Action::Ignored(other)),
        }
    }

    fn on_hello(&mut self, message: &GatewayMessage) -> GatewayResult<Action> {
        if self.state != ShardState::AwaitingHello {
            return Err(GatewayError::ProtocolViolation(format!(
                "HELLO received while {}",
                self.state
            )));
        }
        let hello = message
            .as_hello()
            .ok_or_else(|| GatewayError::ProtocolViolation("HELLO without an interval".into()))?;
        if hello.heartbeat_interval == 0 {
            return Err(GatewayError::ProtocolViolation(
                "HELLO with a zero heartbeat interval".into(),
            ));
        }

        let handshake = match (&self.session_id, self.sequence) {
            (Some(session_id), Some(sequence)) => {
                self.state = ShardState::Resuming;
                self.resume_from = Some(sequence);
                Handshake::Resume {
                    session_id: session_id.clone(),
                    sequence,
                }
            }
            _ => {
                self.state = ShardState::Identifying;
                Handshake::Identify
            }
        };

        Ok(Action::Hello {
            interval: Duration::from_millis(hello.heartbeat_interval),
            handshake,
        })
    }

    fn on_dispatch(&mut self, message: GatewayMessage) -> GatewayResult<Action> {
        if !self.state.is_handshaken() {
            return Err(GatewayError::ProtocolViolation(format!(
                "dispatch received while {}",
                self.state
            )));
        }
        let name = message
            .t
            .ok_or_else(|| GatewayError::ProtocolViolation("dispatch without a name".into()))?;

        let previous = self.sequence;
        if let Some(sequence) = message.s {
            if previous.is_some_and(|current| sequence <= current) {
                return Ok(Action::Duplicate { sequence });
            }
            self.sequence = Some(sequence);
        }

        let dispatch = Dispatch {
            name,
            sequence: message.s,
            data: message.d.unwrap_or(Value::Null),
        };

        match dispatch.name.as_str() {
            "READY" => {
                let session_id = dispatch
                    .data
                    .get("session_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::ProtocolViolation("READY without a session id".into()))?;
                self.session_id = Some(session_id.to_string());
                self.resume_from = None;
                self.state = ShardState::Connected;
                Ok(Action::Ready(dispatch))
            }
            "RESUMED" => {
                let last = previous.unwrap_or(0);
                let replayed = self
                    .resume_from
                    .take()
                    .map_or(0, |from| last.saturating_sub(from));
                self.state = ShardState::Connected;
                Ok(Action::Resumed { replayed, dispatch })
            }
            _ => Ok(Action::Dispatch(dispatch)),
        }
    }
}
