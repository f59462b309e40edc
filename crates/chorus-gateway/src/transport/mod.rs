//! Transport abstraction
//!
//! A shard only needs something that yields frames and accepts frames. The WebSocket
//! implementation lives in [`ws`]; tests plug in an in-memory one.

mod ws;

pub use ws::WsConnector;

use async_trait::async_trait;

/// One transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

impl Frame {
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close {
            code,
            reason: reason.into(),
        }
    }
}

/// Transport-level failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;
}

/// Inbound half of a connection
///
/// `Sync` because the shard borrows its connection across awaits.
#[async_trait]
pub trait FrameStream: Send + Sync {
    /// Next frame; `None` once the connection is gone
    async fn receive_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

pub type BoxedSink = Box<dyn FrameSink>;
pub type BoxedStream = Box<dyn FrameStream>;

/// Opens connections to the gateway
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<(BoxedSink, BoxedStream), TransportError>;
}
