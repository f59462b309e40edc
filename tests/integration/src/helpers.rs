//! Test helpers for integration tests
//!
//! An in-memory gateway: shards connect through [`MockConnector`], and the test plays
//! the server side of every connection through a [`ServerConn`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorus_cache::{Cache, CacheConfig};
use chorus_common::{BackoffConfig, Compression};
use chorus_gateway::protocol::{GatewayMessage, HelloPayload, OpCode};
use chorus_gateway::transport::{
    BoxedSink, BoxedStream, Connector, Frame, FrameSink, FrameStream, TransportError,
};
use chorus_gateway::{Coordinator, Dispatcher, Event, EventName, GatewaySettings, ListenerFlow};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound for any single wait; far beyond every gateway timer
pub const WAIT_LIMIT: Duration = Duration::from_secs(300);

/// Events the harness records for assertions
pub const RECORDED: [EventName; 10] = [
    EventName::Connect,
    EventName::Ready,
    EventName::ShardsReady,
    EventName::Resumed,
    EventName::Disconnect,
    EventName::ShardFailed,
    EventName::GuildStreamed,
    EventName::GuildJoin,
    EventName::GuildChunk,
    EventName::MessageCreate,
];

/// Settings for a local gateway: no compression, no IDENTIFY pacing, short backoff
pub fn settings(shard_count: u32) -> GatewaySettings {
    GatewaySettings {
        url: "wss://gateway.test".to_string(),
        shard_count,
        token: "test-token".to_string(),
        version: 6,
        compression: Compression::None,
        large_threshold: 250,
        identify_interval: Duration::ZERO,
        backoff: BackoffConfig {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
            max_attempts: Some(5),
        },
        presence: None,
    }
}

// ============================================================================
// Mock transport
// ============================================================================

struct MockSink {
    tx: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::Send("server side closed".to_string()))
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn receive_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Connector handing every new connection to the paired [`MockGateway`]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerConn>,
    urls: Mutex<Vec<String>>,
    refusals: AtomicUsize,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<(BoxedSink, BoxedStream), TransportError> {
        self.urls.lock().push(url.to_string());

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(ServerConn {
                to_client,
                from_client,
            })
            .map_err(|_| TransportError::Connect("gateway is gone".to_string()))?;

        Ok((
            Box::new(MockSink { tx: client_tx }),
            Box::new(MockStream { rx: client_rx }),
        ))
    }
}

/// Server side of the in-memory gateway
pub struct MockGateway {
    connector: Arc<MockConnector>,
    connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl MockGateway {
    pub fn new() -> Self {
        let (accepted, connections) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            accepted,
            urls: Mutex::new(Vec::new()),
            refusals: AtomicUsize::new(0),
        });
        Self {
            connector,
            connections,
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector) as Arc<dyn Connector>
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse(&self, count: usize) {
        self.connector.refusals.store(count, Ordering::SeqCst);
    }

    /// URLs of every connection attempt so far
    pub fn urls(&self) -> Vec<String> {
        self.connector.urls.lock().clone()
    }

    /// Wait for the next shard connection
    pub async fn accept(&mut self) -> ServerConn {
        timeout(WAIT_LIMIT, self.connections.recv())
            .await
            .expect("no connection attempt in time")
            .expect("connector dropped")
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// One accepted connection, seen from the server
pub struct ServerConn {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerConn {
    pub fn send(&self, message: &GatewayMessage) {
        let json = message.to_json().expect("message serializes");
        // the shard may already have hung up
        let _ = self.to_client.send(Frame::Text(json));
    }

    pub fn hello(&self, interval_ms: u64) {
        self.send(&GatewayMessage::hello(&HelloPayload::with_interval(interval_ms)));
    }

    pub fn dispatch(&self, name: &str, sequence: u64, data: Value) {
        self.send(&GatewayMessage::dispatch(name, sequence, data));
    }

    pub fn heartbeat_ack(&self) {
        self.send(&GatewayMessage::heartbeat_ack());
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Frame::close(code, reason));
    }

    /// Next frame the shard sent; `None` once the shard dropped the connection
    pub async fn next_frame(&mut self) -> Option<Frame> {
        timeout(WAIT_LIMIT, self.from_client.recv())
            .await
            .expect("shard sent nothing in time")
    }

    /// Next message the shard sent; panics on a close frame
    pub async fn next_message(&mut self) -> GatewayMessage {
        match self.next_frame().await {
            Some(Frame::Text(json)) => GatewayMessage::from_json(&json).expect("valid message"),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Next message with `op`, skipping heartbeats
    pub async fn expect_op(&mut self, op: OpCode) -> GatewayMessage {
        loop {
            let message = self.next_message().await;
            if message.op == op {
                return message;
            }
            assert_eq!(message.op, OpCode::Heartbeat, "unexpected message: {message}");
        }
    }

    /// Acknowledge heartbeats in the background until the shard hangs up
    ///
    /// Resolves to the close code, or `None` if the shard dropped the connection.
    pub fn spawn_acker(mut self) -> JoinHandle<Option<u16>> {
        tokio::spawn(async move {
            while let Some(frame) = self.from_client.recv().await {
                match frame {
                    Frame::Close { code, .. } => return Some(code),
                    Frame::Text(json) => {
                        let heartbeat = GatewayMessage::from_json(&json)
                            .is_ok_and(|message| message.op == OpCode::Heartbeat);
                        if heartbeat {
                            self.heartbeat_ack();
                        }
                    }
                    _ => {}
                }
            }
            None
        })
    }

    /// Close code the shard closed with, skipping anything sent before it
    pub async fn expect_close(&mut self) -> u16 {
        loop {
            match self.next_frame().await {
                Some(Frame::Close { code, .. }) => return code,
                Some(_) => {}
                None => panic!("connection dropped without a close frame"),
            }
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Running coordinator wired to a mock gateway, recording events
pub struct Harness {
    pub gateway: MockGateway,
    pub coordinator: Coordinator,
    pub cache: Arc<Cache>,
    pub dispatcher: Arc<Dispatcher>,
    events: mpsc::UnboundedReceiver<Arc<Event>>,
}

impl Harness {
    pub fn start(settings: GatewaySettings) -> Self {
        Self::start_with(settings, MockGateway::new())
    }

    /// Start against a gateway prepared by the caller
    pub fn start_with(settings: GatewaySettings, gateway: MockGateway) -> Self {
        let cache = Arc::new(Cache::new(CacheConfig {
            max_messages: 100,
            user_account: false,
        }));
        let dispatcher = Arc::new(Dispatcher::new());

        let (tx, events) = mpsc::unbounded_channel();
        for name in RECORDED {
            let tx = tx.clone();
            dispatcher.register(name, move |_ctx, event| {
                let _ = tx.send(event);
                async { anyhow::Ok(ListenerFlow::Continue) }
            });
        }

        let coordinator = Coordinator::start(
            settings,
            gateway.connector(),
            Arc::clone(&cache),
            Arc::clone(&dispatcher),
        );

        Self {
            gateway,
            coordinator,
            cache,
            dispatcher,
            events,
        }
    }

    pub async fn next_event(&mut self) -> Arc<Event> {
        timeout(WAIT_LIMIT, self.events.recv())
            .await
            .expect("no event in time")
            .expect("dispatcher dropped")
    }

    /// Next recorded event named `name`, skipping others
    pub async fn expect_event(&mut self, name: EventName) -> Arc<Event> {
        loop {
            let event = self.next_event().await;
            if event.name() == name {
                return event;
            }
        }
    }

    /// Accept a connection, answer HELLO, and return it with the handshake message
    pub async fn handshake(&mut self) -> (ServerConn, GatewayMessage) {
        self.handshake_with(45_000).await
    }

    pub async fn handshake_with(&mut self, interval_ms: u64) -> (ServerConn, GatewayMessage) {
        let mut conn = self.gateway.accept().await;
        conn.hello(interval_ms);
        let message = conn.next_message().await;
        (conn, message)
    }
}
