//! Shard connection driver
//!
//! One runner per shard. It owns the shard's [`Session`] across connections and runs
//! one connection at a time: a writer task drains the outbound queue, a heartbeat task
//! paces heartbeats, and the read loop decodes frames, feeds the session, and hands
//! dispatches to the translator. Connection failures go through [`Recovery`] to decide
//! between RESUME, a fresh IDENTIFY, or giving up.

use std::sync::Arc;
use std::time::Duration;

use chorus_cache::Cache;
use chorus_common::{BackoffConfig, Compression};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::backoff::{invalid_session_delay, Backoff};
use super::heartbeat::{self, HeartbeatMonitor};
use super::limiter::IdentifyLimiter;
use super::session::{Action, Dispatch, Handshake, Session, ShardState};
use crate::codec::FrameCodec;
use crate::coordinator::{ShardCommand, ShardHandle};
use crate::error::{GatewayError, GatewayResult, Recovery};
use crate::events::{Dispatcher, Event, EventContext, Lifecycle, ReadyTracker, Translator};
use crate::protocol::{
    GatewayMessage, IdentifyPayload, IdentifyProperties, OpCode, ResumePayload,
    StatusUpdatePayload, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use crate::transport::{BoxedSink, BoxedStream, Connector, Frame, TransportError};

/// Close code asking the gateway to keep the session for a RESUME
const RESUMABLE_CLOSURE: u16 = 4000;

/// Outbound queue depth per connection
const OUTBOUND_BUFFER: usize = 64;

/// Time allowed for the close frame and task shutdown
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Item on a connection's outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(GatewayMessage),
    /// Send a close frame and stop writing
    Close { code: u16, reason: String },
}

/// Per-shard connection settings
#[derive(Clone)]
pub struct ShardConfig {
    pub shard_id: u32,
    pub shard_count: u32,
    /// Gateway URL without query parameters
    pub url: String,
    /// Raw token, sent in IDENTIFY and RESUME
    pub token: String,
    pub version: u8,
    pub compression: Compression,
    pub large_threshold: u16,
    pub backoff: BackoffConfig,
    /// Presence sent with IDENTIFY
    pub presence: Option<StatusUpdatePayload>,
}

impl ShardConfig {
    /// URL with version, encoding and (for zlib-stream) compression parameters
    pub fn connect_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{separator}v={}&encoding=json",
            self.url, self.version
        );
        if self.compression == Compression::Stream {
            url.push_str("&compress=zlib-stream");
        }
        url
    }

    fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.token.clone(),
            properties: IdentifyProperties::default(),
            compress: self.compression == Compression::Payload,
            large_threshold: self.large_threshold,
            v: self.version,
            shard: [self.shard_id, self.shard_count],
            presence: self.presence.clone(),
        }
    }
}

impl std::fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConfig")
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

/// Collaborators every shard of a coordinator shares
#[derive(Clone)]
pub struct ShardShared {
    pub connector: Arc<dyn Connector>,
    pub limiter: Arc<IdentifyLimiter>,
    pub dispatcher: Arc<Dispatcher>,
    pub cache: Arc<Cache>,
    pub readiness: Arc<ReadyTracker>,
    pub handle: ShardHandle,
}

/// Live parts of one connection
struct Connection {
    stream: BoxedStream,
    codec: FrameCodec,
    outbound: mpsc::Sender<Outbound>,
    faults_tx: mpsc::Sender<GatewayError>,
    faults: mpsc::Receiver<GatewayError>,
    monitor: HeartbeatMonitor,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl Connection {
    async fn send(&mut self, message: GatewayMessage) -> GatewayResult<()> {
        self.outbound
            .send(Outbound::Message(message))
            .await
            .map_err(|_| TransportError::Send("writer stopped".to_string()).into())
    }
}

enum Step {
    Command(ShardCommand),
    Frame(Option<Result<Frame, TransportError>>),
}

/// Drives one shard until it fails or is cancelled
pub struct ShardRunner {
    config: ShardConfig,
    session: Session,
    backoff: Backoff,
    translator: Translator,
    shared: ShardShared,
    commands: mpsc::Receiver<ShardCommand>,
    state: watch::Sender<ShardState>,
    cancel: CancellationToken,
}

impl ShardRunner {
    pub fn new(
        config: ShardConfig,
        shared: ShardShared,
        commands: mpsc::Receiver<ShardCommand>,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<ShardState>) {
        let (state, state_rx) = watch::channel(ShardState::Disconnected);
        let translator = Translator::new(
            config.shard_id,
            Arc::clone(&shared.cache),
            Arc::clone(&shared.readiness),
        );
        let runner = Self {
            session: Session::new(config.shard_id),
            backoff: Backoff::new(config.backoff),
            translator,
            config,
            shared,
            commands,
            state,
            cancel,
        };
        (runner, state_rx)
    }

    pub fn shard_id(&self) -> u32 {
        self.config.shard_id
    }

    /// Connect, and keep reconnecting until cancelled or failed
    pub async fn run(mut self) {
        let shard_id = self.config.shard_id;
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() {
                debug!(shard_id, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = sleep(delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let error = match self.connect_once().await {
                Ok(()) => break,
                Err(e) => e,
            };

            let recovery = error.recovery();
            let code = error.close_code();
            let reason = error.reason();
            warn!(shard_id, error = %error, recovery = ?recovery, "Gateway connection ended");

            let next = match recovery {
                Recovery::Fatal => None,
                Recovery::Resume => {
                    if !self.session.can_resume() {
                        self.session.clear();
                    }
                    self.backoff.next_delay()
                }
                Recovery::ResumeNow => self.backoff.next_immediate(),
                Recovery::Reidentify => {
                    self.session.clear();
                    self.backoff.next_delay()
                }
                Recovery::InvalidatedReidentify => {
                    self.translator.lifecycle(Lifecycle::Invalidated);
                    self.backoff
                        .next_delay()
                        .map(|delay| delay.max(invalid_session_delay()))
                }
            };

            let will_resume = next.is_some() && self.session.can_resume();
            self.deliver_lifecycle(Lifecycle::Disconnected {
                code,
                reason: reason.clone(),
                will_resume,
            });

            match next {
                Some(next) => delay = next,
                None => {
                    let reason = if recovery == Recovery::Fatal {
                        reason
                    } else {
                        "reconnect attempts exhausted".to_string()
                    };
                    error!(shard_id, reason = %reason, "Shard failed");
                    self.session.fail();
                    self.publish();
                    self.deliver_lifecycle(Lifecycle::Failed { reason });
                    break;
                }
            }
        }

        self.session.disconnected();
        self.publish();
        debug!(shard_id, "Shard stopped");
    }

    fn publish(&self) {
        self.state.send_replace(self.session.state());
    }

    /// One connection attempt; `Ok` means the shard was cancelled
    async fn connect_once(&mut self) -> GatewayResult<()> {
        let shard_id = self.config.shard_id;
        let url = self.config.connect_url();

        self.session.connecting();
        self.publish();

        // take the IDENTIFY turn before the socket opens, so no heartbeat waits on it
        if !self.session.can_resume() {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = self.shared.limiter.acquire() => {}
            }
        }
        info!(shard_id, url = %url, "Connecting to gateway");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = self.shared.connector.connect(&url) => connected,
        };
        let (sink, stream) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                self.session.disconnected();
                self.publish();
                return Err(e.into());
            }
        };

        self.session.transport_open();
        self.publish();

        let cancel = self.cancel.child_token();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (faults_tx, faults) = mpsc::channel(4);

        let mut tasks = JoinSet::new();
        tasks.spawn(write_loop(
            shard_id,
            sink,
            outbound_rx,
            faults_tx.clone(),
            cancel.clone(),
        ));

        let monitor = HeartbeatMonitor::new();
        monitor.set_sequence(self.session.sequence());

        let mut conn = Connection {
            stream,
            codec: FrameCodec::new(self.config.compression),
            outbound,
            faults_tx,
            faults,
            monitor,
            tasks,
            cancel,
        };

        let result = self.read_loop(&mut conn).await;
        self.teardown(conn, &result).await;
        result
    }

    async fn read_loop(&mut self, conn: &mut Connection) -> GatewayResult<()> {
        loop {
            let connected = self.session.state() == ShardState::Connected;
            let step = tokio::select! {
                biased;
                () = conn.cancel.cancelled() => return Ok(()),
                Some(fault) = conn.faults.recv() => return Err(fault),
                Some(command) = self.commands.recv(), if connected => Step::Command(command),
                frame = conn.stream.receive_frame() => Step::Frame(frame),
            };

            match step {
                Step::Command(ShardCommand::Send(message)) => {
                    if message.op == OpCode::Presence {
                        // re-sent with the next IDENTIFY
                        if let Ok(presence) = message.payload::<StatusUpdatePayload>() {
                            self.config.presence = Some(presence);
                        }
                    }
                    conn.send(message).await?;
                }
                Step::Frame(None) => {
                    return Err(GatewayError::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection lost".to_string(),
                    });
                }
                Step::Frame(Some(Err(e))) => return Err(e.into()),
                Step::Frame(Some(Ok(frame))) => {
                    let Some(message) = conn.codec.decode(frame)? else {
                        continue;
                    };
                    trace!(shard_id = self.config.shard_id, message = %message, "Received");
                    let action = self.session.handle(message)?;
                    self.on_action(action, conn).await?;
                }
            }
        }
    }

    async fn on_action(&mut self, action: Action, conn: &mut Connection) -> GatewayResult<()> {
        let shard_id = self.config.shard_id;

        match action {
            Action::Hello {
                interval,
                handshake,
            } => {
                debug!(shard_id, interval_ms = interval.as_millis() as u64, "HELLO received");
                self.publish();
                conn.tasks.spawn(heartbeat::run(
                    shard_id,
                    interval,
                    conn.monitor.clone(),
                    conn.outbound.clone(),
                    conn.faults_tx.clone(),
                    conn.cancel.clone(),
                ));

                match handshake {
                    Handshake::Identify => {
                        info!(shard_id, shard_count = self.config.shard_count, "Identifying");
                        conn.send(GatewayMessage::identify(&self.config.identify_payload()))
                            .await?;
                    }
                    Handshake::Resume {
                        session_id,
                        sequence,
                    } => {
                        info!(shard_id, session_id = %session_id, seq = sequence, "Resuming session");
                        let resume = ResumePayload {
                            token: self.config.token.clone(),
                            session_id,
                            seq: sequence,
                        };
                        conn.send(GatewayMessage::resume(&resume)).await?;
                    }
                }
            }
            Action::HeartbeatAck => {
                if let Some(rtt) = conn.monitor.ack(Instant::now()) {
                    trace!(shard_id, latency_ms = rtt.as_millis() as u64, "Heartbeat acknowledged");
                }
            }
            Action::HeartbeatRequested => {
                conn.send(GatewayMessage::heartbeat(self.session.sequence()))
                    .await?;
            }
            Action::Ready(dispatch) => {
                self.backoff.reset();
                self.publish();
                info!(
                    shard_id,
                    session_id = self.session.session_id().unwrap_or_default(),
                    "Session established"
                );
                conn.monitor.set_sequence(self.session.sequence());
                self.apply(dispatch, conn).await?;
            }
            Action::Resumed { replayed, dispatch } => {
                self.backoff.reset();
                self.publish();
                info!(shard_id, replayed, "Session resumed");
                conn.monitor.set_sequence(self.session.sequence());
                self.deliver_lifecycle(Lifecycle::Resumed { replayed });
                self.apply(dispatch, conn).await?;
            }
            Action::Dispatch(dispatch) => {
                conn.monitor.set_sequence(self.session.sequence());
                self.apply(dispatch, conn).await?;
            }
            Action::Duplicate { sequence } => {
                debug!(shard_id, seq = sequence, "Skipping replayed dispatch");
            }
            Action::Ignored(op) => {
                trace!(shard_id, op = %op, "Ignoring op code");
            }
        }
        Ok(())
    }

    /// Translate a dispatch, send what it asks for, and deliver its events
    async fn apply(&mut self, dispatch: Dispatch, conn: &mut Connection) -> GatewayResult<()> {
        let translation = match self.translator.translate(&dispatch) {
            Ok(translation) => translation,
            Err(e) => {
                warn!(
                    shard_id = self.config.shard_id,
                    event = %dispatch.name,
                    error = %e,
                    "Skipping malformed dispatch"
                );
                return Ok(());
            }
        };

        for message in translation.outbound {
            conn.send(message).await?;
        }
        self.deliver(translation.events);
        Ok(())
    }

    fn deliver_lifecycle(&mut self, transition: Lifecycle) {
        let events = self.translator.lifecycle(transition);
        self.deliver(events);
    }

    /// Hand events to the dispatcher without waiting for their handlers
    fn deliver(&self, events: Vec<Event>) {
        for event in events {
            let ctx = EventContext {
                shard_id: self.config.shard_id,
                shard_count: self.config.shard_count,
                name: event.name(),
                cache: Arc::clone(&self.shared.cache),
                shard: self.shared.handle.clone(),
            };
            // handlers finish on their own tasks
            drop(self.shared.dispatcher.dispatch(ctx, Arc::new(event)));
        }
    }

    async fn teardown(&mut self, conn: Connection, result: &GatewayResult<()>) {
        let code = match result {
            Err(e) if matches!(e.recovery(), Recovery::Resume | Recovery::ResumeNow) => {
                RESUMABLE_CLOSURE
            }
            _ => NORMAL_CLOSURE,
        };

        let Connection {
            outbound,
            mut tasks,
            cancel,
            ..
        } = conn;

        let close = Outbound::Close {
            code,
            reason: String::new(),
        };
        let _ = timeout(CLOSE_GRACE, outbound.send(close)).await;
        drop(outbound);
        cancel.cancel();

        let drained = timeout(CLOSE_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(shard_id = self.config.shard_id, "Connection tasks did not stop in time");
            tasks.abort_all();
        }

        self.session.disconnected();
        self.publish();
    }
}

impl std::fmt::Debug for ShardRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRunner")
            .field("config", &self.config)
            .field("state", &self.session.state())
            .finish_non_exhaustive()
    }
}

/// Writer task: drains the outbound queue into the sink
///
/// Queued messages are written before a cancellation is honoured, so a queued close
/// frame still goes out.
async fn write_loop(
    shard_id: u32,
    mut sink: BoxedSink,
    mut queue: mpsc::Receiver<Outbound>,
    faults: mpsc::Sender<GatewayError>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            next = queue.recv() => next,
            () = cancel.cancelled() => None,
        };

        let frame = match next {
            Some(Outbound::Message(message)) => match FrameCodec::encode(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(shard_id, error = %e, "Dropping unencodable message");
                    continue;
                }
            },
            Some(Outbound::Close { code, reason }) => {
                if let Err(e) = sink.send_frame(Frame::close(code, reason)).await {
                    debug!(shard_id, error = %e, "Close frame not delivered");
                }
                break;
            }
            None => break,
        };

        if let Err(e) = sink.send_frame(frame).await {
            let _ = faults.send(e.into()).await;
            break;
        }
    }
}
