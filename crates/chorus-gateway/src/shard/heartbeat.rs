//! Heartbeat monitor
//!
//! The first heartbeat goes out one interval after HELLO, then one per interval. If the
//! previous heartbeat is still unacknowledged when the next one is due, the connection
//! is considered dead and the read loop is told to reconnect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::runner::Outbound;
use crate::error::GatewayError;
use crate::protocol::GatewayMessage;

#[derive(Debug, Default)]
struct HeartbeatState {
    sequence: Option<u64>,
    sent: u64,
    acked: u64,
    awaiting_ack: bool,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
}

/// Outcome of a due heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat carrying this sequence
    Send(Option<u64>),
    /// The previous heartbeat was never acknowledged
    Missed,
}

/// Heartbeat bookkeeping shared by the read loop and the heartbeat task
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMonitor {
    state: Arc<Mutex<HeartbeatState>>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest sequence seen, sent with every heartbeat
    pub fn set_sequence(&self, sequence: Option<u64>) {
        self.state.lock().sequence = sequence;
    }

    pub fn sequence(&self) -> Option<u64> {
        self.state.lock().sequence
    }

    /// Called when a heartbeat is due
    pub fn beat(&self, now: Instant) -> Beat {
        let mut state = self.state.lock();
        if state.awaiting_ack {
            return Beat::Missed;
        }
        state.awaiting_ack = true;
        state.sent += 1;
        state.last_sent = Some(now);
        Beat::Send(state.sequence)
    }

    /// Record a HEARTBEAT_ACK, returning the round trip if a heartbeat was pending
    pub fn ack(&self, now: Instant) -> Option<Duration> {
        let mut state = self.state.lock();
        let pending = std::mem::replace(&mut state.awaiting_ack, false);
        state.acked += 1;
        state.last_ack = Some(now);
        if pending {
            state.last_sent.map(|sent| now.saturating_duration_since(sent))
        } else {
            None
        }
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        let state = self.state.lock();
        match (state.last_sent, state.last_ack) {
            (Some(sent), Some(ack)) if ack >= sent => Some(ack - sent),
            _ => None,
        }
    }

    pub fn awaiting_ack(&self) -> bool {
        self.state.lock().awaiting_ack
    }

    /// `(sent, acked)` counters
    pub fn counts(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.sent, state.acked)
    }
}

/// Heartbeat task for one connection
///
/// Ends when cancelled, when the outbound queue closes, or after reporting a missed ack.
pub(crate) async fn run(
    shard_id: u32,
    period: Duration,
    monitor: HeartbeatMonitor,
    outbound: mpsc::Sender<Outbound>,
    faults: mpsc::Sender<GatewayError>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match monitor.beat(Instant::now()) {
            Beat::Send(sequence) => {
                tracing::trace!(shard_id, seq = ?sequence, "Sending heartbeat");
                let message = Outbound::Message(GatewayMessage::heartbeat(sequence));
                if outbound.send(message).await.is_err() {
                    break;
                }
            }
            Beat::Missed => {
                tracing::warn!(shard_id, "Heartbeat not acknowledged, connection zombied");
                let _ = faults.send(GatewayError::HeartbeatTimeout).await;
                break;
            }
        }
    }
}
