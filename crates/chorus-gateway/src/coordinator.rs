//! Shard coordinator
//!
//! Starts one [`ShardRunner`] per shard, shares the cache, dispatcher, readiness
//! tracker and IDENTIFY limiter between them, and routes outbound commands to the
//! shard that serves a guild.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chorus_cache::Cache;
use chorus_common::{BackoffConfig, Compression};
use chorus_core::{Activity, Snowflake, Status};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{GatewayError, GatewayResult};
use crate::events::{Dispatcher, ReadyTracker};
use crate::protocol::{GatewayMessage, RequestMembersPayload, StatusUpdatePayload};
use crate::shard::{IdentifyLimiter, ShardConfig, ShardRunner, ShardShared, ShardState};
use crate::transport::Connector;

/// Queued commands per shard
const COMMAND_BUFFER: usize = 64;

/// Command for a running shard
#[derive(Debug, Clone, PartialEq)]
pub enum ShardCommand {
    /// Send once the shard's session is established
    Send(GatewayMessage),
}

/// Cheap handle for sending through running shards
#[derive(Clone)]
pub struct ShardHandle {
    senders: Arc<Vec<mpsc::Sender<ShardCommand>>>,
    shard_count: u32,
    cancel: CancellationToken,
}

impl ShardHandle {
    fn new(senders: Vec<mpsc::Sender<ShardCommand>>, cancel: CancellationToken) -> Self {
        let shard_count = u32::try_from(senders.len()).unwrap_or(u32::MAX).max(1);
        Self {
            senders: Arc::new(senders),
            shard_count,
            cancel,
        }
    }

    /// A handle with no running shards; every send fails
    #[must_use]
    pub fn detached(shard_count: u32) -> Self {
        Self {
            senders: Arc::new(Vec::new()),
            shard_count: shard_count.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Shard serving a guild: `(guild_id >> 22) % shard_count`
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> u32 {
        ((guild_id.get() >> 22) % u64::from(self.shard_count)) as u32
    }

    /// Queue a message on one shard's connection
    pub async fn send(&self, shard_id: u32, message: GatewayMessage) -> GatewayResult<()> {
        let sender = self
            .senders
            .get(shard_id as usize)
            .ok_or(GatewayError::ShardUnavailable(shard_id))?;
        sender
            .send(ShardCommand::Send(message))
            .await
            .map_err(|_| GatewayError::ShardUnavailable(shard_id))
    }

    /// Update presence on one shard, or on every shard when `shard_id` is `None`
    pub async fn change_status(
        &self,
        shard_id: Option<u32>,
        status: Status,
        game: Option<Activity>,
        afk: bool,
    ) -> GatewayResult<()> {
        let message = GatewayMessage::presence(&StatusUpdatePayload::new(status, game, afk));
        match shard_id {
            Some(shard_id) => self.send(shard_id, message).await,
            None => {
                for shard_id in 0..self.shard_count {
                    self.send(shard_id, message.clone()).await?;
                }
                Ok(())
            }
        }
    }

    /// Ask for every member of the given guilds, on the shards serving them
    pub async fn request_members(&self, guild_ids: &[Snowflake]) -> GatewayResult<()> {
        let mut by_shard: BTreeMap<u32, Vec<Snowflake>> = BTreeMap::new();
        for guild_id in guild_ids {
            by_shard
                .entry(self.shard_for_guild(*guild_id))
                .or_default()
                .push(*guild_id);
        }

        for (shard_id, ids) in by_shard {
            for batch in ids.chunks(RequestMembersPayload::MAX_GUILDS) {
                let payload = RequestMembersPayload::all(batch.to_vec());
                self.send(shard_id, GatewayMessage::request_members(&payload))
                    .await?;
            }
        }
        Ok(())
    }

    /// Stop every shard, closing connections with a normal close
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardHandle")
            .field("shard_count", &self.shard_count)
            .field("running", &self.senders.len())
            .finish_non_exhaustive()
    }
}

/// Everything needed to start the shards of one token
#[derive(Clone)]
pub struct GatewaySettings {
    /// Gateway URL without query parameters
    pub url: String,
    pub shard_count: u32,
    pub token: String,
    pub version: u8,
    pub compression: Compression,
    pub large_threshold: u16,
    /// Minimum spacing between IDENTIFYs; zero disables pacing
    pub identify_interval: Duration,
    pub backoff: BackoffConfig,
    pub presence: Option<StatusUpdatePayload>,
}

impl GatewaySettings {
    pub fn shard_config(&self, shard_id: u32) -> ShardConfig {
        ShardConfig {
            shard_id,
            shard_count: self.shard_count,
            url: self.url.clone(),
            token: self.token.clone(),
            version: self.version,
            compression: self.compression,
            large_threshold: self.large_threshold,
            backoff: self.backoff,
            presence: self.presence.clone(),
        }
    }
}

impl std::fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("url", &self.url)
            .field("shard_count", &self.shard_count)
            .field("token", &"<redacted>")
            .field("compression", &self.compression)
            .field("identify_interval", &self.identify_interval)
            .finish_non_exhaustive()
    }
}

/// Running set of shards
pub struct Coordinator {
    handle: ShardHandle,
    states: Vec<watch::Receiver<ShardState>>,
    readiness: Arc<ReadyTracker>,
    tasks: JoinSet<()>,
}

impl Coordinator {
    /// Spawn every shard; must be called within a Tokio runtime
    pub fn start(
        settings: GatewaySettings,
        connector: Arc<dyn Connector>,
        cache: Arc<Cache>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let shard_count = settings.shard_count.max(1);
        let cancel = CancellationToken::new();
        let readiness = Arc::new(ReadyTracker::new(shard_count));
        let limiter = Arc::new(IdentifyLimiter::new(settings.identify_interval));

        let (senders, receivers): (Vec<_>, Vec<_>) = (0..shard_count)
            .map(|_| mpsc::channel(COMMAND_BUFFER))
            .unzip();
        let handle = ShardHandle::new(senders, cancel.clone());

        let shared = ShardShared {
            connector,
            limiter,
            dispatcher,
            cache,
            readiness: Arc::clone(&readiness),
            handle: handle.clone(),
        };

        let mut tasks = JoinSet::new();
        let mut states = Vec::with_capacity(receivers.len());
        for (shard_id, commands) in (0..shard_count).zip(receivers) {
            let (runner, state) = ShardRunner::new(
                settings.shard_config(shard_id),
                shared.clone(),
                commands,
                cancel.child_token(),
            );
            states.push(state);
            tasks.spawn(runner.run());
        }

        info!(
            shard_count,
            url = %settings.url,
            compression = ?settings.compression,
            "Gateway shards started"
        );

        Self {
            handle,
            states,
            readiness,
            tasks,
        }
    }

    pub fn handle(&self) -> ShardHandle {
        self.handle.clone()
    }

    pub fn shard_count(&self) -> u32 {
        self.handle.shard_count()
    }

    /// Current state of every shard, indexed by shard id
    pub fn shard_states(&self) -> Vec<ShardState> {
        self.states.iter().map(|state| *state.borrow()).collect()
    }

    /// Watch one shard's state
    pub fn watch_shard(&self, shard_id: u32) -> Option<watch::Receiver<ShardState>> {
        self.states.get(shard_id as usize).cloned()
    }

    pub fn all_ready(&self) -> bool {
        self.readiness.all_ready()
    }

    pub async fn change_status(
        &self,
        shard_id: Option<u32>,
        status: Status,
        game: Option<Activity>,
        afk: bool,
    ) -> GatewayResult<()> {
        self.handle.change_status(shard_id, status, game, afk).await
    }

    pub async fn request_members(&self, guild_ids: &[Snowflake]) -> GatewayResult<()> {
        self.handle.request_members(guild_ids).await
    }

    /// Wait until every shard has stopped (failed or shut down)
    pub async fn wait(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Shard task aborted");
            }
        }
    }

    /// Close every connection and wait for the shards to stop
    pub async fn shutdown(mut self) {
        info!(shard_count = self.shard_count(), "Shutting down gateway shards");
        self.handle.shutdown();
        self.wait().await;
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("shard_states", &self.shard_states())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn handle(shards: usize) -> (ShardHandle, Vec<mpsc::Receiver<ShardCommand>>) {
        let (senders, receivers) = (0..shards).map(|_| mpsc::channel(16)).unzip();
        (ShardHandle::new(senders, CancellationToken::new()), receivers)
    }

    fn guild_on_shard(shard: u64, count: u64, salt: u64) -> Snowflake {
        Snowflake::new(((salt * count + shard) << 22) | 7)
    }

    #[test]
    fn test_shard_for_guild() {
        let handle = ShardHandle::detached(4);
        assert_eq!(handle.shard_for_guild(Snowflake::new(0)), 0);
        assert_eq!(handle.shard_for_guild(guild_on_shard(3, 4, 10)), 3);
        assert_eq!(handle.shard_for_guild(Snowflake::new(81_384_788_765_712_384)), 2);
        assert_eq!(ShardHandle::detached(1).shard_for_guild(Snowflake::new(u64::MAX)), 0);
    }

    #[tokio::test]
    async fn test_detached_send_fails() {
        let handle = ShardHandle::detached(2);
        let err = handle
            .send(0, GatewayMessage::heartbeat(None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ShardUnavailable(0)));
    }

    #[tokio::test]
    async fn test_request_members_routes_by_shard() {
        let (handle, mut receivers) = handle(2);
        let on_zero = guild_on_shard(0, 2, 5);
        let on_one = guild_on_shard(1, 2, 5);
        handle.request_members(&[on_zero, on_one]).await.unwrap();

        for (shard, expected) in [(0, on_zero), (1, on_one)] {
            let ShardCommand::Send(message) = receivers[shard].try_recv().unwrap();
            assert_eq!(message.op, OpCode::RequestMembers);
            let payload: RequestMembersPayload = message.payload().unwrap();
            assert_eq!(payload.guild_id, vec![expected]);
        }
    }

    #[tokio::test]
    async fn test_request_members_batches() {
        let (handle, mut receivers) = handle(1);
        let ids: Vec<Snowflake> = (1..=80).map(Snowflake::new).collect();
        handle.request_members(&ids).await.unwrap();

        let ShardCommand::Send(first) = receivers[0].try_recv().unwrap();
        let ShardCommand::Send(second) = receivers[0].try_recv().unwrap();
        assert_eq!(first.payload::<RequestMembersPayload>().unwrap().guild_id.len(), 75);
        assert_eq!(second.payload::<RequestMembersPayload>().unwrap().guild_id.len(), 5);
    }

    #[tokio::test]
    async fn test_change_status_everywhere() {
        let (handle, mut receivers) = handle(3);
        handle
            .change_status(None, Status::Idle, Some(Activity::playing("chess")), false)
            .await
            .unwrap();

        for receiver in &mut receivers {
            let ShardCommand::Send(message) = receiver.try_recv().unwrap();
            let payload: StatusUpdatePayload = message.payload().unwrap();
            assert_eq!(payload.status, Status::Idle);
            assert!(payload.since.is_none());
        }
    }
}
