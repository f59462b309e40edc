//! Client facade
//!
//! Ties configuration, the HTTP collaborator, the cache and the dispatcher together.
//! Handlers are registered on the client before [`Client::start`] spawns the shards.

use std::future::Future;
use std::sync::Arc;

use chorus_cache::{Cache, CacheConfig, MessageLookup};
use chorus_common::{AppConfig, ShardCount};
use chorus_core::{Message, Snowflake, User};
use tracing::{debug, info, warn};

use crate::coordinator::{Coordinator, GatewaySettings};
use crate::error::GatewayResult;
use crate::events::{Dispatcher, Event, EventContext, EventName, HandlerId, ListenerFlow, WaitFor};
use crate::http::GatewayHttp;
use crate::protocol::StatusUpdatePayload;
use crate::transport::Connector;

pub struct Client {
    config: AppConfig,
    http: Arc<dyn GatewayHttp>,
    connector: Arc<dyn Connector>,
    cache: Arc<Cache>,
    dispatcher: Arc<Dispatcher>,
    presence: Option<StatusUpdatePayload>,
}

impl Client {
    pub fn new(config: AppConfig, http: Arc<dyn GatewayHttp>, connector: Arc<dyn Connector>) -> Self {
        let cache = Arc::new(Cache::new(CacheConfig {
            max_messages: config.cache.max_messages,
            user_account: config.auth.user_account,
        }));
        Self {
            config,
            http,
            connector,
            cache,
            dispatcher: Arc::new(Dispatcher::new()),
            presence: None,
        }
    }

    /// Presence announced with every IDENTIFY
    #[must_use]
    pub fn with_presence(mut self, presence: StatusUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Register a handler for one event name
    pub fn on<F, Fut>(&self, name: EventName, handler: F) -> HandlerId
    where
        F: Fn(EventContext, Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ListenerFlow>> + Send + 'static,
    {
        self.dispatcher.register(name, handler)
    }

    pub fn wait_for<P>(&self, name: EventName, predicate: P) -> WaitFor
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.dispatcher.wait_for(name, predicate)
    }

    /// Gateway URL and shard count to run
    ///
    /// A configured URL with a fixed shard count needs no HTTP round trip.
    pub async fn resolve_gateway(&self) -> GatewayResult<(String, u32)> {
        let gateway = &self.config.gateway;
        if let (Some(url), ShardCount::Fixed(shards)) = (&gateway.url, gateway.shards) {
            return Ok((url.clone(), shards));
        }

        let bot = self.http.gateway_bot().await?;
        if let Some(limit) = bot.session_start_limit {
            debug!(
                remaining = limit.remaining,
                total = limit.total,
                reset_after_ms = limit.reset_after,
                "Session start limit"
            );
            if limit.remaining < bot.shards {
                warn!(
                    remaining = limit.remaining,
                    shards = bot.shards,
                    "Not enough session starts left for every shard"
                );
            }
        }

        let url = gateway.url.clone().unwrap_or(bot.url);
        let shards = match gateway.shards {
            ShardCount::Fixed(shards) => shards,
            ShardCount::Auto => bot.shards.max(1),
        };
        Ok((url, shards))
    }

    /// Resolve the gateway and start every shard
    pub async fn start(&self) -> GatewayResult<Coordinator> {
        let (url, shard_count) = self.resolve_gateway().await?;
        let gateway = &self.config.gateway;

        info!(
            app = %self.config.app.name,
            url = %url,
            shard_count,
            user_account = self.config.auth.user_account,
            "Starting gateway client"
        );

        let settings = GatewaySettings {
            url,
            shard_count,
            token: self.config.auth.token.clone(),
            version: gateway.version,
            compression: gateway.compression,
            large_threshold: gateway.large_threshold,
            identify_interval: gateway.identify_interval,
            backoff: gateway.backoff,
            presence: self.presence.clone(),
        };

        Ok(Coordinator::start(
            settings,
            Arc::clone(&self.connector),
            Arc::clone(&self.cache),
            Arc::clone(&self.dispatcher),
        ))
    }

    /// A message from the cache, or fetched and cached
    pub async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> GatewayResult<Message> {
        if let MessageLookup::Cached(message) = self.cache.find_message(channel_id, message_id) {
            return Ok(message);
        }
        let (message, author) = self.http.fetch_message(channel_id, message_id).await?;
        self.cache.record_message(message.clone(), Some(author));
        Ok(message)
    }

    /// A user from the cache, or fetched and cached
    pub async fn get_user(&self, user_id: Snowflake) -> GatewayResult<User> {
        if let Some(user) = self.cache.find_user(user_id) {
            return Ok(user);
        }
        let user = self.http.fetch_user(user_id).await?;
        Ok(self.cache.upsert_user(user).new)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("app", &self.config.app.name)
            .field("user_account", &self.config.auth.user_account)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::http::{GatewayBot, HttpError};
    use crate::transport::WsConnector;

    #[derive(Default)]
    struct FakeHttp {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GatewayHttp for FakeHttp {
        async fn gateway_bot(&self) -> Result<GatewayBot, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GatewayBot {
                url: "wss://gateway.example.com".to_string(),
                shards: 3,
                session_start_limit: None,
            })
        }

        async fn fetch_user(&self, user_id: Snowflake) -> Result<User, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(User::new(user_id, "fetched", "0001"))
        }

        async fn fetch_message(
            &self,
            channel_id: Snowflake,
            message_id: Snowflake,
        ) -> Result<(Message, User), HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let author = User::new(Snowflake::new(2), "corro", "0002");
            Ok((Message::new(message_id, channel_id, author.id, "remote"), author))
        }
    }

    fn client(vars: &[(&str, &str)]) -> (Client, Arc<FakeHttp>) {
        let mut env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        env.insert("CHORUS_TOKEN".to_string(), "token".to_string());
        let config = AppConfig::from_lookup(|key| env.get(key).cloned()).unwrap();

        let http = Arc::new(FakeHttp::default());
        let client = Client::new(config, Arc::clone(&http) as Arc<dyn GatewayHttp>, Arc::new(WsConnector));
        (client, http)
    }

    #[tokio::test]
    async fn test_configured_url_skips_http() {
        let (client, http) = client(&[
            ("CHORUS_GATEWAY_URL", "wss://local"),
            ("CHORUS_SHARDS", "2"),
        ]);
        let (url, shards) = client.resolve_gateway().await.unwrap();
        assert_eq!(url, "wss://local");
        assert_eq!(shards, 2);
        assert_eq!(http.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_shards_come_from_http() {
        let (client, http) = client(&[("CHORUS_SHARDS", "auto")]);
        let (url, shards) = client.resolve_gateway().await.unwrap();
        assert_eq!(url, "wss://gateway.example.com");
        assert_eq!(shards, 3);
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_message_caches_fetched_message() {
        let (client, http) = client(&[]);
        let channel = Snowflake::new(11);
        let id = Snowflake::new(30);

        let first = client.get_message(channel, id).await.unwrap();
        let second = client.get_message(channel, id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.content, "remote");
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
        assert!(client.cache().find_user(Snowflake::new(2)).is_some());
    }

    #[tokio::test]
    async fn test_get_user_prefers_cache() {
        let (client, http) = client(&[]);
        client
            .cache()
            .set_current_user(User::new(Snowflake::new(1), "ferris", "0001"));

        let me = client.get_user(Snowflake::new(1)).await.unwrap();
        assert_eq!(me.username, "ferris");
        assert_eq!(http.calls.load(Ordering::SeqCst), 0);

        let other = client.get_user(Snowflake::new(9)).await.unwrap();
        assert_eq!(other.username, "fetched");
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    }
}
