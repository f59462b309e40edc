//! # chorus-gateway
//!
//! Sharded client for a Discord-style real-time gateway: frame codec, shard sessions
//! with heartbeating and resume, dispatch translation into a shared cache, and typed
//! event delivery.

pub mod client;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod http;
pub mod protocol;
pub mod shard;
pub mod transport;

pub use client::Client;
pub use coordinator::{Coordinator, GatewaySettings, ShardCommand, ShardHandle};
pub use error::{GatewayError, GatewayResult, Recovery};
pub use events::{Dispatcher, Event, EventContext, EventName, HandlerId, ListenerFlow};

use std::sync::Arc;

use chorus_common::{AppConfig, AppError, AppResult};
use tracing::{info, warn};

use crate::http::{HttpError, RestClient};
use crate::transport::WsConnector;

/// Run the gateway client until Ctrl-C or until every shard stopped
pub async fn run(config: AppConfig) -> AppResult<()> {
    let http = RestClient::new(&config.http, &config.auth).map_err(AppError::internal)?;
    let client = Client::new(config, Arc::new(http), Arc::new(WsConnector));

    for name in EventName::LIFECYCLE {
        client.on(name, |ctx, event| async move {
            match &*event {
                Event::Disconnect { reason, will_resume, .. } => {
                    warn!(shard_id = ctx.shard_id, reason = %reason, will_resume, "Shard disconnected");
                }
                Event::ShardFailed { reason, .. } => {
                    warn!(shard_id = ctx.shard_id, reason = %reason, "Shard gave up");
                }
                other => info!(shard_id = ctx.shard_id, event = %other.name(), "Shard lifecycle"),
            }
            anyhow::Ok(ListenerFlow::Continue)
        });
    }

    let mut coordinator = client.start().await.map_err(|e| match e {
        GatewayError::Http(HttpError::Unauthorized) => AppError::Unauthorized(e.to_string()),
        GatewayError::Http(_) => AppError::Http(e.to_string()),
        other => AppError::gateway(other),
    })?;

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            true
        }
        () = coordinator.wait() => false,
    };

    if interrupted {
        info!("Shutdown requested");
        coordinator.shutdown().await;
    } else {
        warn!("Every shard stopped");
    }

    let stats = client.cache().stats();
    info!(
        guilds = stats.guilds,
        users = stats.users,
        messages = stats.messages,
        "Gateway client stopped"
    );
    Ok(())
}
