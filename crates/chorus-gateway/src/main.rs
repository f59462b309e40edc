//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! cargo run -p chorus-gateway
//! ```
//!
//! Configuration is loaded from environment variables; `CHORUS_TOKEN` is required.

use chorus_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_env(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        shards = ?config.gateway.shards,
        compression = ?config.gateway.compression,
        "Configuration loaded"
    );

    if let Err(e) = chorus_gateway::run(config).await {
        error!(error = %e, code = e.error_code(), "Gateway client failed");
        std::process::exit(e.exit_code());
    }
}
