//! Witch Pop Server
//!
//! Hosts two-player Witch Pop rooms over WebSocket.
//! Configuration comes from `WITCH_*` environment variables, log filtering
//! from `RUST_LOG`.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use witch_pop::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = ServerConfig::from_env().context("invalid configuration")?;

    info!("Witch Pop Server v{}", VERSION);
    info!("Win score: {}", config.room.win_score);
    info!("Countdown: {} ms", config.room.countdown.as_millis());
    info!("Inactivity timeout: {} s", config.room.inactivity_timeout.as_secs());
    info!(
        "Inactivity policy: {:?}, disconnect policy: {:?}",
        config.room.inactivity_policy, config.room.disconnect_policy
    );

    let server = GameServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
