//! Authoritative fishing server.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Run with `cargo run -p reelsync-server -- --port 7878`.

mod authority;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use reelsync_config::{CliArgs, Config, default_config_dir};
use reelsync_core::Scoreboard;
use reelsync_net::{FrameConfig, GameServer, ServerConfig};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::authority::AuthorityLoop;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    config.validate()?;

    let log_dir = config_dir.join("logs");
    reelsync_log::init_logging(
        Some(&log_dir),
        cfg!(debug_assertions) && config.debug.log_to_file,
        Some(&config),
    );

    let bind_addr: SocketAddr =
        format!("{}:{}", config.network.bind_address, config.network.port).parse()?;
    let (server, mut events) = GameServer::new(ServerConfig {
        bind_addr,
        max_connections: config.network.max_players as usize,
        frame: FrameConfig::with_max_payload(config.network.max_frame_bytes),
    });
    let server = Arc::new(server);
    let accept = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    let scoreboard = Arc::new(Scoreboard::new());
    let mut authority = AuthorityLoop::new(&config, scoreboard.clone())?;
    info!(
        tick_rate = config.network.tick_rate,
        policy = ?config.fishing.reel_timeout,
        "authority ready"
    );

    let mut interval = tokio::time::interval(authority.tick_duration());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = events.recv() => authority.on_event(event),
            now = interval.tick() => {
                authority.tick(now.duration_since(last_tick));
                last_tick = now;
            }
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }

        for (id, payload) in authority.outgoing() {
            if server.send(id, payload).await.is_err() {
                tracing::debug!(?id, "connection gone before delivery");
            }
        }
    }

    server.shutdown();
    accept.await??;

    info!(
        ticks = authority.total_ticks(),
        simulated = ?authority.host().now(),
        participants = authority.participants(),
        "server stopped"
    );
    for (player, score) in scoreboard.standings() {
        info!(%player, score, "final standing");
    }
    Ok(())
}
