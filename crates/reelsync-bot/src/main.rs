//! Headless bot that joins a reelsync server and fishes on its own.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Run with `cargo run -p reelsync-bot -- --server 127.0.0.1`.

mod autoplay;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reelsync_config::{CliArgs, Config, default_config_dir};
use reelsync_core::{Delivery, FishingReplica, Scoreboard};
use reelsync_net::{FrameConfig, GameClient, deserialize_message, serialize_message};
use tracing::info;

use crate::autoplay::{AutoplayConfig, Autoplayer, BotPresentation};

/// How often the bot decides on its next action.
const THINK_INTERVAL: Duration = Duration::from_millis(100);

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

    let log_dir = config_dir.join("logs");
    reelsync_log::init_logging(
        Some(&log_dir),
        cfg!(debug_assertions) && config.debug.log_to_file,
        Some(&config),
    );

    let addr: SocketAddr =
        format!("{}:{}", config.network.server_address, config.network.port).parse()?;
    let mut client =
        GameClient::connect(addr, FrameConfig::with_max_payload(config.network.max_frame_bytes))
            .await?;
    info!(%addr, "connected");

    let prompts = Arc::new(BotPresentation::new());
    let scores = Arc::new(Scoreboard::new());
    let mut replica = FishingReplica::new(prompts.clone()).with_score_sink(scores.clone());
    let mut bot = Autoplayer::new(
        prompts,
        AutoplayConfig {
            seed: config.fishing.seed,
            ..AutoplayConfig::default()
        },
    );

    let mut think = tokio::time::interval(THINK_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            frame = client.recv() => {
                let Some(payload) = frame else {
                    info!("server closed the connection");
                    break;
                };
                let delivery: Delivery = deserialize_message(&payload)?;
                replica.receive(delivery)?;
            }
            _ = think.tick() => {
                if let Some(call) = bot.next_call(&mut replica)? {
                    tracing::debug!(rpc = call.rpc.name(), "sending");
                    client.send(serialize_message(&call)?)?;
                }
            }
            _ = &mut shutdown => {
                info!("Ctrl-C received, leaving");
                break;
            }
        }
    }

    client.disconnect();
    info!(
        catches = bot.catches(),
        corrections = replica.corrections(),
        "bot stopped"
    );
    for (player, score) in scores.standings() {
        info!(%player, score, "standing");
    }
    Ok(())
}
