//! Configuration for the reelsync server and bot.
//!
//! Settings persist to disk as a RON file. Supports CLI overrides via clap,
//! hot-reload detection, and forward/backward compatible serialization.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, FishingConfig, MAX_TICK_RATE, MAX_TIMER_SECS, NetworkConfig,
    ReelTimeoutPolicy, default_config_dir,
};
pub use error::ConfigError;
