//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// reelsync command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "reelsync", about = "Authoritative 1v1 fishing sync")]
pub struct CliArgs {
    /// Address the server binds to.
    #[arg(long)]
    pub bind: Option<String>,

    /// Address the bot connects to.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Authority tick rate in Hz.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Fixed RNG seed for bite delays, tap counts and scores.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.bind {
            self.network.bind_address = addr.clone();
        }
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(rate) = args.tick_rate {
            self.network.tick_rate = rate;
        }
        if let Some(seed) = args.seed {
            self.fishing.seed = Some(seed);
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(9999),
            seed: Some(3),
            server: Some("192.168.1.1".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.port, 9999);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.fishing.seed, Some(3));
        // Non-overridden fields retain defaults
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.network.tick_rate, 60);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["reelsync", "--port", "7000", "--log-level", "debug"]);
        assert_eq!(args.port, Some(7000));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.config.is_none());
    }
}
