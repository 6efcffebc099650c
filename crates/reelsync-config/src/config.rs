//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration shared by the server and the bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Network/transport settings.
    pub network: NetworkConfig,
    /// Fishing rules enforced by the authority.
    pub fishing: FishingConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network/transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds to.
    pub bind_address: String,
    /// Address the bot connects to.
    pub server_address: String,
    /// Server port.
    pub port: u16,
    /// Maximum number of connected participants.
    pub max_players: u32,
    /// Authority tick rate (Hz).
    pub tick_rate: u32,
    /// Largest accepted frame payload in bytes.
    pub max_frame_bytes: u32,
}

/// What the authority does when the 5-second reel window closes without a
/// catch attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReelTimeoutPolicy {
    /// Reset the bobber to the surface and start a fresh bite cycle. The
    /// player stays in the fishing state.
    #[default]
    Retry,
    /// Tear the bobber down and release the player's fishing flag.
    Abandon,
}

/// Tuning for casts, bites and the reel-in minigame.
///
/// Ranges are half-open: `(min, max)` draws from `[min, max)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FishingConfig {
    /// Height of the water surface.
    pub water_height: f32,
    /// Depth below the surface the bobber sinks to when a fish bites.
    pub bite_sink_depth: f32,
    /// Seconds between the bobber landing and a bite.
    pub bite_delay_secs: (f32, f32),
    /// Taps needed to land the fish.
    pub required_taps: (u32, u32),
    /// Score awarded per caught fish.
    pub score_delta: (u32, u32),
    /// How long a bite waits for a catch attempt.
    pub reel_window_secs: f32,
    /// How long observers display the caught fish.
    pub caught_display_secs: f32,
    /// Forward impulse applied to a fresh cast.
    pub cast_force: f32,
    /// Upward impulse applied to a fresh cast.
    pub cast_lift: f32,
    /// Downward acceleration while the bobber falls.
    pub gravity: f32,
    /// Rod tip position relative to the player avatar.
    pub cast_point_offset: [f32; 3],
    /// Longest accepted movement step per submission.
    pub max_move_step: f32,
    /// Behavior when a bite goes unanswered.
    pub reel_timeout: ReelTimeoutPolicy,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Write a JSON log file next to the config in debug builds.
    pub log_to_file: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            server_address: "127.0.0.1".to_string(),
            port: 7878,
            max_players: 2,
            tick_rate: 60,
            max_frame_bytes: 1_048_576,
        }
    }
}

impl Default for FishingConfig {
    fn default() -> Self {
        Self {
            water_height: 0.5,
            bite_sink_depth: 0.3,
            bite_delay_secs: (3.0, 10.0),
            required_taps: (10, 50),
            score_delta: (50, 200),
            reel_window_secs: 5.0,
            caught_display_secs: 5.0,
            cast_force: 10.0,
            cast_lift: 2.0,
            gravity: 9.81,
            cast_point_offset: [0.0, 1.5, 0.5],
            max_move_step: 1.0,
            reel_timeout: ReelTimeoutPolicy::Retry,
            seed: None,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

/// Longest accepted timer-driving duration in seconds (bite delay, reel
/// window, caught display).
pub const MAX_TIMER_SECS: f32 = 3600.0;

/// Highest accepted authority tick rate in Hz.
pub const MAX_TICK_RATE: u32 = 1000;

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

fn finite(field: &'static str, value: f32) -> Result<f32, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(field, format!("must be finite, got {value}")))
    }
}

fn timer_secs(field: &'static str, value: f32, min_exclusive: bool) -> Result<(), ConfigError> {
    let value = finite(field, value)?;
    let low_ok = if min_exclusive { value > 0.0 } else { value >= 0.0 };
    if !low_ok || value > MAX_TIMER_SECS {
        return Err(invalid(
            field,
            format!("expected 0 to {MAX_TIMER_SECS} seconds, got {value}"),
        ));
    }
    Ok(())
}

impl FishingConfig {
    /// Checks that every range is non-empty, every number finite and every
    /// duration within [`MAX_TIMER_SECS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = self.bite_delay_secs;
        finite("fishing.bite_delay_secs", lo)?;
        finite("fishing.bite_delay_secs", hi)?;
        if !(lo >= 0.0 && lo < hi && hi <= MAX_TIMER_SECS) {
            return Err(invalid(
                "fishing.bite_delay_secs",
                format!("expected 0 <= min < max <= {MAX_TIMER_SECS}, got ({lo}, {hi})"),
            ));
        }
        let (lo, hi) = self.required_taps;
        if lo == 0 || lo >= hi {
            return Err(invalid(
                "fishing.required_taps",
                format!("expected 0 < min < max, got ({lo}, {hi})"),
            ));
        }
        let (lo, hi) = self.score_delta;
        if lo >= hi {
            return Err(invalid(
                "fishing.score_delta",
                format!("expected min < max, got ({lo}, {hi})"),
            ));
        }
        timer_secs("fishing.reel_window_secs", self.reel_window_secs, true)?;
        timer_secs("fishing.caught_display_secs", self.caught_display_secs, false)?;

        if finite("fishing.gravity", self.gravity)? <= 0.0 {
            return Err(invalid("fishing.gravity", "must be positive".to_string()));
        }
        if finite("fishing.max_move_step", self.max_move_step)? <= 0.0 {
            return Err(invalid("fishing.max_move_step", "must be positive".to_string()));
        }
        if finite("fishing.bite_sink_depth", self.bite_sink_depth)? < 0.0 {
            return Err(invalid(
                "fishing.bite_sink_depth",
                "must not be negative".to_string(),
            ));
        }
        finite("fishing.water_height", self.water_height)?;
        finite("fishing.cast_force", self.cast_force)?;
        finite("fishing.cast_lift", self.cast_lift)?;
        for component in self.cast_point_offset {
            finite("fishing.cast_point_offset", component)?;
        }
        Ok(())
    }
}

impl NetworkConfig {
    /// Checks the tick rate is within `1..=MAX_TICK_RATE`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TICK_RATE).contains(&self.tick_rate) {
            return Err(invalid(
                "network.tick_rate",
                format!("expected 1..={MAX_TICK_RATE} Hz, got {}", self.tick_rate),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.fishing.validate()
    }
}

/// Platform config directory for reelsync, falling back to the working
/// directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("reelsync"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
