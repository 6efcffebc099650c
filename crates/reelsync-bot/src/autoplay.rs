//! Scripted participant: wanders a little, casts, reels in on a bite and
//! taps until the fish is landed.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use reelsync_core::{
    AuthorityCall, FishingReplica, InputEvent, PlayerId, PresentationSink, REEL_IN_PROMPT,
    ReplicaError, TracingPresentation,
};

/// Decision ticks to wait for a cast echo before trying again.
const CAST_RETRY_TICKS: u32 = 50;

/// Logs like [`TracingPresentation`] and remembers an unanswered reel-in
/// prompt.
#[derive(Debug, Default)]
pub struct BotPresentation {
    inner: TracingPresentation,
    reel_in: AtomicBool,
}

impl BotPresentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a pending reel-in prompt.
    pub fn take_reel_in(&self) -> bool {
        self.reel_in.swap(false, Ordering::AcqRel)
    }
}

impl PresentationSink for BotPresentation {
    fn show_prompt(&self, text: &str) {
        if text == REEL_IN_PROMPT {
            self.reel_in.store(true, Ordering::Release);
        }
        self.inner.show_prompt(text);
    }

    fn clear_prompt(&self) {
        self.reel_in.store(false, Ordering::Release);
        self.inner.clear_prompt();
    }

    fn show_caught_effect(&self, owner: PlayerId, duration_secs: f32) {
        self.inner.show_caught_effect(owner, duration_secs);
    }

    fn update_line_positions(&self, owner: PlayerId, rod_tip: Vec3, bobber: Vec3) {
        self.inner.update_line_positions(owner, rod_tip, bobber);
    }

    fn clear_line(&self, owner: PlayerId) {
        self.inner.clear_line(owner);
    }
}

/// Tuning for [`Autoplayer`].
#[derive(Debug, Clone)]
pub struct AutoplayConfig {
    /// Moves taken between casts, drawn from `[min, max]`.
    pub wander_steps: (u32, u32),
    /// Length of one move.
    pub step_length: f32,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Self {
            wander_steps: (1, 4),
            step_length: 0.3,
            seed: None,
        }
    }
}

/// Picks the next call for the local participant from the mirrored state.
pub struct Autoplayer {
    prompts: Arc<BotPresentation>,
    config: AutoplayConfig,
    rng: StdRng,
    wander_left: u32,
    cast_wait: Option<u32>,
    last_score: u32,
    catches: u32,
}

impl Autoplayer {
    pub fn new(prompts: Arc<BotPresentation>, config: AutoplayConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            prompts,
            config,
            rng,
            wander_left: 0,
            cast_wait: None,
            last_score: 0,
            catches: 0,
        }
    }

    /// Fish landed so far.
    pub fn catches(&self) -> u32 {
        self.catches
    }

    /// One decision. `Ok(None)` means nothing to send this tick.
    pub fn next_call(
        &mut self,
        replica: &mut FishingReplica,
    ) -> Result<Option<AuthorityCall>, ReplicaError> {
        let Some(local) = replica.local() else {
            return Ok(None);
        };

        let score = replica.score_of(local).unwrap_or(0);
        if score > self.last_score {
            self.catches += 1;
            info!(catches = self.catches, score, "landed a fish");
        }
        self.last_score = score;

        if replica.in_minigame() {
            return replica.on_input(InputEvent::TapRegistered);
        }

        if replica.is_fishing(local).unwrap_or(false) {
            self.cast_wait = None;
            if self.prompts.take_reel_in() {
                return replica.on_input(InputEvent::CatchAttemptRequested);
            }
            return Ok(None);
        }

        if let Some(waited) = self.cast_wait.as_mut() {
            *waited += 1;
            if *waited < CAST_RETRY_TICKS {
                return Ok(None);
            }
            tracing::warn!("cast was never confirmed, retrying");
            self.cast_wait = None;
        }

        if self.wander_left > 0 {
            self.wander_left -= 1;
            let angle = self.rng.random_range(0.0..TAU);
            let facing = Vec3::new(angle.cos(), 0.0, angle.sin());
            return replica.move_local(facing * self.config.step_length, facing);
        }

        let (lo, hi) = self.config.wander_steps;
        self.wander_left = self.rng.random_range(lo..=hi.max(lo));
        self.cast_wait = Some(0);
        replica.on_input(InputEvent::CastRequested)
    }
}
