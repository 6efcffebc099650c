//! Per-cast session state machine.
//!
//! ```text
//! Idle -> Falling -> Resting -> BiteArmed -> Biting -> Catching -> Resolved(Success)
//!                       ^                      |
//!                       +-- Resolved(Timeout) -+   (reel window closed)
//! ```
//!
//! The session only runs on the authority. Its position, rod tip and tap
//! counter are [`ReplicatedVariable`]s, so every replica mirrors them in
//! write order. Timers are resumed through [`BobberSession::on_timer`] and
//! are honored only when their generation still matches the session's.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use reelsync_config::ReelTimeoutPolicy;

use crate::error::FishingError;
use crate::host::AuthorityCtx;
use crate::identity::{PlayerId, Role};
use crate::protocol::{BobberSnapshot, Envelope, ObserverRpc};
use crate::replicated::{ReplicatedVariable, VarKey};
use crate::timer::{TimerKind, TimerTicket};

/// How a bite cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// The fish was landed.
    Success,
    /// The reel window closed without a catch attempt.
    Timeout,
}

/// Lifecycle phase of a cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No cast.
    Idle,
    /// In flight toward the water.
    Falling,
    /// Floating; the bite timer is running.
    Resting,
    /// The bite timer fired; the bite is being set up.
    BiteArmed,
    /// A fish is on; the reel window is open.
    Biting,
    /// Hooked; the tap minigame is running.
    Catching,
    /// Terminal for this bite cycle.
    Resolved(Resolution),
}

/// What a fired timer did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The ticket was stale and had no effect.
    Ignored,
    /// The session advanced and keeps running.
    Advanced,
    /// The reel window closed and the cast should be abandoned.
    Abandoned,
}

/// Result of one counted tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapProgress {
    /// Taps counted so far.
    pub count: u32,
    /// Taps needed.
    pub required: u32,
}

impl TapProgress {
    /// Whether the fish is landed.
    pub fn landed(&self) -> bool {
        self.count >= self.required
    }

    /// Taps still needed.
    pub fn remaining(&self) -> u32 {
        self.required.saturating_sub(self.count)
    }
}

/// One outstanding cast belonging to one player.
#[derive(Debug)]
pub struct BobberSession {
    owner: PlayerId,
    serial: u64,
    generation: u64,
    phase: Phase,
    position: ReplicatedVariable<Vec3>,
    rod_tip: ReplicatedVariable<Vec3>,
    tap_count: ReplicatedVariable<u32>,
    velocity: Vec3,
    biting: bool,
    caught: bool,
    bite_delay: Option<f32>,
    required_taps: Option<u32>,
    bite_cycles: u32,
}

impl BobberSession {
    /// Spawns a bobber at `origin` moving with `impulse` and announces it
    /// to every replica. A bobber spawned at or below the water comes to
    /// rest immediately.
    pub(crate) fn spawn(
        owner: PlayerId,
        serial: u64,
        origin: Vec3,
        rod_tip: Vec3,
        impulse: Vec3,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Self {
        let mut session = Self {
            owner,
            serial,
            generation: 0,
            phase: Phase::Falling,
            position: ReplicatedVariable::new(owner, VarKey::BobberPosition, Role::Authority, origin),
            rod_tip: ReplicatedVariable::new(owner, VarKey::RodTip, Role::Authority, rod_tip),
            tap_count: ReplicatedVariable::new(owner, VarKey::TapCount, Role::Authority, 0),
            velocity: impulse,
            biting: false,
            caught: false,
            bite_delay: None,
            required_taps: None,
            bite_cycles: 0,
        };
        ctx.outbox.push_all(Envelope::BobberSpawned(session.snapshot()));
        tracing::debug!(%owner, serial, ?origin, ?impulse, "bobber spawned");
        if origin.y <= ctx.rules.water_height {
            session.velocity = Vec3::ZERO;
            session.enter_resting(ctx);
        }
        session
    }

    /// Advances physics by `dt` seconds and follows the rod tip.
    pub(crate) fn step(
        &mut self,
        dt: f32,
        rod_tip: Vec3,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Result<(), FishingError> {
        if *self.rod_tip.read() != rod_tip {
            self.rod_tip.write(rod_tip, ctx.outbox)?;
        }
        if self.phase != Phase::Falling {
            return Ok(());
        }

        self.velocity.y -= ctx.rules.gravity * dt;
        let mut next = *self.position.read() + self.velocity * dt;
        let landed = next.y <= ctx.rules.water_height;
        if landed {
            next.y = ctx.rules.water_height;
            self.velocity = Vec3::ZERO;
        }
        self.position.write(next, ctx.outbox)?;
        if landed {
            self.enter_resting(ctx);
        }
        Ok(())
    }

    /// Freezes the bobber and starts a fresh bite timer.
    fn enter_resting(&mut self, ctx: &mut AuthorityCtx<'_>) {
        self.phase = Phase::Resting;
        self.biting = false;
        self.caught = false;
        let delay = ctx.draw_bite_delay();
        self.bite_delay = Some(delay);
        self.bite_cycles += 1;
        let due = ctx.after_secs(delay);
        self.schedule(TimerKind::Bite, due, ctx);
        tracing::debug!(owner = %self.owner, delay, cycle = self.bite_cycles, "bobber resting");
    }

    fn schedule(&mut self, kind: TimerKind, due: std::time::Duration, ctx: &mut AuthorityCtx<'_>) {
        self.generation += 1;
        ctx.timers.schedule(
            due,
            TimerTicket {
                owner: self.owner,
                serial: self.serial,
                generation: self.generation,
                kind,
            },
        );
    }

    fn is_current(&self, ticket: &TimerTicket) -> bool {
        ticket.owner == self.owner
            && ticket.serial == self.serial
            && ticket.generation == self.generation
    }

    /// Resumes after a timer. Stale tickets are ignored.
    pub(crate) fn on_timer(
        &mut self,
        ticket: TimerTicket,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Result<TimerOutcome, FishingError> {
        if !self.is_current(&ticket) {
            tracing::trace!(owner = %self.owner, ?ticket, "stale timer ignored");
            return Ok(TimerOutcome::Ignored);
        }
        match (ticket.kind, self.phase) {
            (TimerKind::Bite, Phase::Resting) => {
                self.phase = Phase::BiteArmed;
                let mut sunk = *self.position.read();
                sunk.y = ctx.rules.water_height - ctx.rules.bite_sink_depth;
                self.position.write(sunk, ctx.outbox)?;
                self.biting = true;
                self.phase = Phase::Biting;
                ctx.rpc
                    .call_observers(ctx.outbox, self.owner, ObserverRpc::ShowReelInPrompt)?;
                let due = ctx.after_secs(ctx.rules.reel_window_secs);
                self.schedule(TimerKind::ReelWindow, due, ctx);
                tracing::debug!(owner = %self.owner, "fish biting");
                Ok(TimerOutcome::Advanced)
            }
            (TimerKind::ReelWindow, Phase::Biting) if !self.caught => {
                self.phase = Phase::Resolved(Resolution::Timeout);
                self.biting = false;
                self.caught = false;
                let mut surfaced = *self.position.read();
                surfaced.y = ctx.rules.water_height;
                self.position.write(surfaced, ctx.outbox)?;
                tracing::debug!(owner = %self.owner, policy = ?ctx.rules.reel_timeout, "reel window closed");
                match ctx.rules.reel_timeout {
                    ReelTimeoutPolicy::Retry => {
                        ctx.rpc
                            .call_observers(ctx.outbox, self.owner, ObserverRpc::ClearPrompt)?;
                        self.enter_resting(ctx);
                        Ok(TimerOutcome::Advanced)
                    }
                    // The controller clears the prompt as part of abandoning.
                    ReelTimeoutPolicy::Abandon => {
                        self.generation += 1;
                        Ok(TimerOutcome::Abandoned)
                    }
                }
            }
            _ => Ok(TimerOutcome::Ignored),
        }
    }

    /// Hooks the fish. Only legal while biting; otherwise a stale action.
    ///
    /// Returns the freshly drawn number of required taps.
    pub(crate) fn attempt_catch(&mut self, ctx: &mut AuthorityCtx<'_>) -> Result<u32, FishingError> {
        if self.phase != Phase::Biting || !self.biting {
            return Err(self.stale("request_catch_attempt"));
        }
        self.biting = false;
        self.caught = true;
        self.phase = Phase::Catching;
        // Cancels the pending reel window.
        self.generation += 1;
        let required = ctx.draw_required_taps();
        self.required_taps = Some(required);
        self.tap_count.write(0, ctx.outbox)?;
        ctx.rpc.call_observers(
            ctx.outbox,
            self.owner,
            ObserverRpc::StartCatchingMinigame {
                required_taps: required,
            },
        )?;
        tracing::debug!(owner = %self.owner, required, "fish hooked");
        Ok(required)
    }

    /// Counts one tap of the minigame.
    pub(crate) fn register_tap(
        &mut self,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Result<TapProgress, FishingError> {
        let Some(required) = self.required_taps.filter(|_| self.phase == Phase::Catching) else {
            return Err(self.stale("tap"));
        };
        let count = *self.tap_count.read() + 1;
        self.tap_count.write(count, ctx.outbox)?;
        let progress = TapProgress { count, required };
        if progress.landed() {
            self.phase = Phase::Resolved(Resolution::Success);
            self.generation += 1;
        }
        Ok(progress)
    }

    /// Unhooks every observer, drops pending timers and announces the
    /// despawn. Consumes the session.
    pub(crate) fn teardown(mut self, ctx: &mut AuthorityCtx<'_>) -> Phase {
        self.position.clear_observers();
        self.rod_tip.clear_observers();
        self.tap_count.clear_observers();
        let purged = ctx.timers.purge(self.owner, self.serial);
        ctx.outbox
            .push_all(Envelope::BobberDespawned { owner: self.owner });
        tracing::debug!(owner = %self.owner, serial = self.serial, purged, phase = ?self.phase, "bobber torn down");
        self.phase
    }

    fn stale(&self, action: &'static str) -> FishingError {
        FishingError::StaleAction {
            player: self.owner,
            action,
            phase: self.phase,
        }
    }

    /// Replicated view for spawn messages and welcome snapshots.
    pub fn snapshot(&self) -> BobberSnapshot {
        BobberSnapshot {
            owner: self.owner,
            position: *self.position.read(),
            rod_tip: *self.rod_tip.read(),
            tap_count: *self.tap_count.read(),
        }
    }

    /// Player who cast this bobber.
    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    /// Per-player serial of this cast.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bumped whenever a pending timer becomes obsolete.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A fish is on and the reel window is open.
    pub fn is_biting(&self) -> bool {
        self.biting
    }

    /// The fish was hooked by a catch attempt.
    pub fn is_caught(&self) -> bool {
        self.caught
    }

    /// Bite delay drawn for the current cycle.
    pub fn bite_delay(&self) -> Option<f32> {
        self.bite_delay
    }

    /// Taps required in the current minigame.
    pub fn required_taps(&self) -> Option<u32> {
        self.required_taps
    }

    /// Number of resting cycles started so far.
    pub fn bite_cycles(&self) -> u32 {
        self.bite_cycles
    }

    /// Current bobber position.
    pub fn position(&self) -> Vec3 {
        *self.position.read()
    }

    /// Current velocity.
    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Taps counted so far.
    pub fn tap_count(&self) -> u32 {
        *self.tap_count.read()
    }

    /// Subscribes to the authority copy of the tap counter.
    pub(crate) fn tap_count_mut(&mut self) -> &mut ReplicatedVariable<u32> {
        &mut self.tap_count
    }
}
