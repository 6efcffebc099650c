//! Per-player fishing controller on the authority.
//!
//! Translates validated calls from the owning participant into session
//! transitions, owns the player's replicated avatar position, fishing flag
//! and score, and reports landed fish to the injected [`ScoreSink`].

use std::sync::Arc;

use glam::Vec3;

use crate::bobber::{BobberSession, Phase, Resolution, TapProgress, TimerOutcome};
use crate::error::FishingError;
use crate::host::AuthorityCtx;
use crate::identity::{PlayerId, Role};
use crate::protocol::{ObserverRpc, PlayerSnapshot};
use crate::replicated::{ReplicatedVariable, VarKey};
use crate::scoreboard::ScoreSink;
use crate::timer::TimerTicket;

/// Authority-side state of one connected player.
pub struct PlayerFishingController {
    player: PlayerId,
    position: ReplicatedVariable<Vec3>,
    facing: Vec3,
    is_fishing: ReplicatedVariable<bool>,
    score: ReplicatedVariable<u32>,
    cast_point_offset: Option<Vec3>,
    session: Option<BobberSession>,
    next_serial: u64,
    fish_landed: u32,
    last_resolution: Option<Resolution>,
    scores: Arc<dyn ScoreSink>,
}

impl PlayerFishingController {
    /// Controller for `player` standing at `spawn`. Without a cast point
    /// offset the player cannot cast.
    pub fn new(
        player: PlayerId,
        spawn: Vec3,
        cast_point_offset: Option<Vec3>,
        scores: Arc<dyn ScoreSink>,
    ) -> Self {
        let mut is_fishing =
            ReplicatedVariable::new(player, VarKey::IsFishing, Role::Authority, false);
        is_fishing.subscribe(move |was, now| {
            tracing::debug!(%player, was, now, "is_fishing changed");
        });
        let mut score = ReplicatedVariable::new(player, VarKey::Score, Role::Authority, 0u32);
        score.subscribe(move |was, now| {
            tracing::debug!(%player, was, now, "score changed");
        });
        Self {
            player,
            position: ReplicatedVariable::new(
                player,
                VarKey::PlayerPosition,
                Role::Authority,
                spawn,
            ),
            facing: Vec3::Z,
            is_fishing,
            score,
            cast_point_offset,
            session: None,
            next_serial: 0,
            fish_landed: 0,
            last_resolution: None,
            scores,
        }
    }

    /// Where the line starts, if the rod is linked.
    pub fn cast_point(&self) -> Option<Vec3> {
        self.cast_point_offset
            .map(|offset| *self.position.read() + offset)
    }

    /// Links the rod tip at `offset` from the avatar.
    pub fn attach_cast_point(&mut self, offset: Vec3) {
        self.cast_point_offset = Some(offset);
    }

    /// Unlinks the rod tip. A live session is torn down on the next tick.
    pub fn detach_cast_point(&mut self) {
        self.cast_point_offset = None;
    }

    fn missing_cast_point(&self) -> FishingError {
        FishingError::MissingLinkage {
            player: self.player,
            what: "cast point",
        }
    }

    fn stale(&self, action: &'static str) -> FishingError {
        FishingError::StaleAction {
            player: self.player,
            action,
            phase: self.phase(),
        }
    }

    // -----------------------------------------------------------------------
    // Calls from the owner
    // -----------------------------------------------------------------------

    /// Casts a new bobber. Rejected while one is already out.
    pub(crate) fn request_cast(&mut self, ctx: &mut AuthorityCtx<'_>) -> Result<(), FishingError> {
        if self.session.is_some() || *self.is_fishing.read() {
            return Err(FishingError::DuplicateCastRequest {
                player: self.player,
            });
        }
        let origin = self.cast_point().ok_or_else(|| self.missing_cast_point())?;

        self.is_fishing.write(true, ctx.outbox)?;
        let impulse =
            self.facing.normalize_or_zero() * ctx.rules.cast_force + Vec3::Y * ctx.rules.cast_lift;
        let serial = self.next_serial;
        self.next_serial += 1;
        let mut session = BobberSession::spawn(self.player, serial, origin, origin, impulse, ctx);
        let player = self.player;
        session.tap_count_mut().subscribe(move |_, taps| {
            tracing::trace!(%player, taps, "tap counted");
        });
        self.session = Some(session);
        tracing::info!(player = %self.player, serial, "cast");
        Ok(())
    }

    /// Forwards a catch attempt to the live session.
    pub(crate) fn request_catch_attempt(
        &mut self,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Result<u32, FishingError> {
        match self.session.as_mut() {
            Some(session) => session.attempt_catch(ctx),
            None => Err(self.stale("request_catch_attempt")),
        }
    }

    /// Counts one minigame tap and lands the fish on the last one.
    pub(crate) fn on_tap(&mut self, ctx: &mut AuthorityCtx<'_>) -> Result<TapProgress, FishingError> {
        let progress = match self.session.as_mut() {
            Some(session) => session.register_tap(ctx)?,
            None => return Err(self.stale("tap")),
        };
        if progress.landed() {
            self.finish_catching(ctx)?;
        }
        Ok(progress)
    }

    /// Tears the session down, awards the catch, shows it to every
    /// observer and only then releases the fishing flag.
    pub(crate) fn finish_catching(
        &mut self,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Result<u32, FishingError> {
        let Some(session) = self.session.take() else {
            return Err(self.stale("finish_catching"));
        };
        self.record_resolution(session.teardown(ctx));

        let delta = ctx.draw_score_delta();
        let total = self.score.read().saturating_add(delta);
        self.score.write(total, ctx.outbox)?;
        self.scores.score_increased(self.player, delta);
        self.fish_landed += 1;

        ctx.rpc.call_observers(
            ctx.outbox,
            self.player,
            ObserverRpc::ShowCaughtFish {
                duration_secs: ctx.rules.caught_display_secs,
            },
        )?;
        self.is_fishing.write(false, ctx.outbox)?;
        tracing::info!(player = %self.player, delta, total, "fish landed");
        Ok(delta)
    }

    /// Applies an owner-predicted move.
    ///
    /// Moves are refused while fishing, when non-finite, or when longer
    /// than the configured step. A refused move re-sends the canonical
    /// position so the owner reconciles back to it.
    pub(crate) fn submit_movement(
        &mut self,
        position: Vec3,
        facing: Vec3,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Result<(), FishingError> {
        let current = *self.position.read();
        let reason = if *self.is_fishing.read() {
            Some("player is fishing".to_string())
        } else if !position.is_finite() || !facing.is_finite() {
            Some("non-finite input".to_string())
        } else {
            let step = current.distance(position);
            (step > ctx.rules.max_move_step)
                .then(|| format!("step {step:.3} exceeds {}", ctx.rules.max_move_step))
        };

        if let Some(reason) = reason {
            self.position.write(current, ctx.outbox)?;
            return Err(FishingError::MoveRejected {
                player: self.player,
                reason,
            });
        }

        self.position.write(position, ctx.outbox)?;
        if facing.length_squared() > 0.0 {
            self.facing = facing;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Driven by the host
    // -----------------------------------------------------------------------

    /// Steps the live session and keeps its rod tip on the cast point.
    ///
    /// A session whose cast point disappeared is torn down and the flag
    /// released before the error is returned.
    pub(crate) fn tick(&mut self, dt: f32, ctx: &mut AuthorityCtx<'_>) -> Result<(), FishingError> {
        if self.session.is_none() {
            return Ok(());
        }
        let Some(rod_tip) = self.cast_point() else {
            self.abandon(ctx)?;
            return Err(self.missing_cast_point());
        };
        match self.session.as_mut() {
            Some(session) => session.step(dt, rod_tip, ctx),
            None => Ok(()),
        }
    }

    /// Resumes the live session after one of its timers.
    pub(crate) fn on_timer(
        &mut self,
        ticket: TimerTicket,
        ctx: &mut AuthorityCtx<'_>,
    ) -> Result<TimerOutcome, FishingError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(TimerOutcome::Ignored);
        };
        let outcome = session.on_timer(ticket, ctx)?;
        if outcome == TimerOutcome::Abandoned {
            self.abandon(ctx)?;
        }
        Ok(outcome)
    }

    /// Ends the live session without a catch and releases the flag.
    fn abandon(&mut self, ctx: &mut AuthorityCtx<'_>) -> Result<(), FishingError> {
        if let Some(session) = self.session.take() {
            self.record_resolution(session.teardown(ctx));
        }
        ctx.rpc
            .call_observers(ctx.outbox, self.player, ObserverRpc::ClearPrompt)?;
        self.is_fishing.write(false, ctx.outbox)?;
        tracing::info!(player = %self.player, "cast abandoned");
        Ok(())
    }

    fn record_resolution(&mut self, final_phase: Phase) {
        if let Phase::Resolved(resolution) = final_phase {
            self.last_resolution = Some(resolution);
        }
    }

    /// Drops the session and every observer before the player goes away.
    pub(crate) fn disconnect(mut self, ctx: &mut AuthorityCtx<'_>) {
        if let Some(session) = self.session.take() {
            session.teardown(ctx);
        }
        self.position.clear_observers();
        self.is_fishing.clear_observers();
        self.score.clear_observers();
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Replicated view for welcome and join messages.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player: self.player,
            position: *self.position.read(),
            is_fishing: *self.is_fishing.read(),
            score: *self.score.read(),
            bobber: self.session.as_ref().map(BobberSession::snapshot),
        }
    }

    /// Owning participant.
    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Avatar position.
    pub fn position(&self) -> Vec3 {
        *self.position.read()
    }

    /// Direction the avatar faces.
    pub fn facing(&self) -> Vec3 {
        self.facing
    }

    /// Whether a cast is out.
    pub fn is_fishing(&self) -> bool {
        *self.is_fishing.read()
    }

    /// Replicated score.
    pub fn score(&self) -> u32 {
        *self.score.read()
    }

    /// Fish landed since connecting.
    pub fn fish_landed(&self) -> u32 {
        self.fish_landed
    }

    /// How the most recent cast ended.
    pub fn last_resolution(&self) -> Option<Resolution> {
        self.last_resolution
    }

    /// Live session, if any.
    pub fn session(&self) -> Option<&BobberSession> {
        self.session.as_ref()
    }

    /// Phase of the live session, or [`Phase::Idle`].
    pub fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map_or(Phase::Idle, BobberSession::phase)
    }
}

impl std::fmt::Debug for PlayerFishingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerFishingController")
            .field("player", &self.player)
            .field("position", self.position.read())
            .field("is_fishing", self.is_fishing.read())
            .field("score", self.score.read())
            .field("phase", &self.phase())
            .finish()
    }
}
