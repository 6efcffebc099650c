//! The authority: owns every controller, timer and outbound message.
//!
//! [`FishingHost`] is driven from a single logical thread. Calls from
//! replicas go through [`FishingHost::handle_call`], simulated time through
//! [`FishingHost::advance`], and everything the authority wrote or called
//! is collected with [`FishingHost::drain_deliveries`], already stamped with
//! per-replica sequence numbers in issue order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use reelsync_config::FishingConfig;

use crate::controller::PlayerFishingController;
use crate::error::FishingError;
use crate::identity::{PlayerId, Role};
use crate::presentation::{PresentationSink, present_observer_call, taps_prompt};
use crate::protocol::{AuthorityCall, AuthorityRpc, Delivery, Envelope, ObserverRpc, Welcome};
use crate::replicated::VarKey;
use crate::rpc::{Outbox, RpcChannel};
use crate::scoreboard::ScoreSink;
use crate::timer::TimerQueue;

// ---------------------------------------------------------------------------
// AuthorityCtx
// ---------------------------------------------------------------------------

/// Everything a controller or session may touch while handling one event.
pub(crate) struct AuthorityCtx<'a> {
    pub(crate) now: Duration,
    pub(crate) rules: &'a FishingConfig,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) outbox: &'a mut Outbox,
    pub(crate) timers: &'a mut TimerQueue,
    pub(crate) rpc: RpcChannel,
}

impl AuthorityCtx<'_> {
    /// Absolute time `secs` from now.
    pub(crate) fn after_secs(&self, secs: f32) -> Duration {
        let delay = Duration::try_from_secs_f32(secs.max(0.0)).unwrap_or(Duration::MAX);
        self.now.saturating_add(delay)
    }

    pub(crate) fn draw_bite_delay(&mut self) -> f32 {
        let (lo, hi) = self.rules.bite_delay_secs;
        self.rng.random_range(lo..hi)
    }

    pub(crate) fn draw_required_taps(&mut self) -> u32 {
        let (lo, hi) = self.rules.required_taps;
        self.rng.random_range(lo..hi)
    }

    pub(crate) fn draw_score_delta(&mut self) -> u32 {
        let (lo, hi) = self.rules.score_delta;
        self.rng.random_range(lo..hi)
    }
}

// ---------------------------------------------------------------------------
// FishingHost
// ---------------------------------------------------------------------------

struct HostView {
    local: Option<PlayerId>,
    sink: Arc<dyn PresentationSink>,
    minigame: Option<u32>,
}

impl HostView {
    /// Renders one outbound envelope the way a replica of `local` would:
    /// observer calls, plus the taps prompt re-derived from tap updates.
    fn present(&mut self, envelope: &Envelope) {
        match envelope {
            Envelope::Observers(call) => {
                if self.local == Some(call.owner) {
                    match call.rpc {
                        ObserverRpc::StartCatchingMinigame { required_taps } => {
                            self.minigame = Some(required_taps)
                        }
                        ObserverRpc::ShowCaughtFish { .. } | ObserverRpc::ClearPrompt => {
                            self.minigame = None
                        }
                        ObserverRpc::ShowReelInPrompt => {}
                    }
                }
                present_observer_call(call, self.local, self.sink.as_ref());
            }
            Envelope::Update(update)
                if update.key == VarKey::TapCount && self.local == Some(update.owner) =>
            {
                let Some(required) = self.minigame else {
                    return;
                };
                match postcard::from_bytes::<u32>(&update.value) {
                    Ok(count) if count > 0 && count < required => {
                        self.sink.show_prompt(&taps_prompt(required - count));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(owner = %update.owner, "undecodable tap count: {e}"),
                }
            }
            Envelope::BobberDespawned { owner } if self.local == Some(*owner) => {
                self.minigame = None;
            }
            _ => {}
        }
    }
}

/// Authoritative state of every connected player.
pub struct FishingHost {
    rules: FishingConfig,
    rpc: RpcChannel,
    now: Duration,
    rng: StdRng,
    timers: TimerQueue,
    outbox: Outbox,
    controllers: BTreeMap<PlayerId, PlayerFishingController>,
    next_seq: BTreeMap<PlayerId, u64>,
    stamped: Vec<(PlayerId, Delivery)>,
    scores: Arc<dyn ScoreSink>,
    view: Option<HostView>,
    joined: u64,
}

impl FishingHost {
    /// Host enforcing `rules`. Landed fish are reported to `scores`.
    pub fn new(rules: FishingConfig, scores: Arc<dyn ScoreSink>) -> Result<Self, FishingError> {
        rules.validate()?;
        let rng = match rules.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            rules,
            rpc: RpcChannel::new(Role::Authority),
            now: Duration::ZERO,
            rng,
            timers: TimerQueue::default(),
            outbox: Outbox::default(),
            controllers: BTreeMap::new(),
            next_seq: BTreeMap::new(),
            stamped: Vec::new(),
            scores,
            view: None,
            joined: 0,
        })
    }

    /// Executes observer calls on the authority's own view as well.
    /// `local` is the player sitting at the host, if any.
    pub fn attach_view(&mut self, local: Option<PlayerId>, sink: Arc<dyn PresentationSink>) {
        self.view = Some(HostView {
            local,
            sink,
            minigame: None,
        });
    }

    fn split(&mut self) -> (&mut BTreeMap<PlayerId, PlayerFishingController>, AuthorityCtx<'_>) {
        (
            &mut self.controllers,
            AuthorityCtx {
                now: self.now,
                rules: &self.rules,
                rng: &mut self.rng,
                outbox: &mut self.outbox,
                timers: &mut self.timers,
                rpc: self.rpc,
            },
        )
    }

    /// Adds a player, sends them the welcome snapshot and announces them to
    /// everyone else.
    pub fn connect(&mut self, player: PlayerId) -> Result<(), FishingError> {
        if self.controllers.contains_key(&player) {
            return Err(FishingError::AlreadyConnected(player));
        }
        // Traffic issued before the join belongs to the old audience.
        self.stamp_outbox();

        let slot = self.joined;
        self.joined += 1;
        let spawn = Vec3::new(-2.0 + 4.0 * (slot % 2) as f32, 1.0, 0.0);
        let controller = PlayerFishingController::new(
            player,
            spawn,
            Some(Vec3::from_array(self.rules.cast_point_offset)),
            Arc::clone(&self.scores),
        );
        let snapshot = controller.snapshot();
        self.controllers.insert(player, controller);
        self.next_seq.insert(player, 0);
        self.scores.register_player(player);

        let players = self.controllers.values().map(|c| c.snapshot()).collect();
        self.outbox
            .push_to(player, Envelope::Welcome(Welcome { you: player, players }));
        self.outbox
            .push_all_except(player, Envelope::PlayerJoined(snapshot));
        tracing::info!(%player, ?spawn, players = self.controllers.len(), "player connected");
        Ok(())
    }

    /// Removes a player after tearing down their session.
    pub fn disconnect(&mut self, player: PlayerId) -> Result<(), FishingError> {
        self.stamp_outbox();
        let controller = self
            .controllers
            .remove(&player)
            .ok_or(FishingError::UnknownPlayer(player))?;
        self.next_seq.remove(&player);
        self.stamped.retain(|(to, _)| *to != player);

        let (_, mut ctx) = self.split();
        controller.disconnect(&mut ctx);
        self.outbox.push_all(Envelope::PlayerLeft { player });
        tracing::info!(%player, players = self.controllers.len(), "player disconnected");
        Ok(())
    }

    /// Entry point for a call delivered by the transport from `sender`.
    ///
    /// Calls claiming another owner are rejected as authority violations.
    /// Stale actions are dropped silently and reported as `Ok`.
    pub fn handle_call(
        &mut self,
        sender: PlayerId,
        call: AuthorityCall,
    ) -> Result<(), FishingError> {
        let result = self
            .rpc
            .accept(sender, &call)
            .map_err(FishingError::from)
            .and_then(|()| self.dispatch(sender, call.rpc.clone()));
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_expected_race() => {
                tracing::debug!(%sender, rpc = call.rpc.name(), "{e}");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%sender, rpc = call.rpc.name(), "rejected: {e}");
                Err(e)
            }
        }
    }

    fn dispatch(&mut self, player: PlayerId, rpc: AuthorityRpc) -> Result<(), FishingError> {
        let (controllers, mut ctx) = self.split();
        let controller = controllers
            .get_mut(&player)
            .ok_or(FishingError::UnknownPlayer(player))?;
        match rpc {
            AuthorityRpc::RequestCast => controller.request_cast(&mut ctx),
            AuthorityRpc::RequestCatchAttempt => {
                controller.request_catch_attempt(&mut ctx).map(|_| ())
            }
            AuthorityRpc::Tap => controller.on_tap(&mut ctx).map(|_| ()),
            AuthorityRpc::SubmitMovement { position, facing } => {
                controller.submit_movement(position, facing, &mut ctx)
            }
        }
    }

    /// Advances simulated time by `dt`: steps every live session, then
    /// fires due timers in due order. Returns how many timers fired.
    pub fn advance(&mut self, dt: Duration) -> usize {
        self.now += dt;
        let dt_secs = dt.as_secs_f32();
        let (controllers, mut ctx) = self.split();

        for controller in controllers.values_mut() {
            if let Err(e) = controller.tick(dt_secs, &mut ctx) {
                tracing::warn!(player = %controller.player(), "tick failed: {e}");
            }
        }

        let now = ctx.now;
        let mut fired = 0;
        while let Some((due, ticket)) = ctx.timers.pop_due(now) {
            fired += 1;
            ctx.now = due;
            let Some(controller) = controllers.get_mut(&ticket.owner) else {
                continue;
            };
            if let Err(e) = controller.on_timer(ticket, &mut ctx) {
                tracing::warn!(player = %ticket.owner, kind = ?ticket.kind, "timer failed: {e}");
            }
        }
        fired
    }

    /// Stamps everything queued so far and hands it over in issue order.
    pub fn drain_deliveries(&mut self) -> Vec<(PlayerId, Delivery)> {
        self.stamp_outbox();
        std::mem::take(&mut self.stamped)
    }

    fn stamp_outbox(&mut self) {
        for outbound in self.outbox.drain() {
            if let Some(view) = self.view.as_mut() {
                view.present(&outbound.envelope);
            }
            for (player, seq) in self.next_seq.iter_mut() {
                if !outbound.to.includes(*player) {
                    continue;
                }
                self.stamped.push((
                    *player,
                    Delivery {
                        seq: *seq,
                        envelope: outbound.envelope.clone(),
                    },
                ));
                *seq += 1;
            }
        }
    }

    /// Controller of one player.
    pub fn controller(&self, player: PlayerId) -> Option<&PlayerFishingController> {
        self.controllers.get(&player)
    }

    /// Mutable controller access, for re-linking a cast point.
    pub fn controller_mut(&mut self, player: PlayerId) -> Option<&mut PlayerFishingController> {
        self.controllers.get_mut(&player)
    }

    /// Connected players in id order.
    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.controllers.keys().copied()
    }

    /// Simulated time since the host started.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Rules in force.
    pub fn rules(&self) -> &FishingConfig {
        &self.rules
    }

    /// Timers not yet fired or purged.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}

// ---------------------------------------------------------------------------
// ServerTickSchedule
// ---------------------------------------------------------------------------

/// Shortest tick [`ServerTickSchedule`] will run.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Fixed-rate tick scheduler for the authority loop.
///
/// Accumulates real elapsed time and yields discrete ticks of a fixed
/// duration, so the host always advances in equal steps.
#[derive(Debug)]
pub struct ServerTickSchedule {
    accumulator: Duration,
    tick: Duration,
    total_ticks: u64,
}

impl ServerTickSchedule {
    /// Schedule ticking `hz` times per second. Zero is treated as one and
    /// a tick never gets shorter than [`MIN_TICK`].
    pub fn with_tick_rate(hz: u32) -> Self {
        Self {
            accumulator: Duration::ZERO,
            tick: (Duration::from_secs(1) / hz.max(1)).max(MIN_TICK),
            total_ticks: 0,
        }
    }

    /// Accumulates elapsed time and returns the number of ticks to process.
    pub fn accumulate(&mut self, elapsed: Duration) -> u32 {
        self.accumulator += elapsed;
        let mut ticks = 0u32;
        while self.accumulator >= self.tick {
            self.accumulator -= self.tick;
            self.total_ticks += 1;
            ticks += 1;
        }
        ticks
    }

    /// Total ticks processed since creation.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Length of one tick.
    pub fn tick_duration(&self) -> Duration {
        self.tick
    }
}

impl Default for ServerTickSchedule {
    fn default() -> Self {
        Self::with_tick_rate(60)
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod host_tests;
