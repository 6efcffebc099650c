//! Read-only mirror of the authority on a remote participant.
//!
//! [`FishingReplica`] consumes [`Delivery`]s in sequence, overwrites its
//! mirrored [`ReplicatedVariable`]s and runs observer calls against a
//! [`PresentationSink`]. Observers on the mirrored variables report into a
//! change queue that is flushed after every delivery, which is where line
//! redraws, tap prompts, score notifications and owner reconciliation
//! happen. The only locally speculative value is the owner's avatar
//! position, kept in an [`OwnerPrediction`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use glam::Vec3;

use crate::error::ReplicaError;
use crate::identity::{PlayerId, Role};
use crate::prediction::{OwnerPrediction, Reconciliation};
use crate::presentation::{InputEvent, PresentationSink, present_observer_call, taps_prompt};
use crate::protocol::{
    AuthorityCall, AuthorityRpc, BobberSnapshot, Delivery, Envelope, ObserverCall, ObserverRpc,
    PlayerSnapshot, Welcome,
};
use crate::replicated::{ReplicatedVariable, VarKey, VarUpdate};
use crate::rpc::RpcChannel;
use crate::scoreboard::ScoreSink;

/// Something a mirrored variable reported.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MirrorChange {
    Position { player: PlayerId, current: Vec3 },
    Fishing { player: PlayerId, now: bool },
    Score { player: PlayerId, previous: u32, current: u32 },
    Line { owner: PlayerId },
    Taps { owner: PlayerId, count: u32 },
}

struct BobberMirror {
    position: ReplicatedVariable<Vec3>,
    rod_tip: ReplicatedVariable<Vec3>,
    tap_count: ReplicatedVariable<u32>,
}

impl BobberMirror {
    fn new(snapshot: &BobberSnapshot, changes: &Sender<MirrorChange>) -> Self {
        let owner = snapshot.owner;
        let mut position =
            ReplicatedVariable::new(owner, VarKey::BobberPosition, Role::Replica, snapshot.position);
        let mut rod_tip =
            ReplicatedVariable::new(owner, VarKey::RodTip, Role::Replica, snapshot.rod_tip);
        let mut tap_count =
            ReplicatedVariable::new(owner, VarKey::TapCount, Role::Replica, snapshot.tap_count);

        let tx = changes.clone();
        position.subscribe(move |_, _| {
            let _ = tx.send(MirrorChange::Line { owner });
        });
        let tx = changes.clone();
        rod_tip.subscribe(move |_, _| {
            let _ = tx.send(MirrorChange::Line { owner });
        });
        let tx = changes.clone();
        tap_count.subscribe(move |_, count| {
            let _ = tx.send(MirrorChange::Taps {
                owner,
                count: *count,
            });
        });
        Self {
            position,
            rod_tip,
            tap_count,
        }
    }

    fn release(&mut self) {
        self.position.clear_observers();
        self.rod_tip.clear_observers();
        self.tap_count.clear_observers();
    }
}

struct PlayerMirror {
    position: ReplicatedVariable<Vec3>,
    is_fishing: ReplicatedVariable<bool>,
    score: ReplicatedVariable<u32>,
    bobber: Option<BobberMirror>,
}

impl PlayerMirror {
    fn new(snapshot: &PlayerSnapshot, changes: &Sender<MirrorChange>) -> Self {
        let player = snapshot.player;
        let mut position = ReplicatedVariable::new(
            player,
            VarKey::PlayerPosition,
            Role::Replica,
            snapshot.position,
        );
        let mut is_fishing =
            ReplicatedVariable::new(player, VarKey::IsFishing, Role::Replica, snapshot.is_fishing);
        let mut score = ReplicatedVariable::new(player, VarKey::Score, Role::Replica, snapshot.score);

        let tx = changes.clone();
        position.subscribe(move |_, current| {
            let _ = tx.send(MirrorChange::Position {
                player,
                current: *current,
            });
        });
        let tx = changes.clone();
        is_fishing.subscribe(move |_, now| {
            let _ = tx.send(MirrorChange::Fishing { player, now: *now });
        });
        let tx = changes.clone();
        score.subscribe(move |previous, current| {
            let _ = tx.send(MirrorChange::Score {
                player,
                previous: *previous,
                current: *current,
            });
        });
        Self {
            position,
            is_fishing,
            score,
            bobber: snapshot
                .bobber
                .as_ref()
                .map(|bobber| BobberMirror::new(bobber, changes)),
        }
    }

    fn release(&mut self) {
        self.position.clear_observers();
        self.is_fishing.clear_observers();
        self.score.clear_observers();
        if let Some(bobber) = self.bobber.as_mut() {
            bobber.release();
        }
    }

    fn apply(&mut self, update: &VarUpdate) -> Result<(), ReplicaError> {
        match update.key {
            VarKey::PlayerPosition => self.position.apply_remote(&update.value)?,
            VarKey::IsFishing => self.is_fishing.apply_remote(&update.value)?,
            VarKey::Score => self.score.apply_remote(&update.value)?,
            key => {
                let bobber = self
                    .bobber
                    .as_mut()
                    .ok_or(ReplicaError::NoBobber(update.owner))?;
                match key {
                    VarKey::BobberPosition => bobber.position.apply_remote(&update.value)?,
                    VarKey::RodTip => bobber.rod_tip.apply_remote(&update.value)?,
                    _ => bobber.tap_count.apply_remote(&update.value)?,
                }
            }
        }
        Ok(())
    }
}

/// A participant's mirror of the authoritative fishing state.
pub struct FishingReplica {
    local: Option<PlayerId>,
    rpc: RpcChannel,
    next_seq: u64,
    players: BTreeMap<PlayerId, PlayerMirror>,
    presentation: Arc<dyn PresentationSink>,
    scores: Option<Arc<dyn ScoreSink>>,
    changes_tx: Sender<MirrorChange>,
    changes_rx: Receiver<MirrorChange>,
    prediction: Option<OwnerPrediction>,
    minigame: Option<u32>,
    facing: Vec3,
    corrections: u64,
}

impl FishingReplica {
    /// Mirror rendering into `presentation`. The local identity arrives
    /// with the welcome message.
    pub fn new(presentation: Arc<dyn PresentationSink>) -> Self {
        let (changes_tx, changes_rx) = crossbeam_channel::unbounded();
        Self {
            local: None,
            rpc: RpcChannel::new(Role::Replica),
            next_seq: 0,
            players: BTreeMap::new(),
            presentation,
            scores: None,
            changes_tx,
            changes_rx,
            prediction: None,
            minigame: None,
            facing: Vec3::Z,
            corrections: 0,
        }
    }

    /// Also reports score changes to a local leaderboard.
    pub fn with_score_sink(mut self, scores: Arc<dyn ScoreSink>) -> Self {
        self.scores = Some(scores);
        self
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Applies the next delivery from the authority.
    ///
    /// Deliveries must arrive with consecutive sequence numbers starting at
    /// zero; anything else is rejected without being applied.
    pub fn receive(&mut self, delivery: Delivery) -> Result<(), ReplicaError> {
        if delivery.seq != self.next_seq {
            return Err(ReplicaError::OutOfOrder {
                expected: self.next_seq,
                got: delivery.seq,
            });
        }
        self.next_seq += 1;
        let result = self.apply(delivery.envelope);
        self.flush_changes();
        result
    }

    fn apply(&mut self, envelope: Envelope) -> Result<(), ReplicaError> {
        if let Envelope::Welcome(welcome) = envelope {
            self.welcome(welcome);
            return Ok(());
        }
        if self.local.is_none() {
            return Err(ReplicaError::NotWelcomed);
        }
        match envelope {
            Envelope::Welcome(_) => Ok(()),
            Envelope::PlayerJoined(snapshot) => {
                self.insert_player(&snapshot);
                Ok(())
            }
            Envelope::PlayerLeft { player } => {
                if let Some(mut mirror) = self.players.remove(&player) {
                    mirror.release();
                }
                self.presentation.clear_line(player);
                tracing::info!(%player, "player left");
                Ok(())
            }
            Envelope::BobberSpawned(snapshot) => {
                let owner = snapshot.owner;
                let mirror = BobberMirror::new(&snapshot, &self.changes_tx);
                self.player_mut(owner)?.bobber = Some(mirror);
                self.presentation
                    .update_line_positions(owner, snapshot.rod_tip, snapshot.position);
                Ok(())
            }
            Envelope::BobberDespawned { owner } => {
                if let Some(mut bobber) = self.player_mut(owner)?.bobber.take() {
                    bobber.release();
                }
                if self.local == Some(owner) {
                    self.minigame = None;
                }
                self.presentation.clear_line(owner);
                Ok(())
            }
            Envelope::Update(update) => self.player_mut(update.owner)?.apply(&update),
            Envelope::Observers(call) => {
                self.observe(&call);
                Ok(())
            }
        }
    }

    fn welcome(&mut self, welcome: Welcome) {
        for mirror in self.players.values_mut() {
            mirror.release();
        }
        self.players.clear();
        self.local = Some(welcome.you);
        self.minigame = None;
        for snapshot in &welcome.players {
            self.insert_player(snapshot);
            if snapshot.player == welcome.you {
                self.prediction = Some(OwnerPrediction::new(snapshot.position));
            }
        }
        tracing::info!(you = %welcome.you, players = welcome.players.len(), "welcomed");
    }

    fn insert_player(&mut self, snapshot: &PlayerSnapshot) {
        let mirror = PlayerMirror::new(snapshot, &self.changes_tx);
        if let Some(scores) = &self.scores {
            scores.register_player(snapshot.player);
            if snapshot.score > 0 {
                scores.score_increased(snapshot.player, snapshot.score);
            }
        }
        if let Some(bobber) = &snapshot.bobber {
            self.presentation
                .update_line_positions(bobber.owner, bobber.rod_tip, bobber.position);
        }
        if let Some(mut old) = self.players.insert(snapshot.player, mirror) {
            old.release();
        }
    }

    fn player_mut(&mut self, player: PlayerId) -> Result<&mut PlayerMirror, ReplicaError> {
        self.players
            .get_mut(&player)
            .ok_or(ReplicaError::UnknownPlayer(player))
    }

    fn observe(&mut self, call: &ObserverCall) {
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
        present_observer_call(call, self.local, self.presentation.as_ref());
    }

    fn flush_changes(&mut self) {
        while let Ok(change) = self.changes_rx.try_recv() {
            match change {
                MirrorChange::Position { player, current } => {
                    if self.local != Some(player) {
                        continue;
                    }
                    if let Some(prediction) = self.prediction.as_mut()
                        && let Reconciliation::Corrected { from, to } =
                            prediction.reconcile(current)
                    {
                        self.corrections += 1;
                        tracing::debug!(%player, ?from, ?to, "prediction corrected");
                    }
                }
                MirrorChange::Fishing { player, now } => {
                    tracing::debug!(%player, now, "is_fishing mirrored");
                }
                MirrorChange::Score {
                    player,
                    previous,
                    current,
                } => {
                    if let Some(scores) = &self.scores
                        && current > previous
                    {
                        scores.score_increased(player, current - previous);
                    }
                }
                MirrorChange::Line { owner } => {
                    if let Some(bobber) = self.players.get(&owner).and_then(|p| p.bobber.as_ref())
                    {
                        self.presentation.update_line_positions(
                            owner,
                            *bobber.rod_tip.read(),
                            *bobber.position.read(),
                        );
                    }
                }
                MirrorChange::Taps { owner, count } => {
                    if self.local != Some(owner) {
                        continue;
                    }
                    if let Some(required) = self.minigame
                        && count > 0
                        && count < required
                    {
                        self.presentation
                            .show_prompt(&taps_prompt(required - count));
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Turns a local input event into a call for the authority.
    ///
    /// Returns `Ok(None)` when the event makes no sense in the mirrored
    /// state (casting while fishing, tapping outside the minigame). The
    /// authority re-checks everything regardless.
    pub fn on_input(&mut self, event: InputEvent) -> Result<Option<AuthorityCall>, ReplicaError> {
        let local = self.local.ok_or(ReplicaError::NotWelcomed)?;
        let mirror = self.players.get(&local).ok_or(ReplicaError::UnknownPlayer(local))?;
        let rpc = match event {
            InputEvent::CastRequested if !*mirror.is_fishing.read() => AuthorityRpc::RequestCast,
            InputEvent::CatchAttemptRequested if mirror.bobber.is_some() => {
                AuthorityRpc::RequestCatchAttempt
            }
            InputEvent::TapRegistered if self.minigame.is_some() => AuthorityRpc::Tap,
            _ => return Ok(None),
        };
        Ok(Some(self.rpc.call_authority(self.local, local, rpc)?))
    }

    /// Moves the local avatar right away and builds the submission.
    /// Movement is frozen while fishing.
    pub fn move_local(
        &mut self,
        delta: Vec3,
        facing: Vec3,
    ) -> Result<Option<AuthorityCall>, ReplicaError> {
        let local = self.local.ok_or(ReplicaError::NotWelcomed)?;
        let mirror = self.players.get(&local).ok_or(ReplicaError::UnknownPlayer(local))?;
        if *mirror.is_fishing.read() {
            return Ok(None);
        }
        let Some(prediction) = self.prediction.as_mut() else {
            return Err(ReplicaError::NotWelcomed);
        };
        let position = prediction.apply_local(delta);
        if facing.length_squared() > 0.0 {
            self.facing = facing;
        }
        let rpc = AuthorityRpc::SubmitMovement {
            position,
            facing: self.facing,
        };
        Ok(Some(self.rpc.call_authority(self.local, local, rpc)?))
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Identity assigned by the authority.
    pub fn local(&self) -> Option<PlayerId> {
        self.local
    }

    /// Known players in id order.
    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.keys().copied()
    }

    /// Displayed avatar position: predicted for the local player, mirrored
    /// for everyone else.
    pub fn position_of(&self, player: PlayerId) -> Option<Vec3> {
        if self.local == Some(player)
            && let Some(prediction) = &self.prediction
        {
            return Some(prediction.predicted());
        }
        self.players.get(&player).map(|p| *p.position.read())
    }

    /// Last authoritative position of `player`.
    pub fn authoritative_position(&self, player: PlayerId) -> Option<Vec3> {
        self.players.get(&player).map(|p| *p.position.read())
    }

    /// Mirrored fishing flag.
    pub fn is_fishing(&self, player: PlayerId) -> Option<bool> {
        self.players.get(&player).map(|p| *p.is_fishing.read())
    }

    /// Mirrored score.
    pub fn score_of(&self, player: PlayerId) -> Option<u32> {
        self.players.get(&player).map(|p| *p.score.read())
    }

    /// Mirrored bobber position of `owner`, if one is out.
    pub fn bobber_position(&self, owner: PlayerId) -> Option<Vec3> {
        self.players
            .get(&owner)?
            .bobber
            .as_ref()
            .map(|b| *b.position.read())
    }

    /// Mirrored tap counter of `owner`'s bobber.
    pub fn tap_count(&self, owner: PlayerId) -> Option<u32> {
        self.players
            .get(&owner)?
            .bobber
            .as_ref()
            .map(|b| *b.tap_count.read())
    }

    /// Taps still needed in the local minigame.
    pub fn taps_remaining(&self) -> Option<u32> {
        let required = self.minigame?;
        let count = self.local.and_then(|local| self.tap_count(local))?;
        Some(required.saturating_sub(count))
    }

    /// Whether the local minigame is running.
    pub fn in_minigame(&self) -> bool {
        self.minigame.is_some()
    }

    /// Sequence number expected next.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// How often the local prediction was corrected.
    pub fn corrections(&self) -> u64 {
        self.corrections
    }
}
