//! Score sink and an in-memory leaderboard.
//!
//! The fishing core never owns the leaderboard: a [`ScoreSink`] is handed
//! to every controller at construction and only receives notifications.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::identity::PlayerId;

/// Receives score changes from the authority.
pub trait ScoreSink: Send + Sync {
    /// A player connected and should appear with zero points.
    fn register_player(&self, _player: PlayerId) {}

    /// `player` earned `delta` points.
    fn score_increased(&self, player: PlayerId, delta: u32);
}

/// Leaderboard keeping a running total per player. Scores are not
/// persisted.
#[derive(Debug, Default)]
pub struct Scoreboard {
    scores: Mutex<BTreeMap<PlayerId, u64>>,
}

impl Scoreboard {
    /// Empty scoreboard.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_scores<R>(&self, f: impl FnOnce(&mut BTreeMap<PlayerId, u64>) -> R) -> R {
        let mut guard = self
            .scores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Total for one player, if registered.
    pub fn score_of(&self, player: PlayerId) -> Option<u64> {
        self.with_scores(|scores| scores.get(&player).copied())
    }

    /// All players, highest score first; ties ordered by id.
    pub fn standings(&self) -> Vec<(PlayerId, u64)> {
        let mut rows: Vec<_> = self.with_scores(|scores| {
            scores.iter().map(|(player, score)| (*player, *score)).collect()
        });
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        rows
    }

    /// Number of registered players.
    pub fn len(&self) -> usize {
        self.with_scores(|scores| scores.len())
    }

    /// Returns `true` when nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScoreSink for Scoreboard {
    fn register_player(&self, player: PlayerId) {
        self.with_scores(|scores| {
            scores.insert(player, 0);
        });
    }

    fn score_increased(&self, player: PlayerId, delta: u32) {
        let total = self.with_scores(|scores| {
            let entry = scores.entry(player).or_insert(0);
            *entry += u64::from(delta);
            *entry
        });
        tracing::info!(%player, delta, total, "score increased");
    }
}
