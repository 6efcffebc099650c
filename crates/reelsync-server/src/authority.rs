//! Glue between the TCP transport and the fishing host.
//!
//! Every connection becomes one participant. Frames from a connection are
//! decoded as [`AuthorityCall`]s and handed to the host with the
//! connection's player as the sender, so a client can never speak for
//! somebody else. Deliveries are encoded back into frames per recipient.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reelsync_config::Config;
use reelsync_core::{
    AuthorityCall, FishingError, FishingHost, PlayerId, ScoreSink, ServerTickSchedule,
};
use reelsync_net::{ConnectionId, ServerEvent, deserialize_message, serialize_message};

/// Transport identity to participant identity.
pub fn player_for(id: ConnectionId) -> PlayerId {
    PlayerId(id.0)
}

/// Authority state owned by the server's main task.
pub struct AuthorityLoop {
    host: FishingHost,
    connections: BTreeMap<PlayerId, ConnectionId>,
    schedule: ServerTickSchedule,
}

impl AuthorityLoop {
    /// Builds the host from `config` and reports landed fish to `scores`.
    pub fn new(config: &Config, scores: Arc<dyn ScoreSink>) -> Result<Self, FishingError> {
        Ok(Self {
            host: FishingHost::new(config.fishing.clone(), scores)?,
            connections: BTreeMap::new(),
            schedule: ServerTickSchedule::with_tick_rate(config.network.tick_rate),
        })
    }

    /// Length of one authority tick.
    pub fn tick_duration(&self) -> Duration {
        self.schedule.tick_duration()
    }

    /// Applies one transport event.
    pub fn on_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { id, peer } => {
                let player = player_for(id);
                match self.host.connect(player) {
                    Ok(()) => {
                        self.connections.insert(player, id);
                        tracing::info!(%player, %peer, "participant joined");
                    }
                    Err(e) => tracing::warn!(%player, %peer, "connect refused: {e}"),
                }
            }
            ServerEvent::Frame { id, payload } => {
                let player = player_for(id);
                if !self.connections.contains_key(&player) {
                    tracing::warn!(?id, "frame from unknown connection dropped");
                    return;
                }
                match deserialize_message::<AuthorityCall>(&payload) {
                    // The host logs rejected calls itself.
                    Ok(call) => {
                        let _ = self.host.handle_call(player, call);
                    }
                    Err(e) => tracing::warn!(%player, "undecodable frame dropped: {e}"),
                }
            }
            ServerEvent::Disconnected { id } => {
                let player = player_for(id);
                if self.connections.remove(&player).is_none() {
                    return;
                }
                match self.host.disconnect(player) {
                    Ok(()) => tracing::info!(%player, "participant left"),
                    Err(e) => tracing::warn!(%player, "disconnect failed: {e}"),
                }
            }
        }
    }

    /// Runs as many fixed ticks as `elapsed` covers. Returns the count.
    pub fn tick(&mut self, elapsed: Duration) -> u32 {
        let ticks = self.schedule.accumulate(elapsed);
        let step = self.schedule.tick_duration();
        for _ in 0..ticks {
            self.host.advance(step);
        }
        ticks
    }

    /// Encodes every pending delivery for its recipient's connection.
    pub fn outgoing(&mut self) -> Vec<(ConnectionId, Vec<u8>)> {
        let mut frames = Vec::new();
        for (player, delivery) in self.host.drain_deliveries() {
            let Some(id) = self.connections.get(&player) else {
                continue;
            };
            match serialize_message(&delivery) {
                Ok(payload) => frames.push((*id, payload)),
                Err(e) => {
                    tracing::error!(%player, seq = delivery.seq, "failed to encode delivery: {e}");
                }
            }
        }
        frames
    }

    /// The underlying host.
    pub fn host(&self) -> &FishingHost {
        &self.host
    }

    /// Connected participants.
    pub fn participants(&self) -> usize {
        self.connections.len()
    }

    /// Ticks run since startup.
    pub fn total_ticks(&self) -> u64 {
        self.schedule.total_ticks()
    }
}
