//! Messages exchanged between the authority and its replicas.
//!
//! Replicas send [`AuthorityCall`] frames; the authority sends [`Delivery`]
//! frames. All types are serde-friendly and travel through the versioned
//! postcard codec of the transport.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::identity::PlayerId;
use crate::replicated::VarUpdate;

// ---------------------------------------------------------------------------
// Replica -> authority
// ---------------------------------------------------------------------------

/// Remote procedure executed on the authority on behalf of its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuthorityRpc {
    /// Throw a bobber from the player's cast point.
    RequestCast,
    /// Try to hook the fish that is currently biting.
    RequestCatchAttempt,
    /// One tap of the reel-in minigame.
    Tap,
    /// Owner-predicted movement result.
    SubmitMovement {
        /// Position the owner moved to.
        position: Vec3,
        /// Direction the avatar is facing.
        facing: Vec3,
    },
}

impl AuthorityRpc {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestCast => "request_cast",
            Self::RequestCatchAttempt => "request_catch_attempt",
            Self::Tap => "tap",
            Self::SubmitMovement { .. } => "submit_movement",
        }
    }
}

/// A [`AuthorityRpc`] together with the owner the sender claims to be.
///
/// The claim is checked against the transport sender and never trusted
/// on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityCall {
    /// Owner the caller claims to act for.
    pub player: PlayerId,
    /// The call itself.
    pub rpc: AuthorityRpc,
}

// ---------------------------------------------------------------------------
// Authority -> replicas
// ---------------------------------------------------------------------------

/// Remote procedure executed on every replica, the authority's own
/// included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObserverRpc {
    /// A fish is biting; the owner should try to reel in.
    ShowReelInPrompt,
    /// The catch attempt hooked the fish; tap `required_taps` times.
    StartCatchingMinigame {
        /// Taps needed to land the fish.
        required_taps: u32,
    },
    /// The fish was landed.
    ShowCaughtFish {
        /// How long the effect stays on screen.
        duration_secs: f32,
    },
    /// Any prompt for this owner is obsolete.
    ClearPrompt,
}

/// An [`ObserverRpc`] addressed to one owner's instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverCall {
    /// Player whose controller the call targets.
    pub owner: PlayerId,
    /// The call itself.
    pub rpc: ObserverRpc,
}

/// Replicated view of one live bobber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BobberSnapshot {
    /// Player who cast it.
    pub owner: PlayerId,
    /// Current bobber position.
    pub position: Vec3,
    /// Where the line starts.
    pub rod_tip: Vec3,
    /// Taps counted so far.
    pub tap_count: u32,
}

/// Replicated view of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Player identity.
    pub player: PlayerId,
    /// Avatar position.
    pub position: Vec3,
    /// Whether the player has a cast out.
    pub is_fishing: bool,
    /// Accumulated score.
    pub score: u32,
    /// Live bobber, if any.
    pub bobber: Option<BobberSnapshot>,
}

/// Everything a freshly connected replica needs before the first update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    /// Identity assigned to the receiver.
    pub you: PlayerId,
    /// Every connected player, the receiver included.
    pub players: Vec<PlayerSnapshot>,
}

/// One authority-to-replica message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// First message on every connection.
    Welcome(Welcome),
    /// Another participant connected.
    PlayerJoined(PlayerSnapshot),
    /// A participant disconnected.
    PlayerLeft {
        /// Who left.
        player: PlayerId,
    },
    /// A bobber was cast.
    BobberSpawned(BobberSnapshot),
    /// A bobber was torn down.
    BobberDespawned {
        /// Owner of the removed bobber.
        owner: PlayerId,
    },
    /// A replicated variable changed.
    Update(VarUpdate),
    /// An observer RPC.
    Observers(ObserverCall),
}

impl Envelope {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::PlayerJoined(_) => "player_joined",
            Self::PlayerLeft { .. } => "player_left",
            Self::BobberSpawned(_) => "bobber_spawned",
            Self::BobberDespawned { .. } => "bobber_despawned",
            Self::Update(_) => "update",
            Self::Observers(_) => "observers",
        }
    }
}

/// An [`Envelope`] stamped with its per-replica sequence number.
///
/// Sequence numbers start at 0 for each connection and grow by one per
/// delivery, so a replica can detect a gap or reordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Position of this delivery on its connection.
    pub seq: u64,
    /// Payload.
    pub envelope: Envelope,
}
