//! Authoritative multiplayer fishing: replicated variables, directional
//! RPCs, the per-cast bobber state machine and the per-player controller,
//! plus the host that drives them and the replica that mirrors them.

pub mod bobber;
pub mod controller;
pub mod error;
pub mod host;
pub mod identity;
pub mod prediction;
pub mod presentation;
pub mod protocol;
pub mod replica;
pub mod replicated;
pub mod rpc;
pub mod scoreboard;
pub mod timer;

pub use bobber::{BobberSession, Phase, Resolution, TapProgress, TimerOutcome};
pub use controller::PlayerFishingController;
pub use error::{FishingError, ReplicaError};
pub use host::{FishingHost, MIN_TICK, ServerTickSchedule};
pub use identity::{PlayerId, Role};
pub use prediction::{OwnerPrediction, Reconciliation};
pub use presentation::{
    InputEvent, PresentationEvent, PresentationSink, REEL_IN_PROMPT, RecordingPresentation,
    TracingPresentation, present_observer_call, taps_prompt,
};
pub use protocol::{
    AuthorityCall, AuthorityRpc, BobberSnapshot, Delivery, Envelope, ObserverCall, ObserverRpc,
    PlayerSnapshot, Welcome,
};
pub use replica::FishingReplica;
pub use replicated::{ObserverId, ReplicatedVariable, ReplicationError, VarKey, VarUpdate};
pub use rpc::{Outbound, Outbox, Recipients, RpcChannel, RpcError};
pub use scoreboard::{ScoreSink, Scoreboard};
pub use timer::{TimerKind, TimerQueue, TimerTicket};
