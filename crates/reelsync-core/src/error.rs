//! Error types for the fishing authority and its replicas.

use crate::bobber::Phase;
use crate::identity::PlayerId;
use crate::replicated::ReplicationError;
use crate::rpc::RpcError;

/// Faults raised on the authority while handling a player's session.
///
/// None of these crash the host. [`FishingError::StaleAction`] is an
/// expected race and is dropped silently; the rest are logged and the
/// offending call is discarded.
#[derive(Debug, thiserror::Error)]
pub enum FishingError {
    /// A call broke the trust direction or impersonated another owner.
    #[error("authority violation: {0}")]
    AuthorityViolation(#[from] RpcError),

    /// A replicated variable rejected a write or failed to encode it.
    #[error("replication: {0}")]
    Replication(#[from] ReplicationError),

    /// The call is valid but the session has already moved on.
    #[error("{player}: {action} ignored in phase {phase:?}")]
    StaleAction {
        /// Player the call was for.
        player: PlayerId,
        /// Name of the call.
        action: &'static str,
        /// Phase the session was in when it arrived.
        phase: Phase,
    },

    /// A cast was requested while a session is live.
    #[error("{player}: cast requested while a bobber is already out")]
    DuplicateCastRequest {
        /// Player who asked.
        player: PlayerId,
    },

    /// A session could not resolve its owner or anchor point.
    #[error("{player}: missing {what}")]
    MissingLinkage {
        /// Player the session belongs to.
        player: PlayerId,
        /// What could not be resolved.
        what: &'static str,
    },

    /// A movement submission failed validation.
    #[error("{player}: movement rejected: {reason}")]
    MoveRejected {
        /// Player who moved.
        player: PlayerId,
        /// Why it was refused.
        reason: String,
    },

    /// No controller exists for this player.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// A player id was connected twice.
    #[error("{0} is already connected")]
    AlreadyConnected(PlayerId),

    /// The fishing rules failed validation.
    #[error("config: {0}")]
    Config(#[from] reelsync_config::ConfigError),
}

impl FishingError {
    /// Expected races that are dropped without a warning.
    pub fn is_expected_race(&self) -> bool {
        matches!(self, FishingError::StaleAction { .. })
    }

    /// Calls rejected because the sender had no right to make them.
    pub fn is_authority_violation(&self) -> bool {
        matches!(
            self,
            FishingError::AuthorityViolation(_)
                | FishingError::Replication(ReplicationError::WriteFromNonAuthority { .. })
        )
    }
}

/// Faults raised on a replica while mirroring the authority.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// A delivery arrived out of sequence.
    #[error("delivery out of order: expected seq {expected}, got {got}")]
    OutOfOrder {
        /// Sequence number the replica was waiting for.
        expected: u64,
        /// Sequence number that arrived.
        got: u64,
    },

    /// State arrived before the welcome snapshot.
    #[error("no welcome received yet")]
    NotWelcomed,

    /// An update referenced a player this replica does not know.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// A bobber update arrived for a player without a live bobber.
    #[error("{0} has no bobber")]
    NoBobber(PlayerId),

    /// Applying a replicated value failed.
    #[error("replication: {0}")]
    Replication(#[from] ReplicationError),

    /// A local action could not be turned into a call.
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replicated::VarKey;

    #[test]
    fn test_race_classification() {
        let stale = FishingError::StaleAction {
            player: PlayerId(1),
            action: "request_catch_attempt",
            phase: Phase::Resting,
        };
        assert!(stale.is_expected_race());
        assert!(!stale.is_authority_violation());

        let forged = FishingError::from(RpcError::SenderMismatch {
            sender: PlayerId(2),
            claimed: PlayerId(1),
        });
        assert!(forged.is_authority_violation());

        let replica_write = FishingError::from(ReplicationError::WriteFromNonAuthority {
            owner: PlayerId(1),
            key: VarKey::Score,
        });
        assert!(replica_write.is_authority_violation());
    }

    #[test]
    fn test_messages_name_the_player() {
        let err = FishingError::DuplicateCastRequest {
            player: PlayerId(4),
        };
        assert_eq!(
            err.to_string(),
            "player#4: cast requested while a bobber is already out"
        );
        let err = ReplicaError::OutOfOrder {
            expected: 3,
            got: 5,
        };
        assert!(err.to_string().contains("expected seq 3"));
    }
}
