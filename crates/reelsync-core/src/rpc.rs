//! Directional remote procedure calls with enforced trust direction.
//!
//! Two call shapes exist:
//!
//! - *to authority*: sent by the owning participant, executed only on the
//!   authority after the transport-level sender has been matched against
//!   the claimed owner;
//! - *to observers*: sent only by the authority, executed on every replica
//!   and on the authority itself.
//!
//! Calls are fire-and-forget. Outgoing traffic is collected in an
//! [`Outbox`] in issue order; the host stamps and flushes it once per
//! step, so every replica observes the authority's writes and calls in the
//! order they happened.

use std::collections::VecDeque;

use crate::identity::{PlayerId, Role};
use crate::protocol::{AuthorityCall, AuthorityRpc, Envelope, ObserverCall, ObserverRpc};

/// Errors raised when a call breaks the trust direction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// An authority-only operation ran on a replica.
    #[error("{op} requires the authority")]
    NotAuthority {
        /// Operation that was attempted.
        op: &'static str,
    },

    /// The transport sender does not match the owner claimed in the call.
    #[error("call from {sender} claims to act for {claimed}")]
    SenderMismatch {
        /// Participant the transport delivered the call from.
        sender: PlayerId,
        /// Owner named inside the call.
        claimed: PlayerId,
    },

    /// A participant tried to call on behalf of an instance it does not own.
    #[error("{local:?} does not own {owner}")]
    NotOwner {
        /// Local participant, if known.
        local: Option<PlayerId>,
        /// Owner of the target instance.
        owner: PlayerId,
    },
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Who receives an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    /// Every connected replica.
    All,
    /// Every connected replica but one.
    AllExcept(PlayerId),
    /// A single replica.
    Only(PlayerId),
}

impl Recipients {
    /// Whether `player` is addressed.
    pub fn includes(self, player: PlayerId) -> bool {
        match self {
            Recipients::All => true,
            Recipients::AllExcept(skip) => skip != player,
            Recipients::Only(only) => only == player,
        }
    }
}

/// An envelope waiting to be stamped and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Addressees.
    pub to: Recipients,
    /// Payload.
    pub envelope: Envelope,
}

/// Ordered queue of authority traffic produced during one step.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Outbound>,
}

impl Outbox {
    /// Queues `envelope` for every replica.
    pub fn push_all(&mut self, envelope: Envelope) {
        self.push(Recipients::All, envelope);
    }

    /// Queues `envelope` for one replica.
    pub fn push_to(&mut self, player: PlayerId, envelope: Envelope) {
        self.push(Recipients::Only(player), envelope);
    }

    /// Queues `envelope` for every replica except `player`.
    pub fn push_all_except(&mut self, player: PlayerId, envelope: Envelope) {
        self.push(Recipients::AllExcept(player), envelope);
    }

    fn push(&mut self, to: Recipients, envelope: Envelope) {
        self.queue.push_back(Outbound { to, envelope });
    }

    /// Removes and yields everything queued, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Outbound> + '_ {
        self.queue.drain(..)
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RpcChannel
// ---------------------------------------------------------------------------

/// Dispatch point for both call shapes on one participant.
#[derive(Debug, Clone, Copy)]
pub struct RpcChannel {
    role: Role,
}

impl RpcChannel {
    /// Channel for a participant with the given role.
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    /// Role this channel was created for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Builds a call to the authority on behalf of `owner`.
    ///
    /// Only the owning participant may send; anyone else gets
    /// [`RpcError::NotOwner`] and nothing is produced.
    pub fn call_authority(
        &self,
        local: Option<PlayerId>,
        owner: PlayerId,
        rpc: AuthorityRpc,
    ) -> Result<AuthorityCall, RpcError> {
        if local != Some(owner) {
            return Err(RpcError::NotOwner { local, owner });
        }
        Ok(AuthorityCall { player: owner, rpc })
    }

    /// Admits a call that arrived from `sender` for execution.
    ///
    /// Runs only on the authority. The claimed owner must equal the
    /// transport sender; the caller then acts on `sender`, never on the
    /// claim.
    pub fn accept(&self, sender: PlayerId, call: &AuthorityCall) -> Result<(), RpcError> {
        if !self.role.is_authority() {
            return Err(RpcError::NotAuthority { op: "accept" });
        }
        if call.player != sender {
            return Err(RpcError::SenderMismatch {
                sender,
                claimed: call.player,
            });
        }
        Ok(())
    }

    /// Queues an observer call for every replica.
    ///
    /// The authority executes the same call on its own view when the host
    /// flushes the outbox.
    pub fn call_observers(
        &self,
        outbox: &mut Outbox,
        owner: PlayerId,
        rpc: ObserverRpc,
    ) -> Result<(), RpcError> {
        if !self.role.is_authority() {
            return Err(RpcError::NotAuthority {
                op: "call_observers",
            });
        }
        tracing::trace!(%owner, ?rpc, "observer call");
        outbox.push_all(Envelope::Observers(ObserverCall { owner, rpc }));
        Ok(())
    }
}
