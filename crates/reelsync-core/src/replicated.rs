//! Replicated variables: single-writer values with change notification.
//!
//! A [`ReplicatedVariable`] lives on every participant. Only the copy with
//! [`Role::Authority`] accepts [`ReplicatedVariable::write`]; each write
//! notifies local observers synchronously and queues a [`VarUpdate`] on the
//! authority's [`Outbox`], which is delivered to every replica in write
//! order. Replicas apply updates with [`ReplicatedVariable::apply_remote`],
//! which notifies their own observers with the same `(previous, current)`
//! pair.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::identity::{PlayerId, Role};
use crate::protocol::Envelope;
use crate::rpc::Outbox;

/// Identifies one replicated field of a player or of their bobber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKey {
    /// Player avatar position.
    PlayerPosition,
    /// Whether the player has a cast out.
    IsFishing,
    /// Player's accumulated score.
    Score,
    /// Bobber position.
    BobberPosition,
    /// Point the fishing line starts from.
    RodTip,
    /// Taps counted during the reel-in minigame.
    TapCount,
}

/// One applied write, addressed by owner and field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VarUpdate {
    /// Player whose state changed.
    pub owner: PlayerId,
    /// Which field changed.
    pub key: VarKey,
    /// Postcard-encoded new value.
    pub value: Vec<u8>,
}

/// Errors raised by replicated variables.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// A replica tried to write. The value is left untouched.
    #[error("{owner} {key:?}: write from a non-authority replica")]
    WriteFromNonAuthority {
        /// Owner of the variable.
        owner: PlayerId,
        /// Field that was written.
        key: VarKey,
    },

    /// The authority was handed a remote update for its own state.
    #[error("{owner} {key:?}: remote update applied on the authority")]
    RemoteUpdateOnAuthority {
        /// Owner of the variable.
        owner: PlayerId,
        /// Field that was updated.
        key: VarKey,
    },

    /// Encoding or decoding the value failed.
    #[error("{key:?}: codec error: {source}")]
    Codec {
        /// Field being encoded or decoded.
        key: VarKey,
        /// Underlying postcard error.
        #[source]
        source: postcard::Error,
    },
}

/// Handle returned by [`ReplicatedVariable::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Change handler; receives `(previous, current)`.
pub type Observer<T> = Box<dyn FnMut(&T, &T) + Send>;

/// A value with one legal writer, an observer list, and network propagation.
pub struct ReplicatedVariable<T> {
    owner: PlayerId,
    key: VarKey,
    role: Role,
    value: T,
    observers: Vec<(ObserverId, Observer<T>)>,
    next_observer: u64,
    applied: u64,
}

impl<T> ReplicatedVariable<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Creates a variable holding `initial`.
    pub fn new(owner: PlayerId, key: VarKey, role: Role, initial: T) -> Self {
        Self {
            owner,
            key,
            role,
            value: initial,
            observers: Vec::new(),
            next_observer: 0,
            applied: 0,
        }
    }

    /// Last applied value. Always legal.
    pub fn read(&self) -> &T {
        &self.value
    }

    /// Field this variable replicates.
    pub fn key(&self) -> VarKey {
        self.key
    }

    /// Player this variable belongs to.
    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    /// Side this copy lives on.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of writes (or remote updates) applied so far.
    pub fn applied_writes(&self) -> u64 {
        self.applied
    }

    /// Writes `value` on the authority, notifies local observers and queues
    /// the update for every replica.
    ///
    /// On a replica this is rejected with
    /// [`ReplicationError::WriteFromNonAuthority`] and nothing changes.
    pub fn write(&mut self, value: T, outbox: &mut Outbox) -> Result<(), ReplicationError> {
        if !self.role.is_authority() {
            tracing::warn!(owner = %self.owner, key = ?self.key, "rejected write from replica");
            return Err(ReplicationError::WriteFromNonAuthority {
                owner: self.owner,
                key: self.key,
            });
        }
        let encoded = postcard::to_allocvec(&value).map_err(|source| ReplicationError::Codec {
            key: self.key,
            source,
        })?;
        self.replace(value);
        outbox.push_all(Envelope::Update(VarUpdate {
            owner: self.owner,
            key: self.key,
            value: encoded,
        }));
        Ok(())
    }

    /// Applies an update received from the authority.
    pub fn apply_remote(&mut self, encoded: &[u8]) -> Result<(), ReplicationError> {
        if self.role.is_authority() {
            return Err(ReplicationError::RemoteUpdateOnAuthority {
                owner: self.owner,
                key: self.key,
            });
        }
        let value: T = postcard::from_bytes(encoded).map_err(|source| ReplicationError::Codec {
            key: self.key,
            source,
        })?;
        self.replace(value);
        Ok(())
    }

    /// Registers `handler`; it runs once per applied write, in write order.
    pub fn subscribe<F>(&mut self, handler: F) -> ObserverId
    where
        F: FnMut(&T, &T) + Send + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(handler)));
        id
    }

    /// Removes one handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Drops every handler. Called before the owning object is destroyed.
    pub fn clear_observers(&mut self) -> usize {
        let count = self.observers.len();
        self.observers.clear();
        count
    }

    /// Number of registered handlers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn replace(&mut self, value: T) {
        let previous = std::mem::replace(&mut self.value, value);
        self.applied += 1;
        for (_, handler) in self.observers.iter_mut() {
            handler(&previous, &self.value);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReplicatedVariable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedVariable")
            .field("owner", &self.owner)
            .field("key", &self.key)
            .field("role", &self.role)
            .field("value", &self.value)
            .field("observers", &self.observers.len())
            .finish()
    }
}
