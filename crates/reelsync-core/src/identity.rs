//! Participant identity and replica roles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a connected participant. Assigned by the transport
/// on connect and valid until disconnect; each one owns exactly one
/// fishing controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

/// Which side of the replication boundary a piece of state lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Canonical state; the only side allowed to write.
    Authority,
    /// Read-only mirror overwritten by the authority's updates.
    Replica,
}

impl Role {
    /// Returns `true` for [`Role::Authority`].
    pub fn is_authority(self) -> bool {
        matches!(self, Role::Authority)
    }
}
