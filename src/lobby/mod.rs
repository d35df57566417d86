//! Connection admission and the match roster

pub mod admission;

pub use admission::{ApprovalResponse, ConnectionAdmission, LocalRole};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed index (0..capacity) of one participant's score, readiness and player entity
pub type Slot = usize;

/// Transport-level identifier of one remote participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An approved participant and the slot it was given at approval time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub connection: ConnectionId,
    pub slot: Slot,
}
