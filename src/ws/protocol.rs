//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{MatchMirror, MatchPatch, PlayerSnapshot};
use crate::lobby::{ConnectionId, RosterEntry, Slot};
use crate::session::JoinCode;

/// Messages sent from client to server. All of them are intents the host validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Flip readiness in the lobby
    ToggleReady,

    /// Desired movement direction; magnitudes above 1 are normalized
    Move { x: f32, y: f32 },

    Jump,

    /// Attack in a direction
    Attack { dir_x: f32, dir_y: f32 },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

impl ClientMsg {
    /// Pings are answered even when the input budget is spent
    pub fn is_rate_limited(&self) -> bool {
        !matches!(self, ClientMsg::Ping { .. })
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once the connection is approved
    Welcome {
        connection: ConnectionId,
        slot: Slot,
        match_id: Uuid,
        server_time: u64,
        /// Full match state; later changes arrive as patches
        state: MatchMirror,
    },

    /// Admission refused (roster full)
    Rejected { reason: String },

    /// Match state changes in commit order
    MatchPatch { patches: Vec<MatchPatch> },

    /// Player state (sent at regular intervals)
    Snapshot {
        /// Server tick number
        tick: u64,
        players: Vec<PlayerSnapshot>,
    },

    /// A hit-volume was spawned; observers orient the attacker
    AttackStarted {
        slot: Slot,
        dir_x: f32,
        dir_y: f32,
        /// Degrees, 0 = +y
        rotation: f32,
    },

    /// Lobby is over; one player per roster entry
    MatchStarted { tick: u64, roster: Vec<RosterEntry> },

    MatchFinished { winner: Option<Slot>, aborted: bool },

    /// Join code of the room currently hosted
    RoomCode { code: JoinCode },

    /// Session call failed; lobby controls should be usable again
    NetworkReset,

    /// The session is closing; the socket will be dropped
    SessionClosed,

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
