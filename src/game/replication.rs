//! Replicated state: match patches, player snapshots, and the client-side mirror

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lobby::Slot;

use super::player::Posture;
use super::r#match::{MatchPhase, MatchState};

/// One change to the host-owned match state. Only the host produces these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum MatchPatch {
    Score { slot: Slot, value: i32 },
    Ready { slot: Slot, ready: bool },
    Phase { phase: MatchPhase },
    Winner { slot: Slot },
}

/// Player state as seen by every peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub slot: Slot,
    pub x: f32,
    pub y: f32,
    pub height: f32,
    /// Visual offset: resting offset plus current height
    pub sprite_offset: f32,
    pub posture: Posture,
    pub stunned: bool,
    pub fell: bool,
    /// Whether peers should render the entity; false while off-stage awaiting respawn
    pub active: bool,
}

/// Decides which ticks carry a player snapshot
pub struct SnapshotBuilder {
    ticks_since_snapshot: u32,
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (phase changes, respawns)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }
}

/// Read-only copy of the match state kept by non-host peers.
/// Sent whole on join, then kept current with patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchMirror {
    pub slot_scores: Vec<i32>,
    pub slot_ready: Vec<bool>,
    pub phase: MatchPhase,
    pub winning_slot: Option<Slot>,
}

impl MatchMirror {
    pub fn new(capacity: usize) -> Self {
        Self {
            slot_scores: vec![0; capacity],
            slot_ready: vec![false; capacity],
            phase: MatchPhase::Lobby,
            winning_slot: None,
        }
    }

    pub fn from_state(state: &MatchState) -> Self {
        Self {
            slot_scores: state.slot_scores().to_vec(),
            slot_ready: state.slot_ready().to_vec(),
            phase: state.phase(),
            winning_slot: state.winning_slot(),
        }
    }

    /// Apply a patch from the host. Out-of-range slots are dropped.
    pub fn apply(&mut self, patch: &MatchPatch) -> bool {
        match *patch {
            MatchPatch::Score { slot, value } => match self.slot_scores.get_mut(slot) {
                Some(score) => *score = value,
                None => {
                    warn!(slot, "Score patch outside mirrored roster");
                    return false;
                }
            },
            MatchPatch::Ready { slot, ready } => match self.slot_ready.get_mut(slot) {
                Some(flag) => *flag = ready,
                None => {
                    warn!(slot, "Ready patch outside mirrored roster");
                    return false;
                }
            },
            MatchPatch::Phase { phase } => self.phase = phase,
            MatchPatch::Winner { slot } => self.winning_slot = Some(slot),
        }
        true
    }

    pub fn apply_all<'a>(&mut self, patches: impl IntoIterator<Item = &'a MatchPatch>) {
        for patch in patches {
            self.apply(patch);
        }
    }
}
