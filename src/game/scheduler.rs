//! Deadline-based continuations, drained once per host tick

use crate::lobby::Slot;

use super::physics::Vec2;

#[derive(Debug, Clone, PartialEq)]
pub enum PendingKind {
    Respawn { slot: Slot, position: Vec2 },
}

/// A continuation waiting for its due time
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub kind: PendingKind,
    /// Scheduler time in seconds
    pub due: f64,
    seq: u64,
}

/// Timer wheel driven by the fixed tick; never blocks
#[derive(Debug, Default)]
pub struct Scheduler {
    now: f64,
    next_seq: u64,
    pending: Vec<PendingAction>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn schedule(&mut self, kind: PendingKind, delay: f32) {
        let action = PendingAction {
            kind,
            due: self.now + f64::from(delay.max(0.0)),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.pending.push(action);
    }

    /// Move time forward and return everything now due, ordered by due time then
    /// scheduling order.
    pub fn advance(&mut self, dt: f32) -> Vec<PendingAction> {
        self.now += f64::from(dt);
        let now = self.now;

        let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|a| a.due <= now);
        self.pending = rest;

        due.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)));
        due
    }

    /// Drop everything scheduled so far; nothing cancelled can fire later
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }
}
