//! Match orchestration: replicated match state and the round lifecycle

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{topics, BusEvent, EventBus, Subscriptions};
use crate::lobby::{ConnectionId, RosterEntry, Slot};

use super::arena::{random_point_inside, SpatialQuery};
use super::physics::Vec2;
use super::replication::MatchPatch;
use super::rules::MatchRules;
use super::scheduler::{PendingKind, Scheduler};

/// Match phase. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Waiting for everyone to ready up
    Lobby,
    InProgress,
    Finished,
}

/// Score delta against the player owned by `owner`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub owner: ConnectionId,
    pub delta: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub winner: Option<Slot>,
    /// Ended by a disconnect rather than by score
    pub aborted: bool,
}

/// A scheduled respawn that has come due
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RespawnOrder {
    pub slot: Slot,
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("Slot {slot} is outside the {capacity}-slot match")]
    SlotOutOfBounds { slot: Slot, capacity: usize },

    #[error("{0} is not a match participant")]
    UnknownParticipant(ConnectionId),
}

/// Host-owned match-wide state. Vectors are sized once and never resized.
#[derive(Debug, Clone)]
pub struct MatchState {
    slot_scores: Vec<i32>,
    slot_ready: Vec<bool>,
    phase: MatchPhase,
    winning_slot: Option<Slot>,
}

impl MatchState {
    pub fn new(capacity: usize) -> Self {
        Self {
            slot_scores: vec![0; capacity],
            slot_ready: vec![false; capacity],
            phase: MatchPhase::Lobby,
            winning_slot: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slot_scores.len()
    }

    pub fn slot_scores(&self) -> &[i32] {
        &self.slot_scores
    }

    pub fn slot_ready(&self) -> &[bool] {
        &self.slot_ready
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn winning_slot(&self) -> Option<Slot> {
        self.winning_slot
    }

    fn check_slot(&self, slot: Slot) -> Result<(), MatchError> {
        if slot < self.capacity() {
            Ok(())
        } else {
            Err(MatchError::SlotOutOfBounds {
                slot,
                capacity: self.capacity(),
            })
        }
    }

    /// Apply a delta with a floor of zero, returning the new score
    pub fn add_score(&mut self, slot: Slot, delta: i32) -> Result<i32, MatchError> {
        self.check_slot(slot)?;
        let score = &mut self.slot_scores[slot];
        *score = score.saturating_add(delta).max(0);
        Ok(*score)
    }

    pub fn set_ready(&mut self, slot: Slot, ready: bool) -> Result<(), MatchError> {
        self.check_slot(slot)?;
        self.slot_ready[slot] = ready;
        Ok(())
    }
}

/// Drives Lobby -> InProgress -> Finished and owns the replicated match state
pub struct MatchOrchestrator {
    id: Uuid,
    state: MatchState,
    members: BTreeMap<ConnectionId, Slot>,
    rules: MatchRules,
    spatial: Rc<dyn SpatialQuery>,
    rng: ChaCha8Rng,
    scheduler: Scheduler,
    patches: Vec<MatchPatch>,
    subscriptions: Option<Subscriptions>,
}

impl MatchOrchestrator {
    pub fn new(id: Uuid, rules: MatchRules, spatial: Rc<dyn SpatialQuery>, seed: u64) -> Self {
        Self {
            id,
            state: MatchState::new(rules.capacity),
            members: BTreeMap::new(),
            rules,
            spatial,
            rng: ChaCha8Rng::seed_from_u64(seed),
            scheduler: Scheduler::new(),
            patches: Vec::new(),
            subscriptions: None,
        }
    }

    pub fn attach(
        bus: &Rc<EventBus>,
        id: Uuid,
        rules: MatchRules,
        spatial: Rc<dyn SpatialQuery>,
        seed: u64,
    ) -> Rc<RefCell<Self>> {
        let orchestrator = Rc::new(RefCell::new(Self::new(id, rules, spatial, seed)));

        let mut subs = Subscriptions::new(bus);
        subs.forward::<topics::ParticipantApproved, _, _>(&orchestrator, |o, entry| {
            o.add_member(*entry);
            Vec::new()
        });
        subs.forward::<topics::ParticipantLeft, _, _>(&orchestrator, |o, entry| {
            o.remove_member(entry)
        });
        subs.forward::<topics::ChangePlayerScore, _, _>(&orchestrator, |o, change| {
            o.change_score(change)
        });
        subs.forward::<topics::PlayerRespawn, _, _>(&orchestrator, |o, slot| {
            o.schedule_respawn(*slot);
            Vec::new()
        });
        subs.forward::<topics::ShutdownRoom, _, _>(&orchestrator, |o, _| o.abort());
        orchestrator.borrow_mut().subscriptions = Some(subs);

        orchestrator
    }

    pub fn detach(&mut self) {
        if let Some(mut subs) = self.subscriptions.take() {
            subs.release();
        }
        self.scheduler.cancel_all();
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    pub fn pending_respawns(&self) -> usize {
        self.scheduler.len()
    }

    /// Patches committed since the last drain, in commit order
    pub fn drain_patches(&mut self) -> Vec<MatchPatch> {
        std::mem::take(&mut self.patches)
    }

    fn add_member(&mut self, entry: RosterEntry) {
        if let Err(e) = self.state.check_slot(entry.slot) {
            warn!(match_id = %self.id, connection = %entry.connection, error = %e, "Participant not tracked");
            return;
        }
        self.members.insert(entry.connection, entry.slot);
    }

    /// Pre-start departure frees the slot and clears its readiness
    fn remove_member(&mut self, entry: &RosterEntry) -> Vec<BusEvent> {
        if self.members.remove(&entry.connection).is_none() {
            return Vec::new();
        }
        if self.state.phase == MatchPhase::Lobby {
            self.commit_ready(entry.slot, false);
            // Remaining members may now all be ready
            return self.try_start();
        }
        Vec::new()
    }

    fn commit_ready(&mut self, slot: Slot, ready: bool) {
        match self.state.set_ready(slot, ready) {
            Ok(()) => self.patches.push(MatchPatch::Ready { slot, ready }),
            Err(e) => warn!(match_id = %self.id, error = %e, "Readiness change dropped"),
        }
    }

    fn commit_phase(&mut self, phase: MatchPhase) {
        self.state.phase = phase;
        self.patches.push(MatchPatch::Phase { phase });
    }

    /// Flip a roster member's readiness. Ignored once the match has started.
    pub fn toggle_ready(&mut self, connection: ConnectionId) -> Vec<BusEvent> {
        if self.state.phase != MatchPhase::Lobby {
            debug!(match_id = %self.id, connection = %connection, "Ready toggle after start ignored");
            return Vec::new();
        }
        let Some(&slot) = self.members.get(&connection) else {
            debug!(connection = %connection, "Ready toggle from non-member ignored");
            return Vec::new();
        };

        let ready = !self.state.slot_ready[slot];
        self.commit_ready(slot, ready);
        info!(match_id = %self.id, slot, ready, "Readiness changed");
        self.try_start()
    }

    fn try_start(&mut self) -> Vec<BusEvent> {
        if self.members.len() < self.rules.min_players {
            return Vec::new();
        }
        let all_ready = self.members.values().all(|&slot| self.state.slot_ready[slot]);
        if !all_ready {
            return Vec::new();
        }

        self.commit_phase(MatchPhase::InProgress);

        let mut roster: Vec<RosterEntry> = self
            .members
            .iter()
            .map(|(&connection, &slot)| RosterEntry { connection, slot })
            .collect();
        roster.sort_by_key(|entry| entry.slot);

        info!(match_id = %self.id, players = roster.len(), "Match started");
        vec![BusEvent::MatchStarted(roster)]
    }

    /// Apply a score delta. Only counts while the match is in progress.
    pub fn change_score(&mut self, change: &ScoreChange) -> Vec<BusEvent> {
        if self.state.phase != MatchPhase::InProgress {
            debug!(match_id = %self.id, connection = %change.owner, "Score change outside play ignored");
            return Vec::new();
        }

        let result = self
            .members
            .get(&change.owner)
            .copied()
            .ok_or(MatchError::UnknownParticipant(change.owner))
            .and_then(|slot| self.state.add_score(slot, change.delta).map(|value| (slot, value)));

        let (slot, value) = match result {
            Ok(applied) => applied,
            Err(e) => {
                warn!(match_id = %self.id, error = %e, "Score change dropped");
                return Vec::new();
            }
        };
        self.patches.push(MatchPatch::Score { slot, value });
        debug!(match_id = %self.id, slot, delta = change.delta, value, "Score changed");

        self.check_win_condition()
    }

    /// First slot at or above the target wins, scanning in slot order
    fn check_win_condition(&mut self) -> Vec<BusEvent> {
        let target = self.rules.score_to_win;
        match self.state.slot_scores.iter().position(|&score| score >= target) {
            Some(slot) => self.finish(Some(slot), false),
            None => Vec::new(),
        }
    }

    /// Admission-triggered shutdown
    pub fn abort(&mut self) -> Vec<BusEvent> {
        info!(match_id = %self.id, "Participant lost mid-match, aborting");
        self.finish(None, true)
    }

    fn finish(&mut self, winner: Option<Slot>, aborted: bool) -> Vec<BusEvent> {
        if self.state.phase == MatchPhase::Finished {
            return Vec::new();
        }

        if let Some(slot) = winner {
            self.state.winning_slot = Some(slot);
            self.patches.push(MatchPatch::Winner { slot });
        }
        self.commit_phase(MatchPhase::Finished);
        self.scheduler.cancel_all();

        info!(match_id = %self.id, winner = ?winner, aborted, "Match finished");
        vec![BusEvent::MatchEnded(MatchOutcome { winner, aborted })]
    }

    /// Pick a spawn point now and bring the player back after the delay
    pub fn schedule_respawn(&mut self, slot: Slot) {
        if self.state.phase != MatchPhase::InProgress {
            return;
        }
        let position =
            random_point_inside(self.spatial.as_ref(), &mut self.rng, self.rules.respawn_attempts);
        self.scheduler
            .schedule(PendingKind::Respawn { slot, position }, self.rules.respawn_delay);
        debug!(match_id = %self.id, slot, "Respawn scheduled");
    }

    /// Advance timers and return continuations that came due
    pub fn fixed_tick(&mut self, dt: f32) -> Vec<BusEvent> {
        if self.state.phase != MatchPhase::InProgress {
            return Vec::new();
        }
        self.scheduler
            .advance(dt)
            .into_iter()
            .map(|action| match action.kind {
                PendingKind::Respawn { slot, position } => {
                    BusEvent::RespawnDue(RespawnOrder { slot, position })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::ArenaGeometry;

    fn orchestrator() -> MatchOrchestrator {
        let spatial: Rc<dyn SpatialQuery> = Rc::new(ArenaGeometry::default_stage());
        MatchOrchestrator::new(Uuid::new_v4(), MatchRules::default(), spatial, 9)
    }

    fn join(o: &mut MatchOrchestrator, id: u64, slot: Slot) -> ConnectionId {
        let connection = ConnectionId(id);
        o.add_member(RosterEntry { connection, slot });
        connection
    }

    fn started(o: &mut MatchOrchestrator) -> (ConnectionId, ConnectionId) {
        let a = join(o, 1, 0);
        let b = join(o, 2, 1);
        o.toggle_ready(a);
        assert!(!o.toggle_ready(b).is_empty());
        o.drain_patches();
        (a, b)
    }

    #[test]
    fn test_all_ready_starts_match() {
        let mut o = orchestrator();
        let a = join(&mut o, 1, 0);
        let b = join(&mut o, 2, 1);

        assert!(o.toggle_ready(a).is_empty());
        let events = o.toggle_ready(b);
        assert_eq!(o.phase(), MatchPhase::InProgress);
        assert_eq!(
            events,
            vec![BusEvent::MatchStarted(vec![
                RosterEntry { connection: a, slot: 0 },
                RosterEntry { connection: b, slot: 1 },
            ])]
        );
        assert_eq!(
            o.drain_patches(),
            vec![
                MatchPatch::Ready { slot: 0, ready: true },
                MatchPatch::Ready { slot: 1, ready: true },
                MatchPatch::Phase {
                    phase: MatchPhase::InProgress
                },
            ]
        );
    }

    #[test]
    fn test_single_ready_player_does_not_start() {
        let mut o = orchestrator();
        let a = join(&mut o, 1, 0);
        assert!(o.toggle_ready(a).is_empty());
        assert_eq!(o.phase(), MatchPhase::Lobby);
    }

    #[test]
    fn test_unready_blocks_start() {
        let mut o = orchestrator();
        let a = join(&mut o, 1, 0);
        let b = join(&mut o, 2, 1);
        let c = join(&mut o, 3, 2);
        o.toggle_ready(a);
        o.toggle_ready(b);
        o.toggle_ready(a);
        assert!(o.toggle_ready(c).is_empty());
        assert_eq!(o.phase(), MatchPhase::Lobby);
        assert_eq!(o.state().slot_ready(), &[false, true, true, false]);
    }

    #[test]
    fn test_ready_toggle_ignored_after_start() {
        let mut o = orchestrator();
        let (a, _) = started(&mut o);
        assert!(o.toggle_ready(a).is_empty());
        assert!(o.drain_patches().is_empty());
        assert!(o.state().slot_ready()[0]);
    }

    #[test]
    fn test_departure_of_unready_member_can_start() {
        let mut o = orchestrator();
        let a = join(&mut o, 1, 0);
        let b = join(&mut o, 2, 1);
        join(&mut o, 3, 2);
        o.toggle_ready(a);
        o.toggle_ready(b);

        let events = o.remove_member(&RosterEntry {
            connection: ConnectionId(3),
            slot: 2,
        });
        assert!(matches!(events.as_slice(), [BusEvent::MatchStarted(r)] if r.len() == 2));
    }

    #[test]
    fn test_score_clamped_at_zero() {
        let mut o = orchestrator();
        let (a, _) = started(&mut o);
        o.change_score(&ScoreChange { owner: a, delta: 5 });
        o.change_score(&ScoreChange { owner: a, delta: -50 });
        assert_eq!(o.state().slot_scores()[0], 0);
        assert_eq!(
            o.drain_patches(),
            vec![
                MatchPatch::Score { slot: 0, value: 5 },
                MatchPatch::Score { slot: 0, value: 0 },
            ]
        );
    }

    #[test]
    fn test_score_ignored_in_lobby() {
        let mut o = orchestrator();
        let a = join(&mut o, 1, 0);
        o.change_score(&ScoreChange { owner: a, delta: 5 });
        assert_eq!(o.state().slot_scores()[0], 0);
    }

    #[test]
    fn test_unknown_owner_dropped() {
        let mut o = orchestrator();
        started(&mut o);
        let events = o.change_score(&ScoreChange {
            owner: ConnectionId(99),
            delta: 100,
        });
        assert!(events.is_empty());
        assert!(o.drain_patches().is_empty());
        assert_eq!(o.phase(), MatchPhase::InProgress);
    }

    #[test]
    fn test_out_of_bounds_slot_is_integrity_violation() {
        let mut state = MatchState::new(2);
        assert_eq!(
            state.add_score(2, 5),
            Err(MatchError::SlotOutOfBounds {
                slot: 2,
                capacity: 2
            })
        );
        assert_eq!(state.slot_scores(), &[0, 0]);
    }

    #[test]
    fn test_win_finishes_exactly_once() {
        let mut o = orchestrator();
        let (a, b) = started(&mut o);
        o.change_score(&ScoreChange { owner: b, delta: 60 });
        let events = o.change_score(&ScoreChange { owner: b, delta: 45 });
        assert_eq!(
            events,
            vec![BusEvent::MatchEnded(MatchOutcome {
                winner: Some(1),
                aborted: false
            })]
        );
        assert_eq!(o.phase(), MatchPhase::Finished);
        assert_eq!(o.state().winning_slot(), Some(1));

        // No further mutations
        assert!(o.change_score(&ScoreChange { owner: a, delta: 200 }).is_empty());
        assert_eq!(o.state().slot_scores(), &[0, 105, 0, 0]);
        assert!(o.abort().is_empty());
    }

    #[test]
    fn test_lowest_slot_wins_tie() {
        let mut o = orchestrator();
        started(&mut o);
        o.state.slot_scores = vec![100, 100, 0, 0];
        let events = o.check_win_condition();
        assert_eq!(
            events,
            vec![BusEvent::MatchEnded(MatchOutcome {
                winner: Some(0),
                aborted: false
            })]
        );
    }

    #[test]
    fn test_abort_finishes_without_winner() {
        let mut o = orchestrator();
        let (a, _) = started(&mut o);
        o.change_score(&ScoreChange { owner: a, delta: 90 });
        let events = o.abort();
        assert_eq!(
            events,
            vec![BusEvent::MatchEnded(MatchOutcome {
                winner: None,
                aborted: true
            })]
        );
        assert_eq!(o.state().winning_slot(), None);
    }

    #[test]
    fn test_respawn_fires_after_delay() {
        let mut o = orchestrator();
        started(&mut o);
        o.schedule_respawn(1);

        let mut due = Vec::new();
        let mut ticks = 0;
        while due.is_empty() {
            due = o.fixed_tick(0.02);
            ticks += 1;
            assert!(ticks < 200);
        }
        // 2.5s at 50Hz
        assert!((124..=126).contains(&ticks));
        match &due[0] {
            BusEvent::RespawnDue(order) => {
                assert_eq!(order.slot, 1);
                assert!(ArenaGeometry::default_stage().is_inside_polygon(order.position));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_finish_cancels_pending_respawns() {
        let mut o = orchestrator();
        started(&mut o);
        o.schedule_respawn(0);
        o.abort();
        assert_eq!(o.pending_respawns(), 0);
        assert!(o.fixed_tick(10.0).is_empty());
    }
}
