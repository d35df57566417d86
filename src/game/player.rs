//! Per-player authoritative state machine

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info};

use crate::events::{topics, BusEvent, EventBus, Subscriptions};
use crate::lobby::{ConnectionId, RosterEntry, Slot};

use super::arena::{random_point_inside, SpatialQuery};
use super::combat::{AttackContact, AttackerView, HitTarget};
use super::physics::{PhysicsSystem, Vec2};
use super::r#match::{RespawnOrder, ScoreChange};
use super::replication::PlayerSnapshot;
use super::rules::MatchRules;

/// Vertical/ground posture. Stun is tracked separately and may overlap Airborne.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Grounded,
    Airborne,
    /// Off-stage awaiting respawn; overrides everything else
    Fallen,
}

/// Jump/knockback arc in flight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirArc {
    /// 0.0 at take-off, 1.0 on landing
    pub progress: f32,
    pub knockback: Vec2,
}

/// Authoritative state of one participant's player entity
#[derive(Debug, Clone)]
pub struct Player {
    pub slot: Slot,
    pub owner: ConnectionId,
    pub position: Vec2,
    /// Elevation above the ground plane
    pub height: f32,
    input: Vec2,
    arc: Option<AirArc>,
    stun_remaining: f32,
    fell: bool,
    next_zone_award_at: f32,
}

impl Player {
    pub fn new(slot: Slot, owner: ConnectionId, position: Vec2) -> Self {
        Self {
            slot,
            owner,
            position,
            height: 0.0,
            input: Vec2::ZERO,
            arc: None,
            stun_remaining: 0.0,
            fell: false,
            next_zone_award_at: 0.0,
        }
    }

    pub fn posture(&self) -> Posture {
        if self.fell {
            Posture::Fallen
        } else if self.arc.is_some() {
            Posture::Airborne
        } else {
            Posture::Grounded
        }
    }

    pub fn is_stunned(&self) -> bool {
        self.stun_remaining > 0.0
    }

    pub fn is_airborne(&self) -> bool {
        self.arc.is_some()
    }

    pub fn has_fallen(&self) -> bool {
        self.fell
    }

    pub fn arc(&self) -> Option<AirArc> {
        self.arc
    }

    /// Owner-proposed movement direction, applied on the next tick
    pub fn set_input(&mut self, input: Vec2) {
        self.input = PhysicsSystem::sanitize_input(input);
    }

    /// Enter the arc, or stack onto the one in flight
    pub fn launch(&mut self, direction: Vec2, rules: &MatchRules) {
        let push = direction.normalized() * rules.knockback_force;
        match self.arc.as_mut() {
            None => {
                self.arc = Some(AirArc {
                    progress: 0.0,
                    knockback: push,
                });
            }
            Some(arc) => {
                arc.knockback += push;
                arc.progress = (arc.progress - rules.restack_decrement).clamp(0.0, 1.0);
            }
        }
    }

    pub fn stun(&mut self, duration: f32) {
        self.stun_remaining = duration;
    }

    /// Resolve an incoming hit. Only same-level hits land, and stunned players ignore hits.
    pub fn receive_hit(&mut self, attacker_height: f32, direction: Vec2, rules: &MatchRules) -> bool {
        if self.fell || self.is_stunned() {
            return false;
        }
        if (attacker_height - self.height).abs() >= rules.height_tolerance {
            return false;
        }
        self.launch(direction, rules);
        self.stun(rules.stun_duration);
        true
    }

    /// Stunned, airborne and fallen players cannot jump
    pub fn request_jump(&mut self, rules: &MatchRules) -> bool {
        if self.fell || self.arc.is_some() || self.is_stunned() {
            return false;
        }
        self.launch(Vec2::ZERO, rules);
        true
    }

    /// One fixed host step. `now` is seconds since the match started.
    pub fn tick(
        &mut self,
        dt: f32,
        now: f32,
        spatial: &dyn SpatialQuery,
        rules: &MatchRules,
    ) -> Vec<BusEvent> {
        let mut events = Vec::new();
        if self.fell {
            return events;
        }

        if self.stun_remaining > 0.0 {
            self.stun_remaining = (self.stun_remaining - dt).max(0.0);
        }

        if spatial.in_scoring_zone(self.position) && now >= self.next_zone_award_at {
            events.push(BusEvent::ChangePlayerScore(ScoreChange {
                owner: self.owner,
                delta: rules.zone_award,
            }));
            self.next_zone_award_at = now + rules.zone_award_interval;
        }

        if !self.is_stunned() {
            self.position =
                PhysicsSystem::apply_movement(self.position, self.input, rules.move_speed, dt);
        }

        if let Some(arc) = self.arc.as_mut() {
            arc.progress = PhysicsSystem::advance_arc(arc.progress, rules.jump_speed, dt);
            let height = PhysicsSystem::arc_height(arc.progress, rules.jump_height);
            self.position += PhysicsSystem::knockback_displacement(arc.knockback, height, dt);
            self.height = height;

            if arc.progress >= 1.0 {
                self.arc = None;
                self.height = 0.0;
            }
        }

        if self.arc.is_none() && !spatial.is_grounded_at(self.position) {
            self.fell = true;
            self.input = Vec2::ZERO;
            events.push(BusEvent::ChangePlayerScore(ScoreChange {
                owner: self.owner,
                delta: rules.fall_penalty,
            }));
            events.push(BusEvent::PlayerRespawn(self.slot));
        }

        events
    }

    /// Back on stage with a landing stun
    pub fn respawn(&mut self, position: Vec2, rules: &MatchRules) {
        self.position = position;
        self.height = 0.0;
        self.arc = None;
        self.input = Vec2::ZERO;
        self.fell = false;
        self.stun(rules.stun_duration);
    }

    pub fn snapshot(&self, rules: &MatchRules) -> PlayerSnapshot {
        PlayerSnapshot {
            slot: self.slot,
            x: self.position.x,
            y: self.position.y,
            height: self.height,
            sprite_offset: rules.resting_offset + self.height,
            posture: self.posture(),
            stunned: self.is_stunned(),
            fell: self.fell,
            active: !self.fell,
        }
    }
}

/// Owns every player entity of the current match
pub struct PlayerSystem {
    players: BTreeMap<Slot, Player>,
    rules: MatchRules,
    spatial: Rc<dyn SpatialQuery>,
    rng: ChaCha8Rng,
    clock: f32,
    subscriptions: Option<Subscriptions>,
}

impl PlayerSystem {
    pub fn new(rules: MatchRules, spatial: Rc<dyn SpatialQuery>, seed: u64) -> Self {
        Self {
            players: BTreeMap::new(),
            rules,
            spatial,
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock: 0.0,
            subscriptions: None,
        }
    }

    pub fn attach(
        bus: &Rc<EventBus>,
        rules: MatchRules,
        spatial: Rc<dyn SpatialQuery>,
        seed: u64,
    ) -> Rc<RefCell<Self>> {
        let system = Rc::new(RefCell::new(Self::new(rules, spatial, seed)));

        let mut subs = Subscriptions::new(bus);
        subs.forward::<topics::MatchStarted, _, _>(&system, |players, roster| {
            players.spawn_all(roster);
            Vec::new()
        });
        subs.forward::<topics::AttackHit, _, _>(&system, |players, contact| {
            players.resolve_hit(contact);
            Vec::new()
        });
        subs.forward::<topics::RespawnDue, _, _>(&system, |players, order| {
            players.respawn(order);
            Vec::new()
        });
        subs.forward::<topics::MatchEnded, _, _>(&system, |players, _| {
            players.despawn_all();
            Vec::new()
        });
        system.borrow_mut().subscriptions = Some(subs);

        system
    }

    pub fn detach(&mut self) {
        if let Some(mut subs) = self.subscriptions.take() {
            subs.release();
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn get(&self, slot: Slot) -> Option<&Player> {
        self.players.get(&slot)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Player> {
        self.players.get_mut(&slot)
    }

    fn owned_by(&mut self, owner: ConnectionId) -> Option<&mut Player> {
        self.players.values_mut().find(|p| p.owner == owner)
    }

    /// One player per roster entry, bound to its approved slot
    pub fn spawn_all(&mut self, roster: &[RosterEntry]) {
        self.players.clear();
        self.clock = 0.0;
        for entry in roster {
            let position =
                random_point_inside(self.spatial.as_ref(), &mut self.rng, self.rules.respawn_attempts);
            self.players
                .insert(entry.slot, Player::new(entry.slot, entry.connection, position));
            info!(slot = entry.slot, connection = %entry.connection, "Player spawned");
        }
    }

    pub fn despawn_all(&mut self) {
        self.players.clear();
    }

    pub fn set_input(&mut self, owner: ConnectionId, input: Vec2) -> bool {
        match self.owned_by(owner) {
            Some(player) if !player.has_fallen() => {
                player.set_input(input);
                true
            }
            _ => false,
        }
    }

    pub fn request_jump(&mut self, owner: ConnectionId) -> bool {
        let rules = self.rules.clone();
        self.owned_by(owner)
            .map(|player| player.request_jump(&rules))
            .unwrap_or(false)
    }

    pub fn attacker(&self, owner: ConnectionId) -> Option<AttackerView> {
        self.players
            .values()
            .find(|p| p.owner == owner && !p.has_fallen())
            .map(|p| AttackerView {
                slot: p.slot,
                position: p.position,
                stunned: p.is_stunned(),
            })
    }

    pub fn hit_targets(&self) -> Vec<HitTarget> {
        self.players
            .values()
            .filter(|p| !p.has_fallen())
            .map(|p| HitTarget {
                slot: p.slot,
                position: p.position,
                radius: self.rules.player_radius,
            })
            .collect()
    }

    pub fn resolve_hit(&mut self, contact: &AttackContact) -> bool {
        if contact.victim == contact.attack.owner {
            return false;
        }
        let Some(attacker_height) = self.players.get(&contact.attack.owner).map(|p| p.height) else {
            debug!(slot = contact.attack.owner, "Hit from a player that no longer exists");
            return false;
        };
        let rules = &self.rules;
        let Some(victim) = self.players.get_mut(&contact.victim) else {
            return false;
        };

        let landed = victim.receive_hit(attacker_height, contact.attack.direction, rules);
        debug!(
            attacker = contact.attack.owner,
            victim = contact.victim,
            landed,
            "Attack contact resolved"
        );
        landed
    }

    /// Deferred respawn; skipped if the target is gone or already back
    pub fn respawn(&mut self, order: &RespawnOrder) -> bool {
        let rules = &self.rules;
        match self.players.get_mut(&order.slot) {
            Some(player) if player.has_fallen() => {
                player.respawn(order.position, rules);
                info!(slot = order.slot, "Player respawned");
                true
            }
            _ => {
                debug!(slot = order.slot, "Respawn target not awaiting respawn");
                false
            }
        }
    }

    pub fn fixed_tick(&mut self, dt: f32) -> Vec<BusEvent> {
        self.clock += dt;
        let now = self.clock;
        let spatial = self.spatial.as_ref();
        let rules = &self.rules;
        self.players
            .values_mut()
            .flat_map(|player| player.tick(dt, now, spatial, rules))
            .collect()
    }

    pub fn snapshots(&self) -> Vec<PlayerSnapshot> {
        self.players
            .values()
            .map(|p| p.snapshot(&self.rules))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::arena::ArenaGeometry;
    use crate::game::combat::HitVolumeRef;
    use uuid::Uuid;

    /// Flat ground everywhere except where `hole_x` is exceeded
    struct Stage {
        hole_x: f32,
        zone: bool,
    }

    impl SpatialQuery for Stage {
        fn is_grounded_at(&self, position: Vec2) -> bool {
            position.x < self.hole_x
        }
        fn is_inside_polygon(&self, point: Vec2) -> bool {
            point.x < self.hole_x
        }
        fn sample_bounds(&self) -> Option<(Vec2, Vec2)> {
            Some((Vec2::new(-1.0, -1.0), Vec2::new(1.0, 1.0)))
        }
        fn centroid(&self) -> Option<Vec2> {
            Some(Vec2::ZERO)
        }
        fn in_scoring_zone(&self, _position: Vec2) -> bool {
            self.zone
        }
    }

    const DT: f32 = 0.02;

    fn stage() -> Stage {
        Stage {
            hole_x: 100.0,
            zone: false,
        }
    }

    fn player() -> Player {
        Player::new(1, ConnectionId(2), Vec2::ZERO)
    }

    #[test]
    fn test_same_level_hit_launches_and_stuns() {
        let rules = MatchRules::default();
        let mut p = player();
        assert!(p.receive_hit(0.2, Vec2::new(1.0, 0.0), &rules));
        assert_eq!(p.posture(), Posture::Airborne);
        assert!(p.is_stunned());
        assert_eq!(p.arc().unwrap().knockback, Vec2::new(3.0, 0.0));
    }

    #[test]
    fn test_hit_from_other_level_misses() {
        let rules = MatchRules::default();
        let mut p = player();
        assert!(!p.receive_hit(0.5, Vec2::new(1.0, 0.0), &rules));
        assert_eq!(p.posture(), Posture::Grounded);
        assert!(!p.is_stunned());
    }

    #[test]
    fn test_stunned_player_ignores_hits() {
        let rules = MatchRules::default();
        let mut p = player();
        p.stun(1.0);
        assert!(!p.receive_hit(0.0, Vec2::new(1.0, 0.0), &rules));
        assert!(!p.is_airborne());
    }

    #[test]
    fn test_second_launch_stacks_knockback() {
        let rules = MatchRules::default();
        let spatial = stage();
        let mut p = player();
        p.launch(Vec2::new(1.0, 0.0), &rules);
        for _ in 0..5 {
            p.tick(DT, 0.0, &spatial, &rules);
        }
        let before = p.arc().unwrap();
        assert!((before.progress - 0.5).abs() < 1e-4);

        p.launch(Vec2::new(0.0, 1.0), &rules);
        let after = p.arc().unwrap();
        assert_eq!(after.knockback, Vec2::new(3.0, 3.0));
        assert!((after.progress - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_restack_clamps_progress_at_zero() {
        let rules = MatchRules::default();
        let mut p = player();
        p.launch(Vec2::new(1.0, 0.0), &rules);
        p.launch(Vec2::new(1.0, 0.0), &rules);
        assert_eq!(p.arc().unwrap().progress, 0.0);
    }

    #[test]
    fn test_arc_progress_monotonic_and_lands() {
        let rules = MatchRules::default();
        let spatial = stage();
        let mut p = player();
        p.launch(Vec2::new(1.0, 0.0), &rules);

        let mut last = 0.0;
        let mut ticks = 0;
        while let Some(arc) = p.arc() {
            assert!(arc.progress >= last && arc.progress <= 1.0);
            last = arc.progress;
            p.tick(DT, 0.0, &spatial, &rules);
            ticks += 1;
            assert!(ticks < 100);
        }
        assert_eq!(p.height, 0.0);
        assert_eq!(p.posture(), Posture::Grounded);
        // Drift is coupled to the arc: the player moved forward
        assert!(p.position.x > 0.0);
    }

    #[test]
    fn test_stunned_player_does_not_move() {
        let rules = MatchRules::default();
        let spatial = stage();
        let mut p = player();
        p.set_input(Vec2::new(1.0, 0.0));
        p.stun(0.1);
        p.tick(DT, 0.0, &spatial, &rules);
        assert_eq!(p.position, Vec2::ZERO);

        for _ in 0..10 {
            p.tick(DT, 0.0, &spatial, &rules);
        }
        assert!(!p.is_stunned());
        assert!(p.position.x > 0.0);
    }

    #[test]
    fn test_walking_off_stage_falls() {
        let rules = MatchRules::default();
        let spatial = Stage {
            hole_x: 0.05,
            zone: false,
        };
        let mut p = player();
        p.set_input(Vec2::new(1.0, 0.0));

        let events = p.tick(DT, 0.0, &spatial, &rules);
        assert_eq!(p.posture(), Posture::Fallen);
        assert_eq!(
            events,
            vec![
                BusEvent::ChangePlayerScore(ScoreChange {
                    owner: ConnectionId(2),
                    delta: -50,
                }),
                BusEvent::PlayerRespawn(1),
            ]
        );

        // Fallen players are inert
        assert!(p.tick(DT, 1.0, &spatial, &rules).is_empty());
        let snapshot = p.snapshot(&rules);
        assert!(snapshot.fell);
        assert!(!snapshot.active);
    }

    #[test]
    fn test_no_fall_mid_arc() {
        let rules = MatchRules::default();
        let spatial = Stage {
            hole_x: -1.0,
            zone: false,
        };
        let mut p = player();
        p.launch(Vec2::ZERO, &rules);
        let events = p.tick(DT, 0.0, &spatial, &rules);
        assert!(events.is_empty());
        assert!(p.is_airborne());
    }

    #[test]
    fn test_zone_award_rate_limited() {
        let rules = MatchRules::default();
        let spatial = Stage {
            hole_x: 100.0,
            zone: true,
        };
        let mut p = player();

        let mut awards = 0;
        let mut now = 0.0;
        for _ in 0..100 {
            now += DT;
            awards += p
                .tick(DT, now, &spatial, &rules)
                .iter()
                .filter(|e| matches!(e, BusEvent::ChangePlayerScore(c) if c.delta == 5))
                .count();
        }
        // Two seconds in the zone: awards at t=0.02, ~1.02, ~2.0 at most
        assert!((2..=3).contains(&awards));
    }

    #[test]
    fn test_respawn_enters_landing_stun() {
        let rules = MatchRules::default();
        let mut p = player();
        p.fell = true;
        p.respawn(Vec2::new(1.0, 1.0), &rules);
        assert_eq!(p.posture(), Posture::Grounded);
        assert!(p.is_stunned());
        assert_eq!(p.position, Vec2::new(1.0, 1.0));
        assert!(p.snapshot(&rules).active);
    }

    #[test]
    fn test_stunned_player_cannot_jump() {
        let rules = MatchRules::default();
        let spatial = stage();
        let mut p = player();
        p.fell = true;
        p.respawn(Vec2::ZERO, &rules);

        assert!(!p.request_jump(&rules));
        assert_eq!(p.posture(), Posture::Grounded);

        // Landing stun wears off, then the jump goes through
        for _ in 0..60 {
            p.tick(DT, 0.0, &spatial, &rules);
        }
        assert!(!p.is_stunned());
        assert!(p.request_jump(&rules));
        assert_eq!(p.posture(), Posture::Airborne);
    }

    #[test]
    fn test_hit_on_jumping_player_restacks_arc() {
        let rules = MatchRules::default();
        let spatial: Rc<dyn SpatialQuery> = Rc::new(ArenaGeometry::default_stage());
        let mut system = PlayerSystem::new(rules, spatial, 3);
        system.spawn_all(&[
            RosterEntry {
                connection: ConnectionId(10),
                slot: 0,
            },
            RosterEntry {
                connection: ConnectionId(11),
                slot: 1,
            },
        ]);
        // Both jump on the same tick so they share a level mid-arc
        assert!(system.request_jump(ConnectionId(10)));
        assert!(system.request_jump(ConnectionId(11)));
        for _ in 0..5 {
            system.fixed_tick(DT);
        }
        let before = system.get(1).unwrap().arc().unwrap();
        assert!((before.progress - 0.5).abs() < 1e-4);
        assert!(!system.get(1).unwrap().is_stunned());

        let contact = AttackContact {
            attack: HitVolumeRef {
                id: Uuid::new_v4(),
                owner: 0,
                direction: Vec2::new(0.0, 1.0),
            },
            victim: 1,
        };
        assert!(system.resolve_hit(&contact));

        let victim = system.get(1).unwrap();
        let after = victim.arc().unwrap();
        assert_eq!(after.knockback, before.knockback + Vec2::new(0.0, 3.0));
        assert!((before.progress - after.progress - 0.2).abs() < 1e-4);
        assert!(victim.is_stunned());
        // The attacker keeps its own arc
        assert!((system.get(0).unwrap().arc().unwrap().progress - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_system_resolves_contact_by_slot() {
        let rules = MatchRules::default();
        let spatial: Rc<dyn SpatialQuery> = Rc::new(ArenaGeometry::default_stage());
        let mut system = PlayerSystem::new(rules, spatial, 3);
        system.spawn_all(&[
            RosterEntry {
                connection: ConnectionId(10),
                slot: 0,
            },
            RosterEntry {
                connection: ConnectionId(11),
                slot: 1,
            },
        ]);
        assert_eq!(system.len(), 2);

        let contact = AttackContact {
            attack: HitVolumeRef {
                id: Uuid::new_v4(),
                owner: 0,
                direction: Vec2::new(0.0, 1.0),
            },
            victim: 1,
        };
        assert!(system.resolve_hit(&contact));
        assert!(system.get(1).unwrap().is_airborne());

        let self_hit = AttackContact {
            victim: 0,
            ..contact.clone()
        };
        assert!(!system.resolve_hit(&self_hit));
    }

    #[test]
    fn test_system_respawn_checks_liveness() {
        let rules = MatchRules::default();
        let spatial: Rc<dyn SpatialQuery> = Rc::new(ArenaGeometry::default_stage());
        let mut system = PlayerSystem::new(rules, spatial, 3);
        let order = RespawnOrder {
            slot: 0,
            position: Vec2::ZERO,
        };
        // No such player
        assert!(!system.respawn(&order));

        system.spawn_all(&[RosterEntry {
            connection: ConnectionId(10),
            slot: 0,
        }]);
        // Not fallen
        assert!(!system.respawn(&order));
    }
}
