//! Combat system - attack hit-volumes and contact detection

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::events::BusEvent;
use crate::lobby::Slot;

use super::physics::{PhysicsSystem, Vec2};
use super::rules::MatchRules;

/// Reference to an attack carried in hit notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitVolumeRef {
    pub id: Uuid,
    /// Attacking player's slot
    pub owner: Slot,
    /// Unit attack direction
    pub direction: Vec2,
}

/// An attack volume touched another player
#[derive(Debug, Clone, PartialEq)]
pub struct AttackContact {
    pub attack: HitVolumeRef,
    pub victim: Slot,
}

/// What combat needs to know about an attacker
#[derive(Debug, Clone, Copy)]
pub struct AttackerView {
    pub slot: Slot,
    pub position: Vec2,
    pub stunned: bool,
}

/// A player's collision circle
#[derive(Debug, Clone, Copy)]
pub struct HitTarget {
    pub slot: Slot,
    pub position: Vec2,
    pub radius: f32,
}

/// Short-lived attack collider
#[derive(Debug, Clone)]
pub struct HitVolume {
    pub id: Uuid,
    pub owner: Slot,
    pub center: Vec2,
    pub direction: Vec2,
    /// Facing in degrees, 0 = +y
    pub rotation_deg: f32,
    pub radius: f32,
    lifetime_remaining: f32,
    /// Targets already reported by this activation
    struck: Vec<Slot>,
}

impl HitVolume {
    pub fn new(attacker: &AttackerView, direction: Vec2, rules: &MatchRules) -> Self {
        let direction = direction.normalized();
        Self {
            id: Uuid::new_v4(),
            owner: attacker.slot,
            center: attacker.position + direction * rules.attack_reach,
            direction,
            rotation_deg: (-direction.x).atan2(direction.y).to_degrees(),
            radius: rules.attack_radius,
            lifetime_remaining: rules.attack_duration,
            struck: Vec::new(),
        }
    }

    pub fn reference(&self) -> HitVolumeRef {
        HitVolumeRef {
            id: self.id,
            owner: self.owner,
            direction: self.direction,
        }
    }

    /// New overlaps this tick. Each target is reported once per activation.
    fn contacts(&mut self, targets: &[HitTarget]) -> Vec<AttackContact> {
        let mut found = Vec::new();
        for target in targets {
            if target.slot == self.owner || self.struck.contains(&target.slot) {
                continue;
            }
            if PhysicsSystem::circles_overlap(self.center, self.radius, target.position, target.radius) {
                self.struck.push(target.slot);
                found.push(AttackContact {
                    attack: self.reference(),
                    victim: target.slot,
                });
            }
        }
        found
    }

    /// Returns false once expired
    fn age(&mut self, dt: f32) -> bool {
        self.lifetime_remaining -= dt;
        self.lifetime_remaining > 0.0
    }
}

/// Pool of active hit-volumes, swept by the host tick
pub struct CombatSystem {
    volumes: Vec<HitVolume>,
    rules: MatchRules,
}

impl CombatSystem {
    pub fn new(rules: MatchRules) -> Self {
        Self {
            volumes: Vec::new(),
            rules,
        }
    }

    /// Spawn a hit-volume unless the attacker is stunned or already attacking
    pub fn request_attack(&mut self, attacker: &AttackerView, direction: Vec2) -> Option<HitVolumeRef> {
        if attacker.stunned {
            debug!(slot = attacker.slot, "Attack ignored: attacker stunned");
            return None;
        }
        if !direction.is_finite() {
            debug!(slot = attacker.slot, "Attack ignored: bad direction");
            return None;
        }
        if self.volumes.iter().any(|v| v.owner == attacker.slot) {
            return None;
        }

        let volume = HitVolume::new(attacker, direction, &self.rules);
        let reference = volume.reference();
        self.volumes.push(volume);
        Some(reference)
    }

    /// Detect contacts, then expire volumes whose lifetime has elapsed
    pub fn fixed_tick(&mut self, dt: f32, targets: &[HitTarget]) -> Vec<BusEvent> {
        let mut events = Vec::new();
        for volume in self.volumes.iter_mut() {
            events.extend(volume.contacts(targets).into_iter().map(BusEvent::AttackHit));
        }
        self.volumes.retain_mut(|volume| volume.age(dt));
        events
    }

    pub fn active(&self) -> &[HitVolume] {
        &self.volumes
    }

    pub fn clear(&mut self) {
        self.volumes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.02;

    fn attacker(slot: Slot, x: f32) -> AttackerView {
        AttackerView {
            slot,
            position: Vec2::new(x, 0.0),
            stunned: false,
        }
    }

    fn target(slot: Slot, x: f32) -> HitTarget {
        HitTarget {
            slot,
            position: Vec2::new(x, 0.0),
            radius: 0.4,
        }
    }

    #[test]
    fn test_one_active_volume_per_attacker() {
        let mut combat = CombatSystem::new(MatchRules::default());
        assert!(combat.request_attack(&attacker(0, 0.0), Vec2::new(1.0, 0.0)).is_some());
        assert!(combat.request_attack(&attacker(0, 0.0), Vec2::new(1.0, 0.0)).is_none());
        assert!(combat.request_attack(&attacker(1, 5.0), Vec2::new(1.0, 0.0)).is_some());
        assert_eq!(combat.active().len(), 2);
    }

    #[test]
    fn test_stunned_attacker_ignored() {
        let mut combat = CombatSystem::new(MatchRules::default());
        let mut view = attacker(0, 0.0);
        view.stunned = true;
        assert!(combat.request_attack(&view, Vec2::new(1.0, 0.0)).is_none());
        assert!(combat.active().is_empty());
    }

    #[test]
    fn test_contact_reported_once_per_target() {
        let mut combat = CombatSystem::new(MatchRules::default());
        combat.request_attack(&attacker(0, 0.0), Vec2::new(1.0, 0.0));
        let targets = [target(0, 0.0), target(1, 1.0), target(2, 9.0)];

        let mut hits = Vec::new();
        for _ in 0..10 {
            hits.extend(combat.fixed_tick(DT, &targets));
        }

        assert_eq!(hits.len(), 1);
        match &hits[0] {
            BusEvent::AttackHit(contact) => {
                assert_eq!(contact.victim, 1);
                assert_eq!(contact.attack.owner, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_volume_expires_after_duration() {
        let mut combat = CombatSystem::new(MatchRules::default());
        combat.request_attack(&attacker(0, 0.0), Vec2::new(0.0, 1.0));

        let mut ticks = 0;
        while !combat.active().is_empty() {
            combat.fixed_tick(DT, &[]);
            ticks += 1;
        }
        // 0.3s at 50Hz
        assert!((14..=16).contains(&ticks));

        // Free to attack again
        assert!(combat.request_attack(&attacker(0, 0.0), Vec2::new(0.0, 1.0)).is_some());
    }

    #[test]
    fn test_orientation_from_direction() {
        let rules = MatchRules::default();
        let up = HitVolume::new(&attacker(0, 0.0), Vec2::new(0.0, 2.0), &rules);
        assert!(up.rotation_deg.abs() < 1e-4);
        assert_eq!(up.direction, Vec2::new(0.0, 1.0));

        let right = HitVolume::new(&attacker(0, 0.0), Vec2::new(1.0, 0.0), &rules);
        assert!((right.rotation_deg + 90.0).abs() < 1e-4);
    }
}
