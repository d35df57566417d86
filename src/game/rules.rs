//! Gameplay tuning

/// Constants for one match. Values are in arena units and seconds.
#[derive(Debug, Clone)]
pub struct MatchRules {
    /// Maximum roster size
    pub capacity: usize,
    /// Players needed before an all-ready lobby starts
    pub min_players: usize,
    pub score_to_win: i32,
    /// Score change applied when a player falls off stage
    pub fall_penalty: i32,
    /// Score awarded while standing in the scoring zone
    pub zone_award: i32,
    /// Minimum time between two zone awards for one player
    pub zone_award_interval: f32,
    pub respawn_delay: f32,
    pub respawn_attempts: usize,

    pub move_speed: f32,
    pub jump_height: f32,
    /// Arc progress per second
    pub jump_speed: f32,
    pub knockback_force: f32,
    /// Progress removed when an airborne player is launched again
    pub restack_decrement: f32,
    /// Max height difference for a hit to land
    pub height_tolerance: f32,
    pub stun_duration: f32,

    pub attack_duration: f32,
    /// Distance from the attacker at which the hit-volume is centered
    pub attack_reach: f32,
    pub attack_radius: f32,
    pub player_radius: f32,
    /// Sprite offset above the ground plane while grounded
    pub resting_offset: f32,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            capacity: 4,
            min_players: 2,
            score_to_win: 100,
            fall_penalty: -50,
            zone_award: 5,
            zone_award_interval: 1.0,
            respawn_delay: 2.5,
            respawn_attempts: 10,
            move_speed: 5.0,
            jump_height: 1.5,
            jump_speed: 5.0,
            knockback_force: 3.0,
            restack_decrement: 0.2,
            height_tolerance: 0.5,
            stun_duration: 1.0,
            attack_duration: 0.3,
            attack_reach: 0.6,
            attack_radius: 0.6,
            player_radius: 0.4,
            resting_offset: 1.0,
        }
    }
}
