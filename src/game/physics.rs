//! Planar movement and the knockback/jump arc

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

/// 2D vector on the arena plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self - other).length()
    }

    /// Unit vector, or zero for a zero-length input
    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len > f32::EPSILON {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::ZERO
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Physics helpers for the host tick
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Clamp an owner's input so diagonals are not faster than straight lines.
    /// Non-finite input is treated as no input.
    pub fn sanitize_input(input: Vec2) -> Vec2 {
        if !input.is_finite() {
            return Vec2::ZERO;
        }
        if input.length() > 1.0 {
            input.normalized()
        } else {
            input
        }
    }

    /// `position + input * move_speed * dt`
    pub fn apply_movement(position: Vec2, input: Vec2, move_speed: f32, dt: f32) -> Vec2 {
        position + input * (move_speed * dt)
    }

    /// Advance arc progress, clamped to 1.0
    pub fn advance_arc(progress: f32, jump_speed: f32, dt: f32) -> f32 {
        (progress + dt * jump_speed).clamp(0.0, 1.0)
    }

    /// Half-sine height profile: `sin(progress * PI) * jump_height`
    pub fn arc_height(progress: f32, jump_height: f32) -> f32 {
        (progress * std::f32::consts::PI).sin() * jump_height
    }

    /// Horizontal drift while airborne, coupled to the current arc height
    pub fn knockback_displacement(knockback: Vec2, height: f32, dt: f32) -> Vec2 {
        knockback * (height * dt)
    }

    /// Circle overlap test
    pub fn circles_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let combined = radius_a + radius_b;
        dx * dx + dy * dy <= combined * combined
    }
}
