//! Arena geometry and the spatial query boundary

use rand::Rng;
use tracing::warn;

use super::physics::Vec2;

/// Spatial queries the simulation needs from the level
pub trait SpatialQuery {
    /// Is there ground under this position?
    fn is_grounded_at(&self, position: Vec2) -> bool;
    /// Is the point inside the arena polygon?
    fn is_inside_polygon(&self, point: Vec2) -> bool;
    /// Axis-aligned bounds of the arena polygon, `None` if no arena is set
    fn sample_bounds(&self) -> Option<(Vec2, Vec2)>;
    /// Fallback spawn point when sampling fails
    fn centroid(&self) -> Option<Vec2>;
    /// Is the position inside the scoring zone?
    fn in_scoring_zone(&self, position: Vec2) -> bool;
}

/// Circular scoring zone
#[derive(Debug, Clone, Copy)]
pub struct ScoringZone {
    pub center: Vec2,
    pub radius: f32,
}

/// Polygon arena whose interior is ground
#[derive(Debug, Clone)]
pub struct ArenaGeometry {
    polygon: Vec<Vec2>,
    scoring_zone: Option<ScoringZone>,
}

impl ArenaGeometry {
    pub fn new(polygon: Vec<Vec2>, scoring_zone: Option<ScoringZone>) -> Self {
        Self {
            polygon,
            scoring_zone,
        }
    }

    /// Octagonal stage with the scoring zone in the middle
    pub fn default_stage() -> Self {
        let radius = 8.0;
        let polygon = (0..8)
            .map(|i| {
                let angle = std::f32::consts::TAU * (i as f32 + 0.5) / 8.0;
                Vec2::new(angle.cos() * radius, angle.sin() * radius)
            })
            .collect();
        Self::new(
            polygon,
            Some(ScoringZone {
                center: Vec2::ZERO,
                radius: 1.5,
            }),
        )
    }

    pub fn polygon(&self) -> &[Vec2] {
        &self.polygon
    }
}

impl SpatialQuery for ArenaGeometry {
    fn is_grounded_at(&self, position: Vec2) -> bool {
        self.is_inside_polygon(position)
    }

    fn is_inside_polygon(&self, point: Vec2) -> bool {
        point_in_polygon(&self.polygon, point)
    }

    fn sample_bounds(&self) -> Option<(Vec2, Vec2)> {
        let first = *self.polygon.first()?;
        let bounds = self.polygon.iter().fold((first, first), |(min, max), p| {
            (
                Vec2::new(min.x.min(p.x), min.y.min(p.y)),
                Vec2::new(max.x.max(p.x), max.y.max(p.y)),
            )
        });
        Some(bounds)
    }

    fn centroid(&self) -> Option<Vec2> {
        polygon_centroid(&self.polygon)
    }

    fn in_scoring_zone(&self, position: Vec2) -> bool {
        self.scoring_zone
            .map(|zone| position.distance(zone.center) <= zone.radius)
            .unwrap_or(false)
    }
}

/// Even-odd ray cast. Degenerate polygons contain nothing.
pub fn point_in_polygon(polygon: &[Vec2], point: Vec2) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let cross_x = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Area centroid, or the vertex average when the polygon has no area
pub fn polygon_centroid(polygon: &[Vec2]) -> Option<Vec2> {
    if polygon.is_empty() {
        return None;
    }

    let mut area = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let cross = a.x * b.y - b.x * a.y;
        area += cross;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    area *= 0.5;

    if area.abs() > f32::EPSILON {
        Some(Vec2::new(cx / (6.0 * area), cy / (6.0 * area)))
    } else {
        let n = polygon.len() as f32;
        let sum = polygon.iter().fold(Vec2::ZERO, |acc, p| acc + *p);
        Some(Vec2::new(sum.x / n, sum.y / n))
    }
}

/// Reject-sample a point inside the arena, falling back to the centroid.
/// Without arena bounds at all this warns and returns the origin.
pub fn random_point_inside<R: Rng>(spatial: &dyn SpatialQuery, rng: &mut R, attempts: usize) -> Vec2 {
    let Some((min, max)) = spatial.sample_bounds() else {
        warn!("Arena bounds are not set, respawning at origin");
        return Vec2::ZERO;
    };

    for _ in 0..attempts {
        let x = if max.x > min.x { rng.gen_range(min.x..max.x) } else { min.x };
        let y = if max.y > min.y { rng.gen_range(min.y..max.y) } else { min.y };
        let candidate = Vec2::new(x, y);
        if spatial.is_inside_polygon(candidate) {
            return candidate;
        }
    }

    warn!(attempts, "Failed to sample a point inside the arena, using centroid");
    spatial.centroid().unwrap_or(Vec2::ZERO)
}
