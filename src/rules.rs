//! The three flocking rules: cohesion, separation and alignment.
//!
//! Every neighbor search strategy funnels candidates through
//! [`NeighborSums::accumulate`] and finishes with [`NeighborSums::resolve`],
//! so the naive, scattered and coherent paths differ only in *which* agents
//! they visit and in what order.
//!
//! | Rule | Radius | Contribution |
//! |------|--------|--------------|
//! | 1 Cohesion | `rule1_distance` | `(mean neighbor position - position) * rule1_scale` |
//! | 2 Separation | `rule2_distance` | `sum(position - neighbor) * rule2_scale`, not averaged |
//! | 3 Alignment | `rule3_distance` | `mean neighbor velocity * rule3_scale` |
//!
//! Alignment is only applied when cohesion found at least one neighbor.

use glam::Vec3;

/// Radii, weights and speed cap for the steering rules.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlockRules {
    /// Cohesion radius.
    pub rule1_distance: f32,
    /// Separation radius.
    pub rule2_distance: f32,
    /// Alignment radius.
    pub rule3_distance: f32,
    /// Cohesion weight.
    pub rule1_scale: f32,
    /// Separation weight.
    pub rule2_scale: f32,
    /// Alignment weight.
    pub rule3_scale: f32,
    /// Velocity magnitude cap applied after the rules.
    pub max_speed: f32,
}

impl Default for FlockRules {
    fn default() -> Self {
        Self {
            rule1_distance: 5.0,
            rule2_distance: 3.0,
            rule3_distance: 5.0,
            rule1_scale: 0.01,
            rule2_scale: 0.1,
            rule3_scale: 0.1,
            max_speed: 1.0,
        }
    }
}

impl FlockRules {
    /// Largest of the three radii. The grid cell width.
    pub fn max_distance(&self) -> f32 {
        self.rule1_distance
            .max(self.rule2_distance)
            .max(self.rule3_distance)
    }

    /// Clamp `velocity` to `max_speed`, keeping its direction.
    #[inline]
    pub fn limit_speed(&self, velocity: Vec3) -> Vec3 {
        let speed = velocity.length();
        if speed > self.max_speed {
            velocity * (self.max_speed / speed)
        } else {
            velocity
        }
    }
}

/// Running neighbor totals for one agent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NeighborSums {
    center: Vec3,
    cohesion_count: u32,
    separation: Vec3,
    heading: Vec3,
    alignment_count: u32,
}

impl NeighborSums {
    /// Fold one candidate into the totals. The caller excludes the agent itself.
    #[inline]
    pub fn accumulate(
        &mut self,
        rules: &FlockRules,
        position: Vec3,
        other_position: Vec3,
        other_velocity: Vec3,
    ) {
        let dist = position.distance(other_position);
        if dist < rules.rule1_distance {
            self.center += other_position;
            self.cohesion_count += 1;
        }
        if dist < rules.rule2_distance {
            self.separation += position - other_position;
        }
        if dist < rules.rule3_distance {
            self.heading += other_velocity;
            self.alignment_count += 1;
        }
    }

    /// Number of agents inside the cohesion radius.
    pub fn cohesion_count(&self) -> u32 {
        self.cohesion_count
    }

    /// Number of agents inside the alignment radius.
    pub fn alignment_count(&self) -> u32 {
        self.alignment_count
    }

    /// New velocity from the previous one plus the three rule contributions.
    #[inline]
    pub fn resolve(&self, rules: &FlockRules, position: Vec3, velocity: Vec3) -> Vec3 {
        let mut v = velocity;
        if self.cohesion_count > 0 {
            let center = self.center / self.cohesion_count as f32;
            v += (center - position) * rules.rule1_scale;
            if self.alignment_count > 0 {
                v += self.heading / self.alignment_count as f32 * rules.rule3_scale;
            }
        }
        v += self.separation * rules.rule2_scale;
        rules.limit_speed(v)
    }
}

/// WGSL mirror of [`NeighborSums`]. Expects a `FlockParams` struct in scope.
pub const RULES_WGSL: &str = r#"
struct NeighborSums {
    center: vec3<f32>,
    cohesion_count: u32,
    separation: vec3<f32>,
    heading: vec3<f32>,
    alignment_count: u32,
};

fn empty_sums() -> NeighborSums {
    return NeighborSums(vec3<f32>(0.0), 0u, vec3<f32>(0.0), vec3<f32>(0.0), 0u);
}

fn accumulate_neighbor(
    sums: NeighborSums,
    p: FlockParams,
    pos: vec3<f32>,
    other_pos: vec3<f32>,
    other_vel: vec3<f32>,
) -> NeighborSums {
    var s = sums;
    let dist = distance(pos, other_pos);
    if dist < p.rule1_distance {
        s.center += other_pos;
        s.cohesion_count += 1u;
    }
    if dist < p.rule2_distance {
        s.separation += pos - other_pos;
    }
    if dist < p.rule3_distance {
        s.heading += other_vel;
        s.alignment_count += 1u;
    }
    return s;
}

fn resolve_velocity(s: NeighborSums, p: FlockParams, pos: vec3<f32>, vel: vec3<f32>) -> vec3<f32> {
    var v = vel;
    if s.cohesion_count > 0u {
        let center = s.center / f32(s.cohesion_count);
        v += (center - pos) * p.rule1_scale;
        if s.alignment_count > 0u {
            v += s.heading / f32(s.alignment_count) * p.rule3_scale;
        }
    }
    v += s.separation * p.rule2_scale;
    let speed = length(v);
    if speed > p.max_speed {
        v = v * (p.max_speed / speed);
    }
    return v;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> FlockRules {
        FlockRules::default()
    }

    #[test]
    fn test_no_neighbors_keeps_velocity() {
        let v = Vec3::new(0.3, -0.2, 0.1);
        let sums = NeighborSums::default();
        assert_eq!(sums.resolve(&rules(), Vec3::ZERO, v), v);
    }

    #[test]
    fn test_cohesion_pulls_toward_center() {
        let r = FlockRules {
            rule2_distance: 0.5,
            ..rules()
        };
        let mut sums = NeighborSums::default();
        sums.accumulate(&r, Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0), Vec3::ZERO);

        let v = sums.resolve(&r, Vec3::ZERO, Vec3::ZERO);
        assert!((v.x - 4.0 * r.rule1_scale).abs() < 1e-6);
        assert_eq!(v.y, 0.0);
    }

    #[test]
    fn test_separation_is_summed_not_averaged() {
        let r = FlockRules {
            rule1_distance: 0.1,
            rule3_distance: 0.1,
            ..rules()
        };
        let mut sums = NeighborSums::default();
        sums.accumulate(&r, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO);
        sums.accumulate(&r, Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO);

        // Only separation fires: -(1 + 2) * 0.1
        let v = sums.resolve(&r, Vec3::ZERO, Vec3::ZERO);
        assert!((v.x + 0.3).abs() < 1e-6);
        assert_eq!(sums.cohesion_count(), 0);
    }

    #[test]
    fn test_alignment_gated_by_cohesion_count() {
        // Alignment radius reaches the neighbor, cohesion radius does not.
        let r = FlockRules {
            rule1_distance: 1.0,
            rule2_distance: 0.5,
            rule3_distance: 10.0,
            ..rules()
        };
        let mut sums = NeighborSums::default();
        sums.accumulate(&r, Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0), Vec3::Y);
        assert_eq!(sums.alignment_count(), 1);

        let v = sums.resolve(&r, Vec3::ZERO, Vec3::ZERO);
        assert_eq!(v, Vec3::ZERO);
    }

    #[test]
    fn test_speed_is_clamped() {
        let r = rules();
        let v = r.limit_speed(Vec3::new(3.0, 4.0, 0.0));
        assert!((v.length() - r.max_speed).abs() < 1e-6);
        assert!((v.x / v.y - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_max_distance() {
        let r = FlockRules {
            rule1_distance: 2.0,
            rule2_distance: 7.0,
            rule3_distance: 4.0,
            ..rules()
        };
        assert_eq!(r.max_distance(), 7.0);
    }
}
