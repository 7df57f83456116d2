//! Static flock configuration.
//!
//! Everything here is fixed for the lifetime of a flock: the grid geometry is
//! derived from it once at initialization and never rebuilt.

use crate::error::FlockError;
use crate::rules::FlockRules;

/// Configuration for a flock.
///
/// Build with method chaining, starting from the defaults:
///
/// ```ignore
/// let config = FlockConfig::default()
///     .with_agent_count(20_000)
///     .with_world_half_extent(100.0)
///     .with_cohesion(5.0, 0.01);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlockConfig {
    /// Number of agents. Fixed for the simulation's lifetime.
    pub agent_count: u32,
    /// Steering rule radii, weights and speed cap.
    pub rules: FlockRules,
    /// Half the side of the cubic world. Agents wrap at `±world_half_extent`.
    pub world_half_extent: f32,
    /// Agents per parallel work item (CPU split size, GPU workgroup size).
    pub workgroup_size: u32,
    /// Seed for the default random spawner.
    pub seed: u64,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            agent_count: 5_000,
            rules: FlockRules::default(),
            world_half_extent: 100.0,
            workgroup_size: 128,
            seed: 1,
        }
    }
}

impl FlockConfig {
    /// Set the number of agents.
    pub fn with_agent_count(mut self, count: u32) -> Self {
        self.agent_count = count;
        self
    }

    /// Replace all rule parameters at once.
    pub fn with_rules(mut self, rules: FlockRules) -> Self {
        self.rules = rules;
        self
    }

    /// Set cohesion (rule 1) radius and weight.
    pub fn with_cohesion(mut self, distance: f32, scale: f32) -> Self {
        self.rules.rule1_distance = distance;
        self.rules.rule1_scale = scale;
        self
    }

    /// Set separation (rule 2) radius and weight.
    pub fn with_separation(mut self, distance: f32, scale: f32) -> Self {
        self.rules.rule2_distance = distance;
        self.rules.rule2_scale = scale;
        self
    }

    /// Set alignment (rule 3) radius and weight.
    pub fn with_alignment(mut self, distance: f32, scale: f32) -> Self {
        self.rules.rule3_distance = distance;
        self.rules.rule3_scale = scale;
        self
    }

    /// Set the speed cap.
    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.rules.max_speed = max_speed;
        self
    }

    /// Set the world half-extent (cube from `-extent` to `+extent`).
    pub fn with_world_half_extent(mut self, extent: f32) -> Self {
        self.world_half_extent = extent;
        self
    }

    /// Set the worker-group size.
    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size;
        self
    }

    /// Set the spawner seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check that a grid can be built from this configuration.
    pub fn validate(&self) -> Result<(), FlockError> {
        if self.agent_count == 0 {
            return Err(invalid("agent_count must be at least 1"));
        }
        if self.agent_count > i32::MAX as u32 {
            return Err(invalid("agent_count must not exceed i32::MAX"));
        }
        if self.workgroup_size == 0 {
            return Err(invalid("workgroup_size must be at least 1"));
        }

        let r = &self.rules;
        for (name, value) in [
            ("rule1_distance", r.rule1_distance),
            ("rule2_distance", r.rule2_distance),
            ("rule3_distance", r.rule3_distance),
            ("max_speed", r.max_speed),
            ("world_half_extent", self.world_half_extent),
        ] {
            if !value.is_finite() || value <= 0.0 {
                let msg = format!("{} must be positive and finite, got {}", name, value);
                return Err(invalid(&msg));
            }
        }
        for (name, value) in [
            ("rule1_scale", r.rule1_scale),
            ("rule2_scale", r.rule2_scale),
            ("rule3_scale", r.rule3_scale),
        ] {
            if !value.is_finite() {
                let msg = format!("{} must be finite, got {}", name, value);
                return Err(invalid(&msg));
            }
        }

        let half_side = (self.world_half_extent / r.max_distance()).floor() as f64 + 1.0;
        let side = 2.0 * half_side;
        if side * side * side > u32::MAX as f64 {
            return Err(invalid(&format!(
                "grid of {} cells per side overflows a u32 cell index",
                side
            )));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> FlockError {
    FlockError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(FlockConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_sets_rules() {
        let config = FlockConfig::default()
            .with_agent_count(10)
            .with_cohesion(7.0, 0.5)
            .with_separation(2.0, 0.25)
            .with_alignment(6.0, 0.75)
            .with_max_speed(3.0);

        assert_eq!(config.agent_count, 10);
        assert_eq!(config.rules.rule1_distance, 7.0);
        assert_eq!(config.rules.rule2_scale, 0.25);
        assert_eq!(config.rules.rule3_scale, 0.75);
        assert_eq!(config.rules.max_speed, 3.0);
    }

    #[test]
    fn test_rejects_zero_agents() {
        let err = FlockConfig::default().with_agent_count(0).validate();
        assert!(matches!(err, Err(FlockError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_non_positive_radius() {
        let err = FlockConfig::default().with_separation(0.0, 0.1).validate();
        match err {
            Err(FlockError::InvalidConfig(msg)) => assert!(msg.contains("rule2_distance")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_nan_scale() {
        let err = FlockConfig::default()
            .with_alignment(5.0, f32::NAN)
            .validate();
        assert!(matches!(err, Err(FlockError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_oversized_grid() {
        let config = FlockConfig::default()
            .with_cohesion(0.001, 0.01)
            .with_separation(0.001, 0.1)
            .with_alignment(0.001, 0.1)
            .with_world_half_extent(1000.0);
        assert!(matches!(config.validate(), Err(FlockError::InvalidConfig(_))));
    }
}
