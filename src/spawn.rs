//! Initial agent state.
//!
//! A flock asks its [`Spawner`] for one `(position, velocity)` pair per agent,
//! in agent-id order, handing it a [`SpawnContext`] with a seeded RNG and
//! helpers for common layouts:
//!
//! ```ignore
//! // Everyone starts in a ball, drifting outward
//! let flock = Flock::initialize_with(config, |ctx: &mut SpawnContext| {
//!     let pos = ctx.random_in_sphere(20.0);
//!     (pos, ctx.outward_velocity(pos, 0.5))
//! })?;
//! ```

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::buffers::try_alloc;
use crate::config::FlockConfig;
use crate::error::FlockError;

/// Context handed to a spawner for each agent.
pub struct SpawnContext<'a> {
    /// Id of the agent being spawned (0 to count-1).
    pub index: u32,
    /// Total number of agents.
    pub count: u32,
    /// World half-extent. Positions must stay in `[-half_extent, half_extent]`.
    pub half_extent: f32,
    /// Speed cap from the rules.
    pub max_speed: f32,
    rng: &'a mut SmallRng,
}

impl<'a> SpawnContext<'a> {
    pub(crate) fn new(index: u32, config: &FlockConfig, rng: &'a mut SmallRng) -> Self {
        Self {
            index,
            count: config.agent_count,
            half_extent: config.world_half_extent,
            max_speed: config.rules.max_speed,
            rng,
        }
    }

    /// Normalized progress through the spawn (0.0 to 1.0).
    #[inline]
    pub fn progress(&self) -> f32 {
        self.index as f32 / self.count as f32
    }

    /// Random point inside a cube of given half-size, centered at origin.
    pub fn random_in_cube(&mut self, half_size: f32) -> Vec3 {
        Vec3::new(
            self.rng.gen_range(-half_size..half_size),
            self.rng.gen_range(-half_size..half_size),
            self.rng.gen_range(-half_size..half_size),
        )
    }

    /// Random point anywhere in the world.
    pub fn random_in_world(&mut self) -> Vec3 {
        self.random_in_cube(self.half_extent)
    }

    /// Random point inside a sphere, uniform in volume.
    pub fn random_in_sphere(&mut self, radius: f32) -> Vec3 {
        // Cube root for uniform volume distribution
        let r = radius * self.rng.gen::<f32>().cbrt();
        self.random_direction() * r
    }

    /// Random unit vector, uniform on the sphere.
    pub fn random_direction(&mut self) -> Vec3 {
        let z: f32 = self.rng.gen_range(-1.0..1.0);
        let theta = self.rng.gen_range(0.0..TAU);
        let r = (1.0 - z * z).max(0.0).sqrt();
        Vec3::new(r * theta.cos(), r * theta.sin(), z)
    }

    /// Velocity pointing away from the origin.
    pub fn outward_velocity(&mut self, position: Vec3, speed: f32) -> Vec3 {
        if position.length_squared() > 0.0001 {
            position.normalize() * speed
        } else {
            self.random_direction() * speed
        }
    }

    /// Position in an evenly spaced 3D lattice filling the world. Zero
    /// dimensions count as one.
    pub fn grid_position(&self, cols: u32, rows: u32, layers: u32) -> Vec3 {
        let (cols, rows, layers) = (cols.max(1), rows.max(1), layers.max(1));
        let plane = cols.saturating_mul(rows);
        let idx = self.index % plane.saturating_mul(layers);

        let x = idx % cols;
        let y = (idx / cols) % rows;
        let z = idx / plane;

        let fx = (x as f32 / (cols - 1).max(1) as f32) * 2.0 - 1.0;
        let fy = (y as f32 / (rows - 1).max(1) as f32) * 2.0 - 1.0;
        let fz = (z as f32 / (layers - 1).max(1) as f32) * 2.0 - 1.0;

        Vec3::new(fx, fy, fz) * self.half_extent
    }
}

/// Source of initial agent state.
pub trait Spawner {
    /// Position and velocity of agent `ctx.index`.
    fn spawn(&mut self, ctx: &mut SpawnContext<'_>) -> (Vec3, Vec3);
}

impl<F> Spawner for F
where
    F: FnMut(&mut SpawnContext<'_>) -> (Vec3, Vec3),
{
    fn spawn(&mut self, ctx: &mut SpawnContext<'_>) -> (Vec3, Vec3) {
        self(ctx)
    }
}

/// Uniform positions over the world, random headings at half the speed cap.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomSpawner;

impl Spawner for RandomSpawner {
    fn spawn(&mut self, ctx: &mut SpawnContext<'_>) -> (Vec3, Vec3) {
        let position = ctx.random_in_world();
        let velocity = ctx.random_direction() * (0.5 * ctx.max_speed);
        (position, velocity)
    }
}

/// Run `spawner` for every agent and check what it returns.
pub(crate) fn spawn_agents(
    config: &FlockConfig,
    spawner: &mut impl Spawner,
) -> Result<(Vec<Vec3>, Vec<Vec3>), FlockError> {
    let count = config.agent_count;
    let extent = config.world_half_extent;
    let mut positions = try_alloc("positions", count as usize, Vec3::ZERO)?;
    let mut velocities = try_alloc("velocities", count as usize, Vec3::ZERO)?;
    let mut rng = SmallRng::seed_from_u64(config.seed);

    for index in 0..count {
        let mut ctx = SpawnContext::new(index, config, &mut rng);
        let (position, velocity) = spawner.spawn(&mut ctx);
        check_agent(index, position, velocity, extent)?;
        positions[index as usize] = position;
        velocities[index as usize] = velocity;
    }

    Ok((positions, velocities))
}

/// Validate caller-supplied state, returning the config resized to it.
pub(crate) fn check_state(
    config: FlockConfig,
    positions: &[Vec3],
    velocities: &[Vec3],
) -> Result<FlockConfig, FlockError> {
    let config = config.with_agent_count(agent_count_for(positions.len())?);
    config.validate()?;
    if velocities.len() != positions.len() {
        return Err(FlockError::InvalidConfig(format!(
            "{} positions but {} velocities",
            positions.len(), velocities.len()
        )));
    }
    for (i, (p, v)) in positions.iter().zip(velocities).enumerate() {
        check_agent(i as u32, *p, *v, config.world_half_extent)?;
    }
    Ok(config)
}

fn agent_count_for(len: usize) -> Result<u32, FlockError> {
    match u32::try_from(len) {
        Ok(count) => Ok(count),
        Err(_) => {
            let msg = format!("{} agents overflow the u32 agent count", len);
            Err(FlockError::InvalidConfig(msg))
        }
    }
}

/// Reject state the grid cannot represent.
fn check_agent(index: u32, position: Vec3, velocity: Vec3, extent: f32) -> Result<(), FlockError> {
    if !position.is_finite() || position.abs().max_element() > extent {
        return Err(FlockError::InvalidConfig(format!(
            "agent {} spawned at {} outside the world [-{}, {}]",
            index, position, extent, extent
        )));
    }
    if !velocity.is_finite() {
        return Err(FlockError::InvalidConfig(format!(
            "agent {} spawned with non-finite velocity {}",
            index, velocity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(count: u32) -> FlockConfig {
        FlockConfig::default()
            .with_agent_count(count)
            .with_world_half_extent(10.0)
    }

    #[test]
    fn test_random_spawner_stays_in_world() {
        let cfg = config(500);
        let (positions, velocities) = spawn_agents(&cfg, &mut RandomSpawner).unwrap();

        assert_eq!(positions.len(), 500);
        assert!(positions.iter().all(|p| p.abs().max_element() <= 10.0));
        for v in &velocities {
            assert!((v.length() - 0.5 * cfg.rules.max_speed).abs() < 1e-5);
        }
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = spawn_agents(&config(64), &mut RandomSpawner).unwrap();
        let b = spawn_agents(&config(64), &mut RandomSpawner).unwrap();
        let c = spawn_agents(&config(64).with_seed(2), &mut RandomSpawner).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn test_closure_spawner() {
        let mut lattice = |ctx: &mut SpawnContext<'_>| {
            (ctx.grid_position(3, 3, 3), Vec3::X * ctx.progress())
        };
        let (positions, velocities) = spawn_agents(&config(27), &mut lattice).unwrap();

        assert_eq!(positions[0], Vec3::splat(-10.0));
        assert_eq!(positions[26], Vec3::splat(10.0));
        assert_eq!(velocities[0], Vec3::ZERO);
    }

    #[test]
    fn test_rejects_agent_outside_world() {
        let mut outside = |_: &mut SpawnContext<'_>| (Vec3::splat(11.0), Vec3::ZERO);
        match spawn_agents(&config(4), &mut outside) {
            Err(FlockError::InvalidConfig(msg)) => assert!(msg.contains("agent 0")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_nan_velocity() {
        let mut nan = |_: &mut SpawnContext<'_>| (Vec3::ZERO, Vec3::NAN);
        let err = spawn_agents(&config(4), &mut nan);
        assert!(matches!(err, Err(FlockError::InvalidConfig(_))));
    }

    #[test]
    fn test_random_in_sphere() {
        let cfg = config(1);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut ctx = SpawnContext::new(0, &cfg, &mut rng);
        for _ in 0..100 {
            assert!(ctx.random_in_sphere(2.0).length() <= 2.0 + 1e-4);
            let v = ctx.outward_velocity(Vec3::new(3.0, 0.0, 0.0), 0.5);
            assert_eq!(v, Vec3::new(0.5, 0.0, 0.0));
        }
    }

    #[test]
    fn test_grid_position_with_zero_dimensions() {
        let cfg = config(5);
        let mut rng = SmallRng::seed_from_u64(1);
        for index in 0..5 {
            let ctx = SpawnContext::new(index, &cfg, &mut rng);
            let pos = ctx.grid_position(0, 0, 0);
            assert!(pos.is_finite());
            assert!(pos.abs().max_element() <= cfg.world_half_extent);
            assert_eq!(ctx.grid_position(0, 4, 1).x, -cfg.world_half_extent);
        }
    }

    #[test]
    fn test_check_state_takes_count_from_positions() {
        let positions = [Vec3::ZERO, Vec3::ONE];
        let checked = check_state(config(9), &positions, &[Vec3::X; 2]).unwrap();
        assert_eq!(checked.agent_count, 2);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_agent_count_overflow_is_rejected() {
        assert_eq!(agent_count_for(u32::MAX as usize).unwrap(), u32::MAX);
        let err = agent_count_for(u32::MAX as usize + 1);
        assert!(matches!(err, Err(FlockError::InvalidConfig(_))));
    }
}
