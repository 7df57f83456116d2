//! The simulation context and the backend-independent stepping surface.

use std::fmt;
use std::str::FromStr;

use glam::Vec3;

use crate::buffers::{try_alloc, PingPong};
use crate::config::FlockConfig;
use crate::error::FlockError;
use crate::spatial::{CellBounds, GridGeometry};
use crate::spawn::{check_state, spawn_agents, RandomSpawner, Spawner};
use crate::stages;
use crate::time::{Stage, StepHook, StepTiming, Stopwatch};

/// How a step finds each agent's neighbors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborSearch {
    /// All pairs, O(N²). The correctness reference.
    Naive,
    /// Uniform grid, reading the unsorted buffers through the permutation.
    Scattered,
    /// Uniform grid, after gathering the buffers into cell order.
    Coherent,
}

impl NeighborSearch {
    pub const ALL: [NeighborSearch; 3] = [
        NeighborSearch::Naive,
        NeighborSearch::Scattered,
        NeighborSearch::Coherent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NeighborSearch::Naive => "naive",
            NeighborSearch::Scattered => "scattered",
            NeighborSearch::Coherent => "coherent",
        }
    }

    /// Whether the step builds the uniform grid.
    pub fn uses_grid(&self) -> bool {
        !matches!(self, NeighborSearch::Naive)
    }
}

impl fmt::Display for NeighborSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NeighborSearch {
    type Err = FlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "naive" | "brute" => Ok(NeighborSearch::Naive),
            "scattered" | "uniform" => Ok(NeighborSearch::Scattered),
            "coherent" => Ok(NeighborSearch::Coherent),
            other => Err(FlockError::InvalidConfig(format!(
                "unknown neighbor search '{}', expected naive, scattered or coherent",
                other
            ))),
        }
    }
}

/// Agent state in agent-id order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlockSnapshot {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
}

impl FlockSnapshot {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Largest per-component difference in position or velocity.
    /// Infinite when the snapshots hold different agent counts.
    pub fn max_difference(&self, other: &FlockSnapshot) -> f32 {
        if self.len() != other.len() || self.velocities.len() != other.velocities.len() {
            return f32::INFINITY;
        }
        let pos = self.positions.iter().zip(&other.positions);
        let vel = self.velocities.iter().zip(&other.velocities);
        pos.chain(vel)
            .map(|(a, b)| (*a - *b).abs().max_element())
            .fold(0.0, f32::max)
    }
}

/// Stepping surface shared by the CPU and GPU backends.
pub trait FlockBackend {
    fn config(&self) -> &FlockConfig;

    fn grid(&self) -> &GridGeometry;

    /// Advance the flock by `dt` using the given neighbor search.
    fn step(&mut self, search: NeighborSearch, dt: f32) -> Result<(), FlockError>;

    /// Copy of the current state, in agent-id order.
    fn snapshot(&self) -> Result<FlockSnapshot, FlockError>;

    /// Release all buffers. Calling it again does nothing.
    fn shutdown(&mut self);

    fn is_shut_down(&self) -> bool;

    /// Steps completed since initialization.
    fn steps_taken(&self) -> u64;

    fn step_naive(&mut self, dt: f32) -> Result<(), FlockError> {
        self.step(NeighborSearch::Naive, dt)
    }

    fn step_scattered_grid(&mut self, dt: f32) -> Result<(), FlockError> {
        self.step(NeighborSearch::Scattered, dt)
    }

    fn step_coherent_grid(&mut self, dt: f32) -> Result<(), FlockError> {
        self.step(NeighborSearch::Coherent, dt)
    }
}

/// Everything a CPU flock allocates.
struct FlockBuffers {
    positions: PingPong<Vec<Vec3>>,
    velocities: PingPong<Vec<Vec3>>,
    /// Agent id held by each slot. Only the coherent gather changes it.
    agent_ids: PingPong<Vec<u32>>,
    cell_keys: Vec<u32>,
    sorted_slots: Vec<u32>,
    sort_scratch: Vec<u64>,
    bounds: CellBounds,
}

impl FlockBuffers {
    fn new(
        grid: &GridGeometry,
        positions: Vec<Vec3>,
        velocities: Vec<Vec3>,
    ) -> Result<Self, FlockError> {
        let n = positions.len();
        let ids: Vec<u32> = (0..n as u32).collect();

        Ok(Self {
            positions: PingPong::new(positions, try_alloc("positions_next", n, Vec3::ZERO)?),
            velocities: PingPong::new(velocities, try_alloc("velocities_next", n, Vec3::ZERO)?),
            agent_ids: PingPong::new(ids, try_alloc("agent_ids_next", n, 0)?),
            cell_keys: try_alloc("cell_keys", n, 0)?,
            sorted_slots: try_alloc("sorted_slots", n, 0)?,
            sort_scratch: try_alloc("sort_scratch", n, 0)?,
            bounds: CellBounds::new(grid.cell_count)?,
        })
    }

    /// Cell assignment, sort and boundary location over the current positions.
    fn build_grid(&mut self, grid: &GridGeometry, chunk: usize, watch: &mut Stopwatch) {
        stages::assign_cells(
            grid,
            self.positions.current(),
            &mut self.cell_keys,
            &mut self.sorted_slots,
            chunk,
        );
        watch.lap(Stage::AssignCells);

        let scratch = &mut self.sort_scratch;
        stages::sort_by_key(&mut self.cell_keys, &mut self.sorted_slots, scratch);
        watch.lap(Stage::Sort);

        stages::locate_cell_bounds(&self.cell_keys, &self.bounds, chunk);
        watch.lap(Stage::LocateBounds);
    }

    /// Rewrite positions, velocities and ids into cell order.
    fn gather_sorted(&mut self, chunk: usize) {
        let order = &self.sorted_slots;

        let (src, dst) = self.positions.split_mut();
        stages::gather(src, order, dst, chunk);
        self.positions.swap();

        let (src, dst) = self.velocities.split_mut();
        stages::gather(src, order, dst, chunk);
        self.velocities.swap();

        let (src, dst) = self.agent_ids.split_mut();
        stages::gather(src, order, dst, chunk);
        self.agent_ids.swap();
    }
}

/// A flock simulated on the CPU with rayon.
///
/// Every stage is one parallel pass over the agents. Buffers are allocated
/// once in [`Flock::initialize`] and released by [`FlockBackend::shutdown`]
/// or on drop.
pub struct Flock {
    config: FlockConfig,
    grid: GridGeometry,
    buffers: Option<FlockBuffers>,
    step_count: u64,
    hook: Option<StepHook>,
}

impl Flock {
    /// Create a flock with randomly spawned agents.
    pub fn initialize(config: FlockConfig) -> Result<Self, FlockError> {
        Self::initialize_with(config, RandomSpawner)
    }

    /// Create a flock whose initial state comes from `spawner`.
    pub fn initialize_with(
        config: FlockConfig,
        mut spawner: impl Spawner,
    ) -> Result<Self, FlockError> {
        config.validate()?;
        let (positions, velocities) = spawn_agents(&config, &mut spawner)?;
        Self::build(config, positions, velocities)
    }

    /// Create a flock from explicit state. Both vectors are indexed by agent id.
    pub fn from_state(
        config: FlockConfig,
        positions: Vec<Vec3>,
        velocities: Vec<Vec3>,
    ) -> Result<Self, FlockError> {
        let config = check_state(config, &positions, &velocities)?;
        Self::build(config, positions, velocities)
    }

    fn build(
        config: FlockConfig,
        positions: Vec<Vec3>,
        velocities: Vec<Vec3>,
    ) -> Result<Self, FlockError> {
        let grid = GridGeometry::new(&config.rules, config.world_half_extent);
        let buffers = FlockBuffers::new(&grid, positions, velocities)?;

        log::info!(
            "Flock initialized: {} agents, {}^3 grid of {} cells (cell width {})",
            config.agent_count,
            grid.side_count,
            grid.cell_count,
            grid.cell_width
        );

        Ok(Self {
            config,
            grid,
            buffers: Some(buffers),
            step_count: 0,
            hook: None,
        })
    }

    /// Install a callback that receives the timing of every step.
    pub fn set_step_hook(&mut self, hook: StepHook) {
        self.hook = Some(hook);
    }

    /// Remove the step callback.
    pub fn clear_step_hook(&mut self) {
        self.hook = None;
    }

    fn buffers(&self) -> Result<&FlockBuffers, FlockError> {
        self.buffers.as_ref().ok_or(FlockError::ShutDown)
    }

    /// Positions in slot order.
    pub fn positions(&self) -> Result<&[Vec3], FlockError> {
        Ok(self.buffers()?.positions.current())
    }

    /// Velocities in slot order.
    pub fn velocities(&self) -> Result<&[Vec3], FlockError> {
        Ok(self.buffers()?.velocities.current())
    }

    /// Agent id held by each slot.
    pub fn agent_ids(&self) -> Result<&[u32], FlockError> {
        Ok(self.buffers()?.agent_ids.current())
    }

    /// Cell ids from the last grid build, in sorted order.
    pub fn sorted_cell_keys(&self) -> Result<&[u32], FlockError> {
        Ok(&self.buffers()?.cell_keys)
    }

    /// Slot permutation from the last grid build.
    ///
    /// After a coherent step the buffers have already been gathered by it,
    /// so it no longer indexes the current slots.
    pub fn sorted_slots(&self) -> Result<&[u32], FlockError> {
        Ok(&self.buffers()?.sorted_slots)
    }

    /// Boundary table from the last grid build.
    pub fn cell_bounds(&self) -> Result<&CellBounds, FlockError> {
        Ok(&self.buffers()?.bounds)
    }

    /// Rebuild the grid over the current positions without stepping.
    pub fn rebuild_grid(&mut self) -> Result<(), FlockError> {
        let chunk = self.chunk();
        let grid = self.grid;
        let buffers = self.buffers.as_mut().ok_or(FlockError::ShutDown)?;
        buffers.build_grid(&grid, chunk, &mut Stopwatch::start());
        Ok(())
    }

    fn chunk(&self) -> usize {
        self.config.workgroup_size as usize
    }
}

impl FlockBackend for Flock {
    fn config(&self) -> &FlockConfig {
        &self.config
    }

    fn grid(&self) -> &GridGeometry {
        &self.grid
    }

    fn step(&mut self, search: NeighborSearch, dt: f32) -> Result<(), FlockError> {
        if !dt.is_finite() {
            let msg = format!("time step must be finite, got {}", dt);
            return Err(FlockError::InvalidConfig(msg));
        }
        let chunk = self.chunk();
        let grid = self.grid;
        let rules = self.config.rules;
        let extent = self.config.world_half_extent;
        let b = self.buffers.as_mut().ok_or(FlockError::ShutDown)?;
        let mut watch = Stopwatch::start();

        match search {
            NeighborSearch::Naive => {
                let (vel, vel_out) = b.velocities.split_mut();
                stages::aggregate_naive(&rules, b.positions.current(), vel, vel_out, chunk);
            }
            NeighborSearch::Scattered => {
                b.build_grid(&grid, chunk, &mut watch);
                let (vel, vel_out) = b.velocities.split_mut();
                stages::aggregate_scattered(
                    &rules,
                    &grid,
                    &b.bounds,
                    &b.sorted_slots,
                    b.positions.current(),
                    vel,
                    vel_out,
                    chunk,
                );
            }
            NeighborSearch::Coherent => {
                b.build_grid(&grid, chunk, &mut watch);
                b.gather_sorted(chunk);
                watch.lap(Stage::Gather);
                let (vel, vel_out) = b.velocities.split_mut();
                stages::aggregate_coherent(
                    &rules,
                    &grid,
                    &b.bounds,
                    b.positions.current(),
                    vel,
                    vel_out,
                    chunk,
                );
            }
        }
        watch.lap(Stage::Aggregate);

        b.velocities.swap();
        let positions = b.positions.current_mut();
        stages::integrate(positions, b.velocities.current(), dt, extent, chunk);
        watch.lap(Stage::Integrate);

        let timing = watch.finish(self.step_count, search);
        self.step_count += 1;
        log::debug!("step {} ({}) took {:?}", timing.step, search, timing.total);
        if let Some(hook) = self.hook.as_mut() {
            hook(&timing);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<FlockSnapshot, FlockError> {
        let b = self.buffers()?;
        let n = self.config.agent_count as usize;
        let mut snapshot = FlockSnapshot {
            positions: try_alloc("snapshot_positions", n, Vec3::ZERO)?,
            velocities: try_alloc("snapshot_velocities", n, Vec3::ZERO)?,
        };
        let slots = b.positions.current().iter().zip(b.velocities.current());
        for (&id, (pos, vel)) in b.agent_ids.current().iter().zip(slots) {
            snapshot.positions[id as usize] = *pos;
            snapshot.velocities[id as usize] = *vel;
        }
        Ok(snapshot)
    }

    fn shutdown(&mut self) {
        if self.buffers.take().is_some() {
            log::debug!("Flock shut down after {} steps", self.step_count);
        } else {
            log::warn!("Flock::shutdown called twice");
        }
    }

    fn is_shut_down(&self) -> bool {
        self.buffers.is_none()
    }

    fn steps_taken(&self) -> u64 {
        self.step_count
    }
}

impl fmt::Debug for Flock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flock")
            .field("config", &self.config)
            .field("grid", &self.grid)
            .field("shut_down", &self.is_shut_down())
            .field("step_count", &self.step_count)
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn small_flock(count: u32) -> Flock {
        let config = FlockConfig::default()
            .with_agent_count(count)
            .with_world_half_extent(15.0)
            .with_workgroup_size(8);
        Flock::initialize(config).unwrap()
    }

    #[test]
    fn test_neighbor_search_from_str() {
        let parse = |s: &str| s.parse::<NeighborSearch>().ok();
        assert_eq!(parse("coherent"), Some(NeighborSearch::Coherent));
        assert_eq!(parse("Scattered"), Some(NeighborSearch::Scattered));
        assert_eq!(parse("brute"), Some(NeighborSearch::Naive));
        assert_eq!(parse("octree"), None);
        assert!(!NeighborSearch::Naive.uses_grid());
    }

    #[test]
    fn test_initialize_sets_identity_ids() {
        let flock = small_flock(40);
        let ids = flock.agent_ids().unwrap();
        assert!(ids.iter().enumerate().all(|(slot, &id)| slot as u32 == id));
        assert_eq!(flock.positions().unwrap().len(), 40);
    }

    #[test]
    fn test_coherent_step_permutes_slots_but_not_snapshot_order() {
        let mut flock = small_flock(60);
        let before = flock.snapshot().unwrap();
        flock.step_coherent_grid(0.0).unwrap();

        let mut ids = flock.agent_ids().unwrap().to_vec();
        ids.sort_unstable();
        assert_eq!(ids, (0..60).collect::<Vec<u32>>());

        // With dt = 0 positions stay put, in agent-id order.
        let after = flock.snapshot().unwrap();
        assert_eq!(before.positions, after.positions);
    }

    #[test]
    fn test_step_hook_receives_timings() {
        let mut flock = small_flock(20);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        flock.set_step_hook(Box::new(move |t: &StepTiming| {
            let entry = (t.step, t.search, t.stages.len());
            sink.lock().unwrap().push(entry);
        }));

        flock.step_naive(1.0).unwrap();
        flock.step_scattered_grid(1.0).unwrap();
        flock.step_coherent_grid(1.0).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (0, NeighborSearch::Naive, 2),
                (1, NeighborSearch::Scattered, 5),
                (2, NeighborSearch::Coherent, 6),
            ]
        );
        assert_eq!(flock.steps_taken(), 3);
    }

    #[test]
    fn test_rejects_non_finite_dt() {
        let mut flock = small_flock(4);
        let err = flock.step_naive(f32::NAN);
        assert!(matches!(err, Err(FlockError::InvalidConfig(_))));
        assert_eq!(flock.steps_taken(), 0);
    }

    #[test]
    fn test_from_state_checks_lengths() {
        let config = FlockConfig::default();
        let err = Flock::from_state(config, vec![Vec3::ZERO; 3], vec![Vec3::ZERO; 2]);
        assert!(matches!(err, Err(FlockError::InvalidConfig(_))));

        let flock = Flock::from_state(config, vec![Vec3::ZERO; 3], vec![Vec3::ZERO; 3]).unwrap();
        assert_eq!(flock.config().agent_count, 3);
    }

    #[test]
    fn test_max_difference() {
        let a = FlockSnapshot {
            positions: vec![Vec3::ZERO, Vec3::ONE],
            velocities: vec![Vec3::ZERO, Vec3::ZERO],
        };
        let mut b = a.clone();
        b.velocities[1].y = 0.25;
        assert_eq!(a.max_difference(&a), 0.0);
        assert_eq!(a.max_difference(&b), 0.25);
        assert_eq!(a.max_difference(&FlockSnapshot::default()), f32::INFINITY);
    }
}
