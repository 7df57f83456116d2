//! GPU-resident flock.
//!
//! Positions and velocities live in ping-pong storage buffers as `vec4<f32>`
//! (w unused). Every stage is one compute pass. Bind groups are built up
//! front for each combination of active position and velocity slot, so
//! stepping only records passes and flips indices.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use wgpu::util::DeviceExt;

use super::{
    bind_buffers, check_binding_size, check_workgroup_size, compose_shader, create_compute_pipeline,
    dispatch, pop_error_scopes, push_error_scopes, read_buffer, workgroups_for, FlockParams,
    GpuContext, SpatialGpu,
};
use crate::buffers::{try_alloc, PingPong};
use crate::config::FlockConfig;
use crate::error::{FlockError, GpuError};
use crate::flock::{FlockBackend, FlockSnapshot, NeighborSearch};
use crate::spatial::{CellBounds, GridGeometry};
use crate::spawn::{check_state, spawn_agents, RandomSpawner, Spawner};
use crate::time::{StepHook, StepTiming};

/// Bind groups indexed by `[position slot][velocity slot]`.
type SlotBindGroups = [[wgpu::BindGroup; 2]; 2];

fn per_slot(build: impl Fn(usize, usize) -> wgpu::BindGroup) -> SlotBindGroups {
    [0, 1].map(|p| [0, 1].map(|v| build(p, v)))
}

/// A compute pass recorded during a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kernel {
    BuildGrid,
    Naive,
    Scattered,
    Gather,
    Coherent,
    Integrate,
}

/// The passes of one step and the slots the data ends up in.
#[derive(Clone, Debug, PartialEq, Eq)]
struct StepPlan {
    /// `(kernel, position slot, velocity slot)` in dispatch order.
    kernels: Vec<(Kernel, usize, usize)>,
    position_slot: usize,
    velocity_slot: usize,
}

/// Plan a step that starts with positions in slot `p` and velocities in
/// slot `v`.
///
/// Aggregation writes the other velocity slot. The gather writes the other
/// slot of positions, velocities and agent ids. Integration runs in place.
fn plan_step(search: NeighborSearch, p: usize, v: usize) -> StepPlan {
    let mut kernels = Vec::with_capacity(4);
    let (p, v) = match search {
        NeighborSearch::Naive => {
            kernels.push((Kernel::Naive, p, v));
            (p, 1 - v)
        }
        NeighborSearch::Scattered => {
            kernels.push((Kernel::BuildGrid, p, v));
            kernels.push((Kernel::Scattered, p, v));
            (p, 1 - v)
        }
        NeighborSearch::Coherent => {
            kernels.push((Kernel::BuildGrid, p, v));
            kernels.push((Kernel::Gather, p, v));
            kernels.push((Kernel::Coherent, 1 - p, 1 - v));
            (1 - p, v)
        }
    };
    kernels.push((Kernel::Integrate, p, v));
    StepPlan {
        kernels,
        position_slot: p,
        velocity_slot: v,
    }
}

/// A compute pipeline with one bind group per slot combination.
struct SlotKernel {
    label: &'static str,
    pipeline: wgpu::ComputePipeline,
    bind_groups: SlotBindGroups,
}

impl SlotKernel {
    fn new<'a>(
        device: &wgpu::Device,
        label: &'static str,
        source: String,
        buffers: impl Fn(usize, usize) -> Vec<&'a wgpu::Buffer>,
    ) -> Self {
        let pipeline = create_compute_pipeline(device, source, label, None);
        let bind_groups = per_slot(|p, v| bind_buffers(device, label, &pipeline, &buffers(p, v)));
        Self {
            label,
            pipeline,
            bind_groups,
        }
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, p: usize, v: usize, workgroups: u32) {
        dispatch(
            encoder,
            self.label,
            &self.pipeline,
            &self.bind_groups[p][v],
            workgroups,
        );
    }
}

/// Everything a GPU flock allocates.
struct GpuFlockState {
    params: FlockParams,
    params_buffer: wgpu::Buffer,
    positions: PingPong<wgpu::Buffer>,
    velocities: PingPong<wgpu::Buffer>,
    agent_ids: PingPong<wgpu::Buffer>,
    spatial: SpatialGpu,

    naive: SlotKernel,
    scattered: SlotKernel,
    coherent: SlotKernel,
    gather: SlotKernel,
    integrate: SlotKernel,

    agent_workgroups: u32,
}

impl GpuFlockState {
    /// Record one full step. Leaves the ping-pong indices where the
    /// recorded passes will leave the data.
    fn encode_step(&mut self, encoder: &mut wgpu::CommandEncoder, search: NeighborSearch) {
        let plan = plan_step(search, self.positions.active(), self.velocities.active());
        for &(kernel, p, v) in &plan.kernels {
            let pass = match kernel {
                Kernel::BuildGrid => {
                    self.spatial.encode(encoder, p);
                    continue;
                }
                Kernel::Naive => &self.naive,
                Kernel::Scattered => &self.scattered,
                Kernel::Gather => &self.gather,
                Kernel::Coherent => &self.coherent,
                Kernel::Integrate => &self.integrate,
            };
            pass.encode(encoder, p, v, self.agent_workgroups);
        }

        // Agent ids move with positions
        if plan.position_slot != self.positions.active() {
            self.positions.swap();
            self.agent_ids.swap();
        }
        if plan.velocity_slot != self.velocities.active() {
            self.velocities.swap();
        }
    }
}

/// A flock simulated with wgpu compute shaders.
///
/// Same stepping surface as [`crate::Flock`]. State stays on the GPU between
/// steps; [`FlockBackend::snapshot`] reads it back. A failed step releases
/// every buffer, after which the flock reports [`FlockError::ShutDown`].
pub struct GpuFlock {
    config: FlockConfig,
    grid: GridGeometry,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    state: Option<GpuFlockState>,
    step_count: u64,
    hook: Option<StepHook>,
}

impl GpuFlock {
    /// Create a flock with randomly spawned agents.
    pub fn initialize(ctx: &GpuContext, config: FlockConfig) -> Result<Self, FlockError> {
        Self::initialize_with(ctx, config, RandomSpawner)
    }

    /// Create a flock whose initial state comes from `spawner`.
    pub fn initialize_with(
        ctx: &GpuContext,
        config: FlockConfig,
        mut spawner: impl Spawner,
    ) -> Result<Self, FlockError> {
        config.validate()?;
        let (positions, velocities) = spawn_agents(&config, &mut spawner)?;
        Self::build(ctx, config, &positions, &velocities)
    }

    /// Create a flock from explicit state, indexed by agent id.
    pub fn from_state(
        ctx: &GpuContext,
        config: FlockConfig,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> Result<Self, FlockError> {
        let config = check_state(config, positions, velocities)?;
        Self::build(ctx, config, positions, velocities)
    }

    fn build(
        ctx: &GpuContext,
        config: FlockConfig,
        positions: &[Vec3],
        velocities: &[Vec3],
    ) -> Result<Self, FlockError> {
        let device = ctx.device();
        let limits = ctx.limits();
        let grid = GridGeometry::new(&config.rules, config.world_half_extent);
        let params = FlockParams::new(&config, &grid);
        let n = config.agent_count;
        let wg = config.workgroup_size;

        check_workgroup_size(wg, limits)?;
        let storage_limit = limits.max_storage_buffers_per_shader_stage;
        if storage_limit < 7 {
            let msg = format!(
                "the gather kernel binds 7 storage buffers, device allows {}",
                storage_limit
            );
            return Err(GpuError::Unsupported(msg).into());
        }
        let vec_bytes = n as u64 * 16;
        check_binding_size("positions", vec_bytes, limits)?;
        let agent_workgroups = workgroups_for("aggregate", n, wg, limits)?;

        push_error_scopes(device);

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Flock Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let to_vec4 = |v: &[Vec3]| -> Vec<[f32; 4]> {
            v.iter().map(|p| [p.x, p.y, p.z, 0.0]).collect()
        };
        let ids: Vec<u32> = (0..n).collect();
        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::VERTEX
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let init = |label: &str, contents: &[u8]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
        };
        let empty = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };

        let positions = PingPong::new(
            init("Positions A", bytemuck::cast_slice(&to_vec4(positions))),
            empty("Positions B", vec_bytes),
        );
        let velocities = PingPong::new(
            init("Velocities A", bytemuck::cast_slice(&to_vec4(velocities))),
            empty("Velocities B", vec_bytes),
        );
        let agent_ids = PingPong::new(
            init("Agent Ids A", bytemuck::cast_slice(&ids)),
            empty("Agent Ids B", n as u64 * 4),
        );

        let spatial = SpatialGpu::new(device, limits, &params, &params_buffer, &positions, wg);
        let spatial = match spatial {
            Ok(spatial) => spatial,
            Err(e) => {
                let _ = pop_error_scopes(device);
                return Err(e.into());
            }
        };

        let naive = SlotKernel::new(
            device,
            "Naive Aggregate",
            compose_shader(wg, NAIVE_WGSL),
            |p, v| {
                vec![
                    positions.slot(p),
                    velocities.slot(v),
                    velocities.slot(1 - v),
                    &params_buffer,
                ]
            },
        );
        let scattered = SlotKernel::new(
            device,
            "Scattered Aggregate",
            compose_shader(wg, SCATTERED_WGSL),
            |p, v| {
                vec![
                    positions.slot(p),
                    velocities.slot(v),
                    velocities.slot(1 - v),
                    spatial.sorted_slots(),
                    spatial.cell_start(),
                    spatial.cell_end(),
                    &params_buffer,
                ]
            },
        );
        let coherent = SlotKernel::new(
            device,
            "Coherent Aggregate",
            compose_shader(wg, COHERENT_WGSL),
            |p, v| {
                vec![
                    positions.slot(p),
                    velocities.slot(v),
                    velocities.slot(1 - v),
                    spatial.cell_start(),
                    spatial.cell_end(),
                    &params_buffer,
                ]
            },
        );
        let gather = SlotKernel::new(
            device,
            "Gather Sorted",
            compose_shader(wg, GATHER_WGSL),
            |p, v| {
                vec![
                    positions.slot(p),
                    velocities.slot(v),
                    agent_ids.slot(p),
                    spatial.sorted_slots(),
                    positions.slot(1 - p),
                    velocities.slot(1 - v),
                    agent_ids.slot(1 - p),
                    &params_buffer,
                ]
            },
        );
        let integrate = SlotKernel::new(
            device,
            "Integrate",
            compose_shader(wg, INTEGRATE_WGSL),
            |p, v| vec![positions.slot(p), velocities.slot(v), &params_buffer],
        );

        if let Err(e) = pop_error_scopes(device) {
            return Err(match e {
                GpuError::OutOfMemory(_) => FlockError::Allocation {
                    buffer: "gpu flock buffers",
                    bytes: (vec_bytes * 4) as usize,
                },
                other => other.into(),
            });
        }

        log::info!(
            "GpuFlock initialized: {} agents, {}^3 grid of {} cells, {} sort passes per step",
            n,
            grid.side_count,
            grid.cell_count,
            spatial.sort_pass_count()
        );

        Ok(Self {
            config,
            grid,
            device: Arc::clone(ctx.device()),
            queue: Arc::clone(ctx.queue()),
            state: Some(GpuFlockState {
                params,
                params_buffer,
                positions,
                velocities,
                agent_ids,
                spatial,
                naive,
                scattered,
                coherent,
                gather,
                integrate,
                agent_workgroups,
            }),
            step_count: 0,
            hook: None,
        })
    }

    /// Install a callback that receives the timing of every step.
    pub fn set_step_hook(&mut self, hook: StepHook) {
        self.hook = Some(hook);
    }

    fn state(&self) -> Result<&GpuFlockState, FlockError> {
        self.state.as_ref().ok_or(FlockError::ShutDown)
    }

    /// Current position buffer (`vec4<f32>` per slot), for renderers.
    pub fn position_buffer(&self) -> Result<&wgpu::Buffer, FlockError> {
        Ok(self.state()?.positions.current())
    }

    /// Current velocity buffer (`vec4<f32>` per slot), for renderers.
    pub fn velocity_buffer(&self) -> Result<&wgpu::Buffer, FlockError> {
        Ok(self.state()?.velocities.current())
    }

    /// Rebuild the grid over the current positions without stepping.
    pub fn rebuild_grid(&mut self) -> Result<(), FlockError> {
        let state = self.state.as_ref().ok_or(FlockError::ShutDown)?;
        let device = &self.device;
        push_error_scopes(device);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Rebuild Grid Encoder"),
        });
        state.spatial.encode(&mut encoder, state.positions.active());
        self.submit(encoder)
    }

    /// Sorted cell ids of the last grid build, padding excluded.
    pub fn read_sorted_cell_keys(&self) -> Result<Vec<u32>, FlockError> {
        let state = self.state()?;
        let n = state.spatial.agent_count() as usize;
        Ok(read_buffer(&self.device, &self.queue, state.spatial.cell_keys(), n)?)
    }

    /// Slot permutation of the last grid build, padding excluded.
    pub fn read_sorted_slots(&self) -> Result<Vec<u32>, FlockError> {
        let state = self.state()?;
        let n = state.spatial.agent_count() as usize;
        Ok(read_buffer(&self.device, &self.queue, state.spatial.sorted_slots(), n)?)
    }

    /// Boundary table of the last grid build.
    pub fn read_cell_bounds(&self) -> Result<CellBounds, FlockError> {
        let spatial = &self.state()?.spatial;
        let cells = spatial.cell_count() as usize;
        let start = read_buffer(&self.device, &self.queue, spatial.cell_start(), cells)?;
        let end = read_buffer(&self.device, &self.queue, spatial.cell_end(), cells)?;
        Ok(CellBounds::from_raw(start, end))
    }

    /// Agent id held by each slot.
    pub fn read_agent_ids(&self) -> Result<Vec<u32>, FlockError> {
        let state = self.state()?;
        let n = self.config.agent_count as usize;
        Ok(read_buffer(&self.device, &self.queue, state.agent_ids.current(), n)?)
    }

    fn read_vec3(&self, buffer: &wgpu::Buffer) -> Result<Vec<Vec3>, FlockError> {
        let n = self.config.agent_count as usize;
        let raw: Vec<[f32; 4]> = read_buffer(&self.device, &self.queue, buffer, n)?;
        Ok(raw.iter().map(|v| Vec3::new(v[0], v[1], v[2])).collect())
    }

    /// Submit, wait, and tear down on any captured error.
    fn submit(&mut self, encoder: wgpu::CommandEncoder) -> Result<(), FlockError> {
        self.queue.submit(Some(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);
        if let Err(e) = pop_error_scopes(&self.device) {
            log::error!("GPU step failed, releasing flock buffers: {}", e);
            self.state = None;
            return Err(e.into());
        }
        Ok(())
    }
}

impl FlockBackend for GpuFlock {
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
        let start = Instant::now();
        let state = self.state.as_mut().ok_or(FlockError::ShutDown)?;
        let device = &self.device;

        push_error_scopes(device);
        state.params.dt = dt;
        self.queue
            .write_buffer(&state.params_buffer, 0, bytemuck::bytes_of(&state.params));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Flock Step Encoder"),
        });
        state.encode_step(&mut encoder, search);
        self.submit(encoder)?;

        let timing = StepTiming {
            step: self.step_count,
            search,
            total: start.elapsed(),
            stages: Vec::new(),
        };
        self.step_count += 1;
        log::debug!("gpu step {} ({}): {:?}", timing.step, search, timing.total);
        if let Some(hook) = self.hook.as_mut() {
            hook(&timing);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<FlockSnapshot, FlockError> {
        let state = self.state()?;
        let n = self.config.agent_count as usize;
        let positions = self.read_vec3(state.positions.current())?;
        let velocities = self.read_vec3(state.velocities.current())?;
        let ids: Vec<u32> = read_buffer(&self.device, &self.queue, state.agent_ids.current(), n)?;

        let mut snapshot = FlockSnapshot {
            positions: try_alloc("snapshot_positions", n, Vec3::ZERO)?,
            velocities: try_alloc("snapshot_velocities", n, Vec3::ZERO)?,
        };
        for (slot, &id) in ids.iter().enumerate() {
            snapshot.positions[id as usize] = positions[slot];
            snapshot.velocities[id as usize] = velocities[slot];
        }
        Ok(snapshot)
    }

    fn shutdown(&mut self) {
        if self.state.take().is_some() {
            log::debug!("GpuFlock shut down after {} steps", self.step_count);
        } else {
            log::warn!("GpuFlock::shutdown called twice");
        }
    }

    fn is_shut_down(&self) -> bool {
        self.state.is_none()
    }

    fn steps_taken(&self) -> u64 {
        self.step_count
    }
}

impl fmt::Debug for GpuFlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuFlock")
            .field("config", &self.config)
            .field("grid", &self.grid)
            .field("shut_down", &self.is_shut_down())
            .field("step_count", &self.step_count)
            .finish_non_exhaustive()
    }
}

const NAIVE_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> velocities: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> velocities_out: array<vec4<f32>>;
@group(0) @binding(3) var<uniform> params: FlockParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.agent_count {
        return;
    }

    let pos = positions[i].xyz;
    var sums = empty_sums();
    for (var j = 0u; j < params.agent_count; j += 1u) {
        if j != i {
            sums = accumulate_neighbor(sums, params, pos, positions[j].xyz, velocities[j].xyz);
        }
    }
    velocities_out[i] = vec4<f32>(resolve_velocity(sums, params, pos, velocities[i].xyz), 0.0);
}
"#;

/// Grid search, every candidate read through the permutation.
const SCATTERED_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> velocities: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> velocities_out: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> sorted_slots: array<u32>;
@group(0) @binding(4) var<storage, read> cell_start: array<i32>;
@group(0) @binding(5) var<storage, read> cell_end: array<i32>;
@group(0) @binding(6) var<uniform> params: FlockParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.agent_count {
        return;
    }

    let pos = positions[i].xyz;
    let cell = grid_coord(pos, params);
    var sums = empty_sums();
    for (var dz = -1; dz <= 1; dz += 1) {
        for (var dy = -1; dy <= 1; dy += 1) {
            for (var dx = -1; dx <= 1; dx += 1) {
                let neighbor = cell + vec3<i32>(dx, dy, dz);
                if !cell_in_grid(neighbor, params.side_count) {
                    continue;
                }
                let c = flatten_cell(neighbor, params.side_count);
                let start = cell_start[c];
                if start == EMPTY_CELL {
                    continue;
                }
                let end = cell_end[c];
                for (var k = start; k <= end; k += 1) {
                    let j = sorted_slots[k];
                    if j != i {
                        let pj = positions[j].xyz;
                        sums = accumulate_neighbor(sums, params, pos, pj, velocities[j].xyz);
                    }
                }
            }
        }
    }
    velocities_out[i] = vec4<f32>(resolve_velocity(sums, params, pos, velocities[i].xyz), 0.0);
}
"#;

/// Grid search over buffers already in cell order.
const COHERENT_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> velocities: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> velocities_out: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> cell_start: array<i32>;
@group(0) @binding(4) var<storage, read> cell_end: array<i32>;
@group(0) @binding(5) var<uniform> params: FlockParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.agent_count {
        return;
    }

    let pos = positions[i].xyz;
    let cell = grid_coord(pos, params);
    var sums = empty_sums();
    for (var dz = -1; dz <= 1; dz += 1) {
        for (var dy = -1; dy <= 1; dy += 1) {
            for (var dx = -1; dx <= 1; dx += 1) {
                let neighbor = cell + vec3<i32>(dx, dy, dz);
                if !cell_in_grid(neighbor, params.side_count) {
                    continue;
                }
                let c = flatten_cell(neighbor, params.side_count);
                let start = cell_start[c];
                if start == EMPTY_CELL {
                    continue;
                }
                let end = cell_end[c];
                for (var k = start; k <= end; k += 1) {
                    let j = u32(k);
                    if j != i {
                        let pj = positions[j].xyz;
                        sums = accumulate_neighbor(sums, params, pos, pj, velocities[j].xyz);
                    }
                }
            }
        }
    }
    velocities_out[i] = vec4<f32>(resolve_velocity(sums, params, pos, velocities[i].xyz), 0.0);
}
"#;

const GATHER_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> positions_in: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> velocities_in: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> ids_in: array<u32>;
@group(0) @binding(3) var<storage, read> sorted_slots: array<u32>;
@group(0) @binding(4) var<storage, read_write> positions_out: array<vec4<f32>>;
@group(0) @binding(5) var<storage, read_write> velocities_out: array<vec4<f32>>;
@group(0) @binding(6) var<storage, read_write> ids_out: array<u32>;
@group(0) @binding(7) var<uniform> params: FlockParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let k = gid.x;
    if k >= params.agent_count {
        return;
    }

    let src = sorted_slots[k];
    positions_out[k] = positions_in[src];
    velocities_out[k] = velocities_in[src];
    ids_out[k] = ids_in[src];
}
"#;

/// Euler step, then a single-step wrap to the opposite face.
const INTEGRATE_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> positions: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> velocities: array<vec4<f32>>;
@group(0) @binding(2) var<uniform> params: FlockParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.agent_count {
        return;
    }

    let e = params.world_half_extent;
    var p = positions[i].xyz + velocities[i].xyz * params.dt;
    p = select(p, vec3<f32>(e), p < vec3<f32>(-e));
    p = select(p, vec3<f32>(-e), p > vec3<f32>(e));
    positions[i] = vec4<f32>(p, 0.0);
}
"#;
