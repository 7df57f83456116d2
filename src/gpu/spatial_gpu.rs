//! GPU grid build: cell assignment, bitonic sort and boundary table.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::{
    bind_buffers, check_binding_size, compose_shader, create_compute_pipeline, dispatch,
    workgroups_for,
};
use crate::buffers::PingPong;
use crate::error::GpuError;

const SORT_PARAMS_SIZE: u64 = std::mem::size_of::<SortParams>() as u64;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct SortParams {
    /// Size of the bitonic sequences being merged.
    block: u32,
    /// Distance between compared elements.
    stride: u32,
    count: u32,
    _pad: u32,
}

/// `(block, stride)` for every pass of a bitonic network over `count` keys.
fn bitonic_passes(count: u32) -> Vec<(u32, u32)> {
    let mut passes = Vec::new();
    let mut block = 2;
    while block <= count {
        let mut stride = block / 2;
        while stride > 0 {
            passes.push((block, stride));
            stride /= 2;
        }
        block *= 2;
    }
    passes
}

/// GPU resources for rebuilding the uniform grid each step.
pub struct SpatialGpu {
    cell_keys: wgpu::Buffer,
    sorted_slots: wgpu::Buffer,
    cell_start: wgpu::Buffer,
    cell_end: wgpu::Buffer,
    // Keeps the dynamic-offset uniform alive for the sort bind group
    _sort_params: wgpu::Buffer,

    assign_pipeline: wgpu::ComputePipeline,
    bitonic_pipeline: wgpu::ComputePipeline,
    clear_pipeline: wgpu::ComputePipeline,
    locate_pipeline: wgpu::ComputePipeline,

    /// Indexed by the active position slot.
    assign_bind_groups: [wgpu::BindGroup; 2],
    bitonic_bind_group: wgpu::BindGroup,
    clear_bind_group: wgpu::BindGroup,
    locate_bind_group: wgpu::BindGroup,

    sort_offsets: Vec<u32>,
    agent_workgroups: u32,
    padded_workgroups: u32,
    clear_workgroups: u32,
    agent_count: u32,
    cell_count: u32,
}

impl SpatialGpu {
    pub fn new(
        device: &wgpu::Device,
        limits: &wgpu::Limits,
        params: &super::FlockParams,
        params_buffer: &wgpu::Buffer,
        positions: &PingPong<wgpu::Buffer>,
        workgroup_size: u32,
    ) -> Result<Self, GpuError> {
        let agent_count = params.agent_count;
        let padded_count = params.padded_count;
        let cell_count = params.side_count * params.side_count * params.side_count;

        let key_bytes = padded_count as u64 * 4;
        let cell_bytes = cell_count as u64 * 4;
        check_binding_size("cell_keys", key_bytes, limits)?;
        check_binding_size("cell_start", cell_bytes, limits)?;

        let agent_workgroups =
            workgroups_for("locate_bounds", agent_count, workgroup_size, limits)?;
        let padded_workgroups =
            workgroups_for("bitonic_sort", padded_count, workgroup_size, limits)?;
        // The clear kernel strides over the table, so it never needs more than the limit
        let clear_workgroups = cell_count
            .div_ceil(workgroup_size)
            .clamp(1, limits.max_compute_workgroups_per_dimension);

        let storage = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let cell_keys = storage("Cell Keys", key_bytes);
        let sorted_slots = storage("Sorted Slots", key_bytes);
        let cell_start = storage("Cell Start", cell_bytes);
        let cell_end = storage("Cell End", cell_bytes);

        // One 16-byte SortParams per pass, each at an aligned dynamic offset
        let align = (limits.min_uniform_buffer_offset_alignment as u64).max(SORT_PARAMS_SIZE);
        let passes = bitonic_passes(padded_count);
        let mut sort_bytes = vec![0u8; (passes.len().max(1) as u64 * align) as usize];
        let mut sort_offsets = Vec::with_capacity(passes.len());
        for (i, &(block, stride)) in passes.iter().enumerate() {
            let offset = i as u64 * align;
            let entry = SortParams {
                block,
                stride,
                count: padded_count,
                _pad: 0,
            };
            let range = offset as usize..(offset + SORT_PARAMS_SIZE) as usize;
            sort_bytes[range].copy_from_slice(bytemuck::bytes_of(&entry));
            sort_offsets.push(offset as u32);
        }
        let sort_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sort Params"),
            contents: &sort_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let assign_pipeline = create_compute_pipeline(
            device,
            compose_shader(workgroup_size, ASSIGN_CELLS_WGSL),
            "Assign Cells Pipeline",
            None,
        );
        let clear_pipeline = create_compute_pipeline(
            device,
            compose_shader(workgroup_size, CLEAR_BOUNDS_WGSL),
            "Clear Bounds Pipeline",
            None,
        );
        let locate_pipeline = create_compute_pipeline(
            device,
            compose_shader(workgroup_size, LOCATE_BOUNDS_WGSL),
            "Locate Bounds Pipeline",
            None,
        );

        // Dynamic offsets need an explicit layout
        let storage_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bitonic_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bitonic Bind Group Layout"),
            entries: &[
                storage_entry(0),
                storage_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(SORT_PARAMS_SIZE),
                    },
                    count: None,
                },
            ],
        });
        let sort_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bitonic Pipeline Layout"),
            bind_group_layouts: &[&bitonic_layout],
            push_constant_ranges: &[],
        });
        let bitonic_pipeline = create_compute_pipeline(
            device,
            compose_shader(workgroup_size, BITONIC_SORT_WGSL),
            "Bitonic Sort Pipeline",
            Some(&sort_pipeline_layout),
        );

        let assign_bind_groups = [0, 1].map(|slot| {
            bind_buffers(
                device,
                "Assign Cells Bind Group",
                &assign_pipeline,
                &[
                    positions.slot(slot),
                    &cell_keys,
                    &sorted_slots,
                    params_buffer,
                ],
            )
        });
        let bitonic_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bitonic Bind Group"),
            layout: &bitonic_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: cell_keys.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: sorted_slots.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &sort_params,
                        offset: 0,
                        size: NonZeroU64::new(SORT_PARAMS_SIZE),
                    }),
                },
            ],
        });
        let clear_bind_group = bind_buffers(
            device,
            "Clear Bounds Bind Group",
            &clear_pipeline,
            &[&cell_start, &cell_end],
        );
        let locate_bind_group = bind_buffers(
            device,
            "Locate Bounds Bind Group",
            &locate_pipeline,
            &[&cell_keys, &cell_start, &cell_end, params_buffer],
        );

        Ok(Self {
            cell_keys,
            sorted_slots,
            cell_start,
            cell_end,
            _sort_params: sort_params,
            assign_pipeline,
            bitonic_pipeline,
            clear_pipeline,
            locate_pipeline,
            assign_bind_groups,
            bitonic_bind_group,
            clear_bind_group,
            locate_bind_group,
            sort_offsets,
            agent_workgroups,
            padded_workgroups,
            clear_workgroups,
            agent_count,
            cell_count,
        })
    }

    /// Record the grid build over the positions in slot `positions_slot`.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, positions_slot: usize) {
        dispatch(
            encoder,
            "Assign Cells",
            &self.assign_pipeline,
            &self.assign_bind_groups[positions_slot],
            self.padded_workgroups,
        );

        if !self.sort_offsets.is_empty() {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Bitonic Sort"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.bitonic_pipeline);
            for &offset in &self.sort_offsets {
                pass.set_bind_group(0, &self.bitonic_bind_group, &[offset]);
                pass.dispatch_workgroups(self.padded_workgroups, 1, 1);
            }
        }

        dispatch(
            encoder,
            "Clear Bounds",
            &self.clear_pipeline,
            &self.clear_bind_group,
            self.clear_workgroups,
        );
        dispatch(
            encoder,
            "Locate Bounds",
            &self.locate_pipeline,
            &self.locate_bind_group,
            self.agent_workgroups,
        );
    }

    /// Cell ids, sorted after [`SpatialGpu::encode`]. Padded with `u32::MAX`.
    pub fn cell_keys(&self) -> &wgpu::Buffer {
        &self.cell_keys
    }

    /// Slot permutation, grouped by cell after [`SpatialGpu::encode`].
    pub fn sorted_slots(&self) -> &wgpu::Buffer {
        &self.sorted_slots
    }

    pub fn cell_start(&self) -> &wgpu::Buffer {
        &self.cell_start
    }

    pub fn cell_end(&self) -> &wgpu::Buffer {
        &self.cell_end
    }

    pub fn agent_count(&self) -> u32 {
        self.agent_count
    }

    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }

    /// Number of bitonic passes per grid build.
    pub fn sort_pass_count(&self) -> usize {
        self.sort_offsets.len()
    }
}

/// Writes `(slot, cell)` pairs and pads the key array with `u32::MAX`
/// so padding sorts last.
const ASSIGN_CELLS_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read_write> cell_keys: array<u32>;
@group(0) @binding(2) var<storage, read_write> sorted_slots: array<u32>;
@group(0) @binding(3) var<uniform> params: FlockParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.padded_count {
        return;
    }

    if i < params.agent_count {
        let cell = grid_coord(positions[i].xyz, params);
        cell_keys[i] = flatten_cell(cell, params.side_count);
    } else {
        cell_keys[i] = 0xFFFFFFFFu;
    }
    sorted_slots[i] = i;
}
"#;

/// One compare-exchange pass of the bitonic network.
const BITONIC_SORT_WGSL: &str = r#"
struct SortParams {
    block: u32,
    stride: u32,
    count: u32,
    _pad: u32,
};

@group(0) @binding(0) var<storage, read_write> keys: array<u32>;
@group(0) @binding(1) var<storage, read_write> values: array<u32>;
@group(0) @binding(2) var<uniform> sort: SortParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let partner = i ^ sort.stride;
    if i >= sort.count || partner <= i {
        return;
    }

    let ascending = (i & sort.block) == 0u;
    let a = keys[i];
    let b = keys[partner];
    let out_of_order = select(a < b, a > b, ascending);
    if out_of_order {
        keys[i] = b;
        keys[partner] = a;
        let v = values[i];
        values[i] = values[partner];
        values[partner] = v;
    }
}
"#;

/// Resets the boundary table, striding so any table size fits one dispatch.
const CLEAR_BOUNDS_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read_write> cell_start: array<i32>;
@group(0) @binding(1) var<storage, read_write> cell_end: array<i32>;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let total = arrayLength(&cell_start);
    let stride = groups.x * WORKGROUP_SIZE;
    for (var c = gid.x; c < total; c += stride) {
        cell_start[c] = EMPTY_CELL;
        cell_end[c] = EMPTY_CELL;
    }
}
"#;

/// Marks where each cell's run starts and ends in the sorted keys.
const LOCATE_BOUNDS_WGSL: &str = r#"
@group(0) @binding(0) var<storage, read> cell_keys: array<u32>;
@group(0) @binding(1) var<storage, read_write> cell_start: array<i32>;
@group(0) @binding(2) var<storage, read_write> cell_end: array<i32>;
@group(0) @binding(3) var<uniform> params: FlockParams;

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    let n = params.agent_count;
    if i >= n {
        return;
    }

    let curr = cell_keys[i];
    if i == 0u {
        cell_start[curr] = 0;
    } else {
        let prev = cell_keys[i - 1u];
        if prev != curr {
            cell_start[curr] = i32(i);
            cell_end[prev] = i32(i) - 1;
        }
    }
    if i == n - 1u {
        cell_end[curr] = i32(i);
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::tests::validate_wgsl;

    #[test]
    fn test_kernels_validate() {
        for (name, kernel) in [
            ("assign", ASSIGN_CELLS_WGSL),
            ("bitonic", BITONIC_SORT_WGSL),
            ("clear", CLEAR_BOUNDS_WGSL),
            ("locate", LOCATE_BOUNDS_WGSL),
        ] {
            let source = compose_shader(128, kernel);
            if let Err(e) = validate_wgsl(&source) {
                panic!("{} kernel failed validation: {}", name, e);
            }
        }
    }

    #[test]
    fn test_bitonic_pass_count() {
        assert!(bitonic_passes(1).is_empty());
        assert_eq!(bitonic_passes(2), vec![(2, 1)]);
        assert_eq!(bitonic_passes(8).len(), 6);
        // log2(n) * (log2(n) + 1) / 2
        assert_eq!(bitonic_passes(1024).len(), 55);
    }

    /// Host replay of the kernel's compare-exchange rule.
    fn run_network(keys: &mut [u32], values: &mut [u32]) {
        for (block, stride) in bitonic_passes(keys.len() as u32) {
            for i in 0..keys.len() as u32 {
                let partner = i ^ stride;
                if partner <= i {
                    continue;
                }
                let ascending = i & block == 0;
                let (a, b) = (keys[i as usize], keys[partner as usize]);
                let out_of_order = if ascending { a > b } else { a < b };
                if out_of_order {
                    keys.swap(i as usize, partner as usize);
                    values.swap(i as usize, partner as usize);
                }
            }
        }
    }

    #[test]
    fn test_network_sorts_padded_keys() {
        let mut keys = vec![0, 1, 0, 3, 0, 2, 2, 0, 5, 6];
        keys.resize(16, u32::MAX);
        let mut values: Vec<u32> = (0..16).collect();
        run_network(&mut keys, &mut values);

        assert_eq!(&keys[..10], &[0, 0, 0, 0, 1, 2, 2, 3, 5, 6]);
        assert!(keys[10..].iter().all(|&k| k == u32::MAX));
        let mut zeros = values[..4].to_vec();
        zeros.sort();
        assert_eq!(zeros, vec![0, 2, 4, 7]);
        assert_eq!(values[4], 1);
        assert_eq!(&values[7..10], &[3, 8, 9]);
    }
}
