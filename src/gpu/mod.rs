//! wgpu compute backend.
//!
//! [`GpuContext`] owns the device and queue. [`GpuFlock`] keeps every agent
//! buffer GPU-resident and runs each pipeline stage as its own compute pass,
//! with shaders assembled from the WGSL snippets in [`crate::spatial`] and
//! [`crate::rules`].

mod flock_gpu;
mod spatial_gpu;

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

pub use flock_gpu::GpuFlock;
pub use spatial_gpu::SpatialGpu;

use crate::config::FlockConfig;
use crate::error::GpuError;
use crate::rules::RULES_WGSL;
use crate::spatial::{GridGeometry, GRID_WGSL};

/// Device, queue and adapter description.
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
}

impl GpuContext {
    /// Pick a high-performance adapter and open a device with its full limits.
    pub async fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(GpuError::Unsupported(format!(
                "adapter '{}' has no compute shader support",
                adapter_info.name
            )));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Flock Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        log::info!(
            "Using GPU: {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.device_type,
            adapter_info.backend
        );

        let limits = device.limits();
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            limits,
        })
    }

    /// [`GpuContext::new`] for synchronous callers.
    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }
}

/// Uniform block shared by every flock kernel.
///
/// Scalars only, so the Rust and WGSL layouts agree without padding.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct FlockParams {
    pub rule1_distance: f32,
    pub rule2_distance: f32,
    pub rule3_distance: f32,
    pub rule1_scale: f32,
    pub rule2_scale: f32,
    pub rule3_scale: f32,
    pub max_speed: f32,
    pub world_half_extent: f32,
    pub grid_min_x: f32,
    pub grid_min_y: f32,
    pub grid_min_z: f32,
    pub inverse_cell_width: f32,
    pub dt: f32,
    pub side_count: u32,
    pub agent_count: u32,
    /// Agent count rounded up to a power of two, the sort length.
    pub padded_count: u32,
}

impl FlockParams {
    pub fn new(config: &FlockConfig, grid: &GridGeometry) -> Self {
        let r = &config.rules;
        Self {
            rule1_distance: r.rule1_distance,
            rule2_distance: r.rule2_distance,
            rule3_distance: r.rule3_distance,
            rule1_scale: r.rule1_scale,
            rule2_scale: r.rule2_scale,
            rule3_scale: r.rule3_scale,
            max_speed: r.max_speed,
            world_half_extent: config.world_half_extent,
            grid_min_x: grid.world_min.x,
            grid_min_y: grid.world_min.y,
            grid_min_z: grid.world_min.z,
            inverse_cell_width: grid.inverse_cell_width,
            dt: 0.0,
            side_count: grid.side_count,
            agent_count: config.agent_count,
            padded_count: config.agent_count.next_power_of_two(),
        }
    }
}

/// WGSL mirror of [`FlockParams`].
pub const FLOCK_PARAMS_WGSL: &str = r#"
struct FlockParams {
    rule1_distance: f32,
    rule2_distance: f32,
    rule3_distance: f32,
    rule1_scale: f32,
    rule2_scale: f32,
    rule3_scale: f32,
    max_speed: f32,
    world_half_extent: f32,
    grid_min_x: f32,
    grid_min_y: f32,
    grid_min_z: f32,
    inverse_cell_width: f32,
    dt: f32,
    side_count: u32,
    agent_count: u32,
    padded_count: u32,
};
"#;

/// Prefix a kernel with the workgroup size, the params struct and the shared
/// grid and rule helpers.
pub(crate) fn compose_shader(workgroup_size: u32, kernel: &str) -> String {
    format!(
        "const WORKGROUP_SIZE: u32 = {}u;\n{}\n{}\n{}\n{}",
        workgroup_size, FLOCK_PARAMS_WGSL, GRID_WGSL, RULES_WGSL, kernel
    )
}

/// Compile `source` and build a pipeline for its `main` entry point.
///
/// With no explicit layout the bind group layout is derived from the shader,
/// which drops any binding the entry point never touches.
pub(crate) fn create_compute_pipeline(
    device: &wgpu::Device,
    source: String,
    label: &str,
    layout: Option<&wgpu::PipelineLayout>,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout,
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Bind group with whole buffers at consecutive bindings.
pub(crate) fn bind_buffers(
    device: &wgpu::Device,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let layout = pipeline.get_bind_group_layout(0);
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &layout,
        entries: &entries,
    })
}

/// Record one compute pass with a single dispatch.
pub(crate) fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    workgroups: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(workgroups, 1, 1);
}

/// Workgroups needed to cover `items`, checked against the device limit.
pub(crate) fn workgroups_for(
    stage: &'static str,
    items: u32,
    workgroup_size: u32,
    limits: &wgpu::Limits,
) -> Result<u32, GpuError> {
    let workgroups = items.div_ceil(workgroup_size).max(1);
    let limit = limits.max_compute_workgroups_per_dimension;
    if workgroups > limit {
        return Err(GpuError::DispatchTooLarge {
            stage,
            workgroups,
            limit,
        });
    }
    Ok(workgroups)
}

/// Reject storage buffers the device cannot bind.
pub(crate) fn check_binding_size(
    buffer: &'static str,
    bytes: u64,
    limits: &wgpu::Limits,
) -> Result<(), GpuError> {
    let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
    if bytes > limit {
        return Err(GpuError::BufferTooLarge {
            buffer,
            bytes,
            limit,
        });
    }
    Ok(())
}

/// Reject workgroup sizes the device cannot launch.
pub(crate) fn check_workgroup_size(
    workgroup_size: u32,
    limits: &wgpu::Limits,
) -> Result<(), GpuError> {
    let limit = limits
        .max_compute_workgroup_size_x
        .min(limits.max_compute_invocations_per_workgroup);
    if workgroup_size > limit {
        return Err(GpuError::Unsupported(format!(
            "workgroup size {} exceeds the device limit of {}",
            workgroup_size, limit
        )));
    }
    Ok(())
}

/// Capture validation and out-of-memory errors raised until the matching
/// [`pop_error_scopes`].
pub(crate) fn push_error_scopes(device: &wgpu::Device) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
}

pub(crate) fn pop_error_scopes(device: &wgpu::Device) -> Result<(), GpuError> {
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    if let Some(e) = out_of_memory {
        return Err(GpuError::OutOfMemory(e.to_string()));
    }
    if let Some(e) = validation {
        return Err(GpuError::Validation(e.to_string()));
    }
    Ok(())
}

/// Copy the first `count` elements of `buffer` back to the host.
pub(crate) fn read_buffer<T: Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, GpuError> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    if size == 0 {
        return Ok(Vec::new());
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

    let data = {
        let view = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&view).to_vec()
    };
    staging.unmap();
    Ok(data)
}
