//! Error types for the flocking core.
//!
//! Nothing in the stepping logic itself can fail on bad input, since every
//! input is generated internally. What remains is configuration mistakes,
//! resource exhaustion and GPU runtime faults. None of them are recoverable
//! mid-step.

use std::fmt;

/// Errors raised by the GPU backend.
#[derive(Debug)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    NoAdapter,
    /// The adapter exists but cannot run compute work.
    Unsupported(String),
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// A pipeline, bind group or dispatch failed validation.
    Validation(String),
    /// The device ran out of memory while allocating or executing.
    OutOfMemory(String),
    /// A storage buffer would exceed the device binding limit.
    BufferTooLarge {
        buffer: &'static str,
        bytes: u64,
        limit: u64,
    },
    /// A dispatch would exceed the per-dimension workgroup limit.
    DispatchTooLarge {
        stage: &'static str,
        workgroups: u32,
        limit: u32,
    },
    /// Failed to map buffer for reading.
    BufferMapping(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found"),
            GpuError::Unsupported(msg) => {
                write!(f, "GPU adapter cannot run the flock kernels: {}", msg)
            }
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::Validation(msg) => write!(f, "GPU validation failed: {}", msg),
            GpuError::OutOfMemory(msg) => write!(f, "GPU out of memory: {}", msg),
            GpuError::BufferTooLarge {
                buffer,
                bytes,
                limit,
            } => write!(
                f,
                "GPU buffer '{}' needs {} bytes, device binding limit is {}",
                buffer, bytes, limit
            ),
            GpuError::DispatchTooLarge {
                stage,
                workgroups,
                limit,
            } => write!(
                f,
                "Stage '{}' needs {} workgroups, device limit is {}",
                stage, workgroups, limit
            ),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// Errors that can occur when creating or stepping a flock.
#[derive(Debug)]
pub enum FlockError {
    /// The configuration or the supplied initial state is unusable.
    InvalidConfig(String),
    /// A simulation buffer could not be allocated.
    Allocation { buffer: &'static str, bytes: usize },
    /// The GPU backend failed.
    Gpu(GpuError),
    /// The flock was shut down and owns no buffers any more.
    ShutDown,
}

impl fmt::Display for FlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlockError::InvalidConfig(msg) => write!(f, "Invalid flock configuration: {}", msg),
            FlockError::Allocation { buffer, bytes } => {
                write!(f, "Failed to allocate {} bytes for buffer '{}'", bytes, buffer)
            }
            FlockError::Gpu(e) => write!(f, "GPU error: {}", e),
            FlockError::ShutDown => write!(f, "Flock has been shut down"),
        }
    }
}

impl std::error::Error for FlockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlockError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for FlockError {
    fn from(e: GpuError) -> Self {
        FlockError::Gpu(e)
    }
}
