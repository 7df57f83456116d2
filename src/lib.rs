//! # boidgrid
//!
//! Boids flocking with uniform-grid neighbor search, on the CPU or the GPU.
//!
//! Every agent steers by three rules (cohesion, separation, alignment) against
//! the neighbors inside each rule's radius, then moves one Euler step and wraps
//! around the cube `[-E, E]^3`. The interesting part is how neighbors are
//! found:
//!
//! | [`NeighborSearch`] | Cost | How |
//! |--------------------|------|-----|
//! | `Naive` | O(N²) | Every agent tests every other agent |
//! | `Scattered` | ~O(N) | Grid lookup, agent data read through the sort permutation |
//! | `Coherent` | ~O(N) | Grid lookup, agent data first gathered into cell order |
//!
//! All three give the same velocities up to float rounding.
//!
//! ## Quick Start
//!
//! ```ignore
//! use boidgrid::prelude::*;
//!
//! let config = FlockConfig::default().with_agent_count(5_000);
//! let mut flock = Flock::initialize(config)?;
//!
//! for _ in 0..100 {
//!     flock.step_coherent_grid(1.0)?;
//! }
//! let snapshot = flock.snapshot()?;
//! ```
//!
//! [`GpuFlock`] runs the same pipeline as wgpu compute passes and implements
//! the same [`FlockBackend`] trait:
//!
//! ```ignore
//! let ctx = GpuContext::new_blocking()?;
//! let mut flock = GpuFlock::initialize(&ctx, config)?;
//! flock.step_scattered_grid(1.0)?;
//! ```
//!
//! ## Grid
//!
//! Cells are as wide as the largest rule radius, so a 3×3×3 block of cells
//! around an agent holds every possible neighbor. Each step rebuilds the grid:
//! assign cell ids, sort agents by cell, record where each cell's run starts
//! and ends. See [`spatial`] and [`stages`].

pub mod buffers;
pub mod config;
pub mod error;
pub mod flock;
pub mod gpu;
pub mod rules;
pub mod spatial;
pub mod spawn;
pub mod stages;
pub mod time;

pub use bytemuck;
pub use config::FlockConfig;
pub use error::{FlockError, GpuError};
pub use flock::{Flock, FlockBackend, FlockSnapshot, NeighborSearch};
pub use glam::Vec3;
pub use gpu::{GpuContext, GpuFlock};
pub use rules::FlockRules;
pub use spatial::{CellBounds, GridGeometry};
pub use spawn::{RandomSpawner, SpawnContext, Spawner};
pub use time::{Stage, StepHook, StepTiming, TimingSummary};

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use boidgrid::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::FlockConfig;
    pub use crate::error::{FlockError, GpuError};
    pub use crate::flock::{Flock, FlockBackend, FlockSnapshot, NeighborSearch};
    pub use crate::gpu::{GpuContext, GpuFlock};
    pub use crate::rules::FlockRules;
    pub use crate::spawn::{RandomSpawner, SpawnContext, Spawner};
    pub use crate::time::{StepTiming, TimingSummary};
    pub use crate::Vec3;
}
