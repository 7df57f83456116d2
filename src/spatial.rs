//! Uniform grid used to accelerate neighbor search.
//!
//! The world cube `[-E, E]³` is covered by `side³` cubic cells whose width is
//! the largest rule radius, with one cell of margin on every face. Any agent
//! within a rule radius of another therefore lives in the same cell or one of
//! the 26 surrounding cells.
//!
//! Cells are flattened row-major with x varying fastest:
//! `cell = x + y * side + z * side²`.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicI32, Ordering};

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::buffers::try_alloc_with;
use crate::error::FlockError;
use crate::rules::FlockRules;

/// Boundary table marker for a cell with no agents.
pub const EMPTY_CELL: i32 = -1;

/// Grid resolution and placement, derived once from the configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridGeometry {
    /// Cell width in world units. The largest of the three rule radii.
    pub cell_width: f32,
    /// Cached `1 / cell_width`.
    pub inverse_cell_width: f32,
    /// Cells from the origin to either face, margin included.
    pub half_side_count: u32,
    /// Cells per axis.
    pub side_count: u32,
    /// `side_count³`.
    pub cell_count: u32,
    /// World-space corner of cell `(0, 0, 0)`.
    pub world_min: Vec3,
}

impl GridGeometry {
    /// Build the grid for the given rule radii and world half-extent.
    ///
    /// Call on a validated configuration; the cell count is not checked here.
    pub fn new(rules: &FlockRules, world_half_extent: f32) -> Self {
        let cell_width = rules.max_distance();
        let half_side_count = (world_half_extent / cell_width).floor() as u32 + 1;
        let side_count = 2 * half_side_count;
        Self {
            cell_width,
            inverse_cell_width: 1.0 / cell_width,
            half_side_count,
            side_count,
            cell_count: side_count * side_count * side_count,
            world_min: Vec3::splat(-cell_width * half_side_count as f32),
        }
    }

    /// Integer cell coordinate of a world position.
    ///
    /// Truncates toward zero, then clamps into the grid. Positions inside the
    /// world never hit the clamp.
    #[inline]
    pub fn cell_coord(&self, position: Vec3) -> IVec3 {
        let grid = (position - self.world_min) * self.inverse_cell_width;
        let max = self.side_count as i32 - 1;
        grid.as_ivec3().clamp(IVec3::ZERO, IVec3::splat(max))
    }

    /// Whether a (possibly offset) coordinate lies inside the grid.
    #[inline]
    pub fn contains(&self, coord: IVec3) -> bool {
        let side = self.side_count as i32;
        coord.cmpge(IVec3::ZERO).all() && coord.cmplt(IVec3::splat(side)).all()
    }

    /// Row-major flattening. `coord` must be inside the grid.
    #[inline]
    pub fn flatten(&self, coord: IVec3) -> u32 {
        let side = self.side_count;
        coord.x as u32 + coord.y as u32 * side + coord.z as u32 * side * side
    }

    /// Flattened cell id of a world position.
    #[inline]
    pub fn cell_index(&self, position: Vec3) -> u32 {
        self.flatten(self.cell_coord(position))
    }

    /// The in-grid cells of the 3×3×3 block around `coord`, own cell
    /// included, in z/y/x order.
    pub fn neighborhood(&self, coord: IVec3) -> impl Iterator<Item = u32> + '_ {
        (-1..=1).flat_map(move |dz| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).filter_map(move |dx| {
                    let cell = coord + IVec3::new(dx, dy, dz);
                    self.contains(cell).then(|| self.flatten(cell))
                })
            })
        })
    }
}

/// Per-cell `[start, end]` ranges into the sorted permutation.
///
/// Each slot is written by at most one worker during a build, so relaxed
/// atomic stores are enough to share the table across rayon tasks.
pub struct CellBounds {
    start: Vec<AtomicI32>,
    end: Vec<AtomicI32>,
}

impl CellBounds {
    /// Allocate an all-empty table.
    pub fn new(cell_count: u32) -> Result<Self, FlockError> {
        let len = cell_count as usize;
        Ok(Self {
            start: try_alloc_with("cell_start", len, || AtomicI32::new(EMPTY_CELL))?,
            end: try_alloc_with("cell_end", len, || AtomicI32::new(EMPTY_CELL))?,
        })
    }

    /// Wrap a table read back from the GPU.
    pub fn from_raw(start: Vec<i32>, end: Vec<i32>) -> Self {
        Self {
            start: start.into_iter().map(AtomicI32::new).collect(),
            end: end.into_iter().map(AtomicI32::new).collect(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.start.len()
    }

    /// Reset every cell to [`EMPTY_CELL`].
    pub fn clear(&self) {
        self.start
            .par_iter()
            .chain(self.end.par_iter())
            .for_each(|slot| slot.store(EMPTY_CELL, Ordering::Relaxed));
    }

    #[inline]
    pub(crate) fn set_start(&self, cell: u32, index: usize) {
        self.start[cell as usize].store(index as i32, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_end(&self, cell: u32, index: usize) {
        self.end[cell as usize].store(index as i32, Ordering::Relaxed);
    }

    /// Raw start entry, [`EMPTY_CELL`] for an empty cell.
    pub fn start(&self, cell: u32) -> i32 {
        self.start[cell as usize].load(Ordering::Relaxed)
    }

    /// Raw inclusive end entry, [`EMPTY_CELL`] for an empty cell.
    pub fn end(&self, cell: u32) -> i32 {
        self.end[cell as usize].load(Ordering::Relaxed)
    }

    /// Inclusive permutation range of `cell`, or `None` if it holds no agents.
    #[inline]
    pub fn range(&self, cell: u32) -> Option<RangeInclusive<usize>> {
        let start = self.start(cell);
        if start == EMPTY_CELL {
            return None;
        }
        let end = self.end(cell);
        (end >= start).then(|| start as usize..=end as usize)
    }

    /// Number of cells holding at least one agent.
    pub fn occupied_cells(&self) -> usize {
        self.start
            .par_iter()
            .filter(|s| s.load(Ordering::Relaxed) != EMPTY_CELL)
            .count()
    }
}

impl std::fmt::Debug for CellBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellBounds")
            .field("cell_count", &self.cell_count())
            .finish_non_exhaustive()
    }
}

/// WGSL grid helpers. Expects a `FlockParams` struct in scope.
pub const GRID_WGSL: &str = r#"
const EMPTY_CELL: i32 = -1;

// Clamped integer cell coordinate of a world position
fn grid_coord(pos: vec3<f32>, p: FlockParams) -> vec3<i32> {
    let world_min = vec3<f32>(p.grid_min_x, p.grid_min_y, p.grid_min_z);
    let grid = (pos - world_min) * p.inverse_cell_width;
    let max_cell = i32(p.side_count) - 1;
    return clamp(vec3<i32>(grid), vec3<i32>(0), vec3<i32>(max_cell));
}

fn cell_in_grid(cell: vec3<i32>, side: u32) -> bool {
    return all(cell >= vec3<i32>(0)) && all(cell < vec3<i32>(i32(side)));
}

// Row-major, x fastest
fn flatten_cell(cell: vec3<i32>, side: u32) -> u32 {
    return u32(cell.x) + u32(cell.y) * side + u32(cell.z) * side * side;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn default_grid() -> GridGeometry {
        GridGeometry::new(&FlockRules::default(), 100.0)
    }

    #[test]
    fn test_default_geometry() {
        let grid = default_grid();
        assert_eq!(grid.cell_width, 5.0);
        assert_eq!(grid.half_side_count, 21);
        assert_eq!(grid.side_count, 42);
        assert_eq!(grid.cell_count, 42 * 42 * 42);
        assert_eq!(grid.world_min, Vec3::splat(-105.0));
        assert!((grid.inverse_cell_width - 0.2).abs() < 1e-7);
    }

    #[test]
    fn test_world_faces_stay_inside_grid() {
        let grid = default_grid();
        let low = grid.cell_coord(Vec3::splat(-100.0));
        let high = grid.cell_coord(Vec3::splat(100.0));
        assert_eq!(low, IVec3::splat(1));
        assert_eq!(high, IVec3::splat(41));
        assert!(grid.contains(high));
        assert!(!grid.contains(high + IVec3::ONE));
    }

    #[test]
    fn test_cell_coord_clamps_outside_positions() {
        let grid = default_grid();
        assert_eq!(grid.cell_coord(Vec3::splat(-1000.0)), IVec3::ZERO);
        assert_eq!(grid.cell_coord(Vec3::splat(1000.0)), IVec3::splat(41));
    }

    #[test]
    fn test_flatten_is_row_major() {
        let grid = default_grid();
        assert_eq!(grid.flatten(IVec3::new(1, 0, 0)), 1);
        assert_eq!(grid.flatten(IVec3::new(0, 1, 0)), 42);
        assert_eq!(grid.flatten(IVec3::new(0, 0, 1)), 42 * 42);
        assert_eq!(grid.flatten(IVec3::splat(41)), grid.cell_count - 1);
    }

    #[test]
    fn test_neighborhood_sizes() {
        let grid = default_grid();
        assert_eq!(grid.neighborhood(IVec3::splat(10)).count(), 27);
        assert_eq!(grid.neighborhood(IVec3::ZERO).count(), 8);
        assert_eq!(grid.neighborhood(IVec3::new(0, 10, 10)).count(), 18);

        let cells: Vec<u32> = grid.neighborhood(IVec3::splat(10)).collect();
        assert!(cells.windows(2).all(|w| w[0] < w[1]));
        assert!(cells.contains(&grid.flatten(IVec3::splat(10))));
    }

    #[test]
    fn test_cell_bounds_ranges() {
        let bounds = CellBounds::new(8).unwrap();
        assert_eq!(bounds.range(3), None);

        bounds.set_start(3, 4);
        bounds.set_end(3, 6);
        assert_eq!(bounds.range(3), Some(4..=6));
        assert_eq!(bounds.occupied_cells(), 1);

        bounds.clear();
        assert_eq!(bounds.range(3), None);
        assert_eq!(bounds.start(3), EMPTY_CELL);
        assert_eq!(bounds.end(3), EMPTY_CELL);
    }

    #[test]
    fn test_from_raw() {
        let bounds = CellBounds::from_raw(vec![0, -1, 2], vec![1, -1, 2]);
        assert_eq!(bounds.cell_count(), 3);
        assert_eq!(bounds.range(0), Some(0..=1));
        assert_eq!(bounds.range(1), None);
        assert_eq!(bounds.range(2), Some(2..=2));
    }
}
