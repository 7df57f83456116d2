//! CPU stage kernels.
//!
//! Each function is one data-parallel pass over the agents. rayon joins the
//! pass before returning, which is the barrier between stages. `chunk` is the
//! configured worker-group size and bounds how finely rayon splits the work.

use glam::Vec3;
use rayon::prelude::*;

use crate::rules::{FlockRules, NeighborSums};
use crate::spatial::{CellBounds, GridGeometry};

/// Write `(slot, cell)` for every agent.
pub fn assign_cells(
    grid: &GridGeometry,
    positions: &[Vec3],
    keys: &mut [u32],
    slots: &mut [u32],
    chunk: usize,
) {
    keys.par_iter_mut()
        .zip(slots.par_iter_mut())
        .zip(positions.par_iter())
        .enumerate()
        .with_min_len(chunk)
        .for_each(|(i, ((key, slot), pos))| {
            *key = grid.cell_index(*pos);
            *slot = i as u32;
        });
}

/// Sort `values` by `keys`, reordering both. Ties come out in any order.
///
/// Pairs are packed as `key << 32 | value` so a single unstable sort of
/// `u64`s groups them by key. `scratch` is reused between steps.
pub fn sort_by_key(keys: &mut [u32], values: &mut [u32], scratch: &mut Vec<u64>) {
    debug_assert_eq!(keys.len(), values.len());
    scratch.clear();
    scratch.par_extend(
        keys.par_iter()
            .zip(values.par_iter())
            .map(|(&k, &v)| ((k as u64) << 32) | v as u64),
    );
    scratch.par_sort_unstable();
    keys.par_iter_mut()
        .zip(values.par_iter_mut())
        .zip(scratch.par_iter())
        .for_each(|((key, value), &packed)| {
            *key = (packed >> 32) as u32;
            *value = packed as u32;
        });
}

/// Rebuild the boundary table from sorted cell ids.
pub fn locate_cell_bounds(sorted_keys: &[u32], bounds: &CellBounds, chunk: usize) {
    bounds.clear();
    let n = sorted_keys.len();
    (0..n).into_par_iter().with_min_len(chunk).for_each(|i| {
        let curr = sorted_keys[i];
        if i == 0 {
            bounds.set_start(curr, 0);
        } else {
            let prev = sorted_keys[i - 1];
            if prev != curr {
                bounds.set_start(curr, i);
                bounds.set_end(prev, i - 1);
            }
        }
        if i == n - 1 {
            bounds.set_end(curr, i);
        }
    });
}

/// `dst[k] = src[order[k]]`.
pub fn gather<T: Copy + Send + Sync>(src: &[T], order: &[u32], dst: &mut [T], chunk: usize) {
    dst.par_iter_mut()
        .zip(order.par_iter())
        .with_min_len(chunk)
        .for_each(|(d, &s)| *d = src[s as usize]);
}

/// All-pairs reference search.
pub fn aggregate_naive(
    rules: &FlockRules,
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
    chunk: usize,
) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(chunk)
        .for_each(|(i, v_out)| {
            let pos = positions[i];
            let mut sums = NeighborSums::default();
            for (j, (&other_pos, &other_vel)) in positions.iter().zip(velocities).enumerate() {
                if j != i {
                    sums.accumulate(rules, pos, other_pos, other_vel);
                }
            }
            *v_out = sums.resolve(rules, pos, velocities[i]);
        });
}

/// Grid search over unsorted buffers, indirect through `sorted_slots`.
#[allow(clippy::too_many_arguments)]
pub fn aggregate_scattered(
    rules: &FlockRules,
    grid: &GridGeometry,
    bounds: &CellBounds,
    sorted_slots: &[u32],
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
    chunk: usize,
) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(chunk)
        .for_each(|(i, v_out)| {
            let pos = positions[i];
            let mut sums = NeighborSums::default();
            walk_neighborhood(grid, bounds, pos, |k| {
                let j = sorted_slots[k] as usize;
                if j != i {
                    sums.accumulate(rules, pos, positions[j], velocities[j]);
                }
            });
            *v_out = sums.resolve(rules, pos, velocities[i]);
        });
}

/// Grid search over buffers already gathered into cell order.
pub fn aggregate_coherent(
    rules: &FlockRules,
    grid: &GridGeometry,
    bounds: &CellBounds,
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
    chunk: usize,
) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(chunk)
        .for_each(|(i, v_out)| {
            let pos = positions[i];
            let mut sums = NeighborSums::default();
            walk_neighborhood(grid, bounds, pos, |j| {
                if j != i {
                    sums.accumulate(rules, pos, positions[j], velocities[j]);
                }
            });
            *v_out = sums.resolve(rules, pos, velocities[i]);
        });
}

/// Call `visit` with every permutation index in the 27 cells around `pos`.
#[inline]
fn walk_neighborhood(
    grid: &GridGeometry,
    bounds: &CellBounds,
    pos: Vec3,
    mut visit: impl FnMut(usize),
) {
    for cell in grid.neighborhood(grid.cell_coord(pos)) {
        if let Some(range) = bounds.range(cell) {
            for k in range {
                visit(k);
            }
        }
    }
}

/// Advance positions by one step and wrap them back into the world.
pub fn integrate(
    positions: &mut [Vec3],
    velocities: &[Vec3],
    dt: f32,
    half_extent: f32,
    chunk: usize,
) {
    positions
        .par_iter_mut()
        .zip(velocities.par_iter())
        .with_min_len(chunk)
        .for_each(|(pos, vel)| {
            let moved = *pos + *vel * dt;
            *pos = Vec3::new(
                wrap_axis(moved.x, half_extent),
                wrap_axis(moved.y, half_extent),
                wrap_axis(moved.z, half_extent),
            );
        });
}

/// Single-step toroidal wrap: leaving one face resets to the opposite face.
#[inline]
pub fn wrap_axis(p: f32, half_extent: f32) -> f32 {
    let p = if p < -half_extent { half_extent } else { p };
    if p > half_extent { -half_extent } else { p }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    #[test]
    fn test_sort_smoke() {
        let mut keys = vec![0, 1, 0, 3, 0, 2, 2, 0, 5, 6];
        let mut values: Vec<u32> = (0..10).collect();
        let mut scratch = Vec::new();
        sort_by_key(&mut keys, &mut values, &mut scratch);

        assert_eq!(keys, vec![0, 0, 0, 0, 1, 2, 2, 3, 5, 6]);

        let mut zeros = values[0..4].to_vec();
        zeros.sort();
        assert_eq!(zeros, vec![0, 2, 4, 7]);
        assert_eq!(values[4], 1);
        let mut twos = values[5..7].to_vec();
        twos.sort();
        assert_eq!(twos, vec![5, 6]);
        assert_eq!(&values[7..], &[3, 8, 9]);
    }

    #[test]
    fn test_locate_cell_bounds() {
        let sorted = vec![0, 0, 0, 0, 1, 2, 2, 3, 5, 6];
        let bounds = CellBounds::new(8).unwrap();
        locate_cell_bounds(&sorted, &bounds, 2);

        assert_eq!(bounds.range(0), Some(0..=3));
        assert_eq!(bounds.range(1), Some(4..=4));
        assert_eq!(bounds.range(2), Some(5..=6));
        assert_eq!(bounds.range(3), Some(7..=7));
        assert_eq!(bounds.range(4), None);
        assert_eq!(bounds.range(5), Some(8..=8));
        assert_eq!(bounds.range(6), Some(9..=9));
        assert_eq!(bounds.range(7), None);
    }

    #[test]
    fn test_locate_single_agent() {
        let bounds = CellBounds::new(4).unwrap();
        locate_cell_bounds(&[2], &bounds, 1);
        assert_eq!(bounds.range(2), Some(0..=0));
        assert_eq!(bounds.occupied_cells(), 1);
    }

    #[test]
    fn test_assign_cells() {
        let grid = GridGeometry::new(&FlockRules::default(), 100.0);
        let far = Vec3::new(99.0, -3.0, 12.0);
        let positions = vec![Vec3::ZERO, Vec3::splat(-100.0), far];
        let mut keys = vec![0; 3];
        let mut slots = vec![0; 3];
        assign_cells(&grid, &positions, &mut keys, &mut slots, 1);

        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(keys[0], grid.flatten(IVec3::splat(21)));
        assert_eq!(keys[1], grid.flatten(IVec3::splat(1)));
        assert_eq!(keys[2], grid.flatten(IVec3::new(40, 20, 23)));
    }

    #[test]
    fn test_gather() {
        let src = vec![10, 11, 12, 13];
        let mut dst = vec![0; 4];
        gather(&src, &[3, 0, 2, 1], &mut dst, 1);
        assert_eq!(dst, vec![13, 10, 12, 11]);
    }

    #[test]
    fn test_wrap_axis() {
        assert_eq!(wrap_axis(100.5, 100.0), -100.0);
        assert_eq!(wrap_axis(-100.5, 100.0), 100.0);
        assert_eq!(wrap_axis(100.0, 100.0), 100.0);
        assert_eq!(wrap_axis(-3.25, 100.0), -3.25);
    }

    #[test]
    fn test_integrate() {
        let mut positions = vec![Vec3::ZERO, Vec3::new(99.9, 0.0, -99.9)];
        let velocities = vec![Vec3::new(0.5, -0.25, 1.0), Vec3::new(1.0, 0.0, -1.0)];
        integrate(&mut positions, &velocities, 1.0, 100.0, 1);

        assert_eq!(positions[0], Vec3::new(0.5, -0.25, 1.0));
        assert_eq!(positions[1], Vec3::new(-100.0, 0.0, 100.0));
    }

    #[test]
    fn test_scattered_matches_naive() {
        let rules = FlockRules::default();
        let grid = GridGeometry::new(&rules, 10.0);
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.5, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(-2.0, 2.0, 1.0),
            Vec3::new(9.0, 9.0, 9.0),
        ];
        let velocities = vec![
            Vec3::new(0.1, 0.0, 0.0),
            Vec3::new(0.0, 0.2, 0.0),
            Vec3::new(0.0, 0.0, 0.3),
            Vec3::new(-0.1, 0.1, 0.0),
            Vec3::new(0.2, 0.2, 0.2),
        ];
        let n = positions.len();

        let mut naive = vec![Vec3::ZERO; n];
        aggregate_naive(&rules, &positions, &velocities, &mut naive, 1);

        let mut keys = vec![0; n];
        let mut slots = vec![0; n];
        let mut scratch = Vec::new();
        assign_cells(&grid, &positions, &mut keys, &mut slots, 1);
        sort_by_key(&mut keys, &mut slots, &mut scratch);
        let bounds = CellBounds::new(grid.cell_count).unwrap();
        locate_cell_bounds(&keys, &bounds, 1);

        let mut scattered = vec![Vec3::ZERO; n];
        aggregate_scattered(
            &rules,
            &grid,
            &bounds,
            &slots,
            &positions,
            &velocities,
            &mut scattered,
            1,
        );

        for (a, b) in naive.iter().zip(&scattered) {
            assert!((*a - *b).abs().max_element() < 1e-6, "{a} vs {b}");
        }
        // The far agent has no neighbors and keeps its velocity.
        assert_eq!(scattered[4], velocities[4]);
    }
}
