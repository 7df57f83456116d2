//! Benchmarks for one flock step per neighbor search, plus the grid stages.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use boidgrid::prelude::*;
use boidgrid::spatial::{CellBounds, GridGeometry};
use boidgrid::stages;

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("flock_step");
    group.sample_size(20);

    for &count in &[1_000u32, 5_000, 20_000] {
        for search in NeighborSearch::ALL {
            // Naive is quadratic, keep it to the small sizes
            if search == NeighborSearch::Naive && count > 5_000 {
                continue;
            }
            let config = FlockConfig::default().with_agent_count(count);
            let mut flock = Flock::initialize(config).unwrap();
            let id = BenchmarkId::new(search.name(), count);
            group.bench_with_input(id, &search, |b, &search| {
                b.iter(|| flock.step(black_box(search), 1.0).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_grid_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_build");

    for &count in &[5_000u32, 50_000] {
        let config = FlockConfig::default().with_agent_count(count);
        let flock = Flock::initialize(config).unwrap();
        let positions = flock.positions().unwrap().to_vec();
        let grid = GridGeometry::new(&config.rules, config.world_half_extent);
        let chunk = config.workgroup_size as usize;

        let mut keys = vec![0u32; count as usize];
        let mut slots = vec![0u32; count as usize];
        let mut scratch = Vec::new();
        let bounds = CellBounds::new(grid.cell_count).unwrap();

        group.bench_with_input(BenchmarkId::new("assign_cells", count), &count, |b, _| {
            b.iter(|| {
                let positions = black_box(&positions);
                stages::assign_cells(&grid, positions, &mut keys, &mut slots, chunk)
            })
        });

        group.bench_with_input(BenchmarkId::new("sort_by_key", count), &count, |b, _| {
            b.iter(|| {
                stages::assign_cells(&grid, &positions, &mut keys, &mut slots, chunk);
                stages::sort_by_key(&mut keys, &mut slots, &mut scratch);
            })
        });

        let id = BenchmarkId::new("locate_cell_bounds", count);
        group.bench_with_input(id, &count, |b, _| {
            b.iter(|| stages::locate_cell_bounds(black_box(&keys), &bounds, chunk))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_step, bench_grid_build);
criterion_main!(benches);
