//! Neighbour list construction validated against a brute-force CPU reference.
//!
//! All comparisons are set-based: intra-range order is enumeration order and
//! deliberately unspecified.

mod support;

use std::collections::BTreeSet;

use glam::{UVec3, Vec3};
use pointgrid::gpu::{GpuContext, GpuNeighbourList, GpuPointHashGrid};
use pointgrid::GridConfig;
use rand::{Rng, SeedableRng};
use support::{cpu_neighbours, positions_buffer, test_context};

/// Build grid + neighbour list over `positions` and compare every point's
/// neighbour range against the CPU reference as a set.
fn assert_neighbours_match_reference(
    ctx: &GpuContext,
    config: GridConfig,
    positions: &[Vec3],
    radius: f32,
) {
    let n = positions.len();
    let buffer = positions_buffer(&ctx.device, positions);
    let mut grid = GpuPointHashGrid::new(&ctx.device, config, n, buffer);
    let mut list = GpuNeighbourList::new(&ctx.device, &grid, radius, n * n);

    // Record both builds into one submission; the encoder keeps the grid's
    // scatter ahead of the neighbour count pass.
    grid.prepare(&ctx.queue, n as u32);
    list.prepare(&ctx.queue, n as u32);
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Grid + Neighbour Encoder"),
        });
    grid.encode(&mut encoder);
    list.encode(&mut encoder);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let sizes = list.read_neighbour_sizes(&ctx.device, &ctx.queue).expect("sizes");
    let offsets = list.read_neighbour_offsets(&ctx.device, &ctx.queue).expect("offsets");
    let total = list.total_neighbours(&ctx.device, &ctx.queue).expect("total");
    let flat = list
        .read_neighbour_list(&ctx.device, &ctx.queue, total as usize)
        .expect("list");

    let expected = cpu_neighbours(positions, radius);

    assert_eq!(sizes.iter().sum::<u32>(), total, "total pair count");
    assert_eq!(
        total as usize,
        expected.iter().map(|s| s.len()).sum::<usize>(),
        "pair count against reference"
    );

    assert_eq!(offsets[0], 0);
    for i in 1..n {
        assert_eq!(
            offsets[i],
            offsets[i - 1] + sizes[i - 1],
            "offset mismatch at point {i}"
        );
    }

    for i in 0..n {
        let start = offsets[i] as usize;
        let range = &flat[start..start + sizes[i] as usize];
        let got: BTreeSet<u32> = range.iter().copied().collect();
        assert_eq!(got.len(), range.len(), "duplicate neighbour for point {i}");
        assert!(got.contains(&(i as u32)), "point {i} must neighbour itself");
        assert_eq!(got, expected[i], "neighbour set of point {i}");
    }
}

#[test]
fn lattice_neighbours_match_reference() {
    let Some(ctx) = test_context() else { return };

    // 6x6x6 lattice at half-cell spacing. Radius 0.15 cleanly separates the
    // axis (0.1) and face-diagonal (0.141) neighbours from the cube-diagonal
    // (0.173) ones, so no pair sits on the boundary.
    let config = GridConfig::with_uniform_spacing(UVec3::new(8, 8, 8), 0.2);
    let mut positions = Vec::new();
    for z in 0..6 {
        for y in 0..6 {
            for x in 0..6 {
                positions.push(Vec3::new(
                    0.25 + x as f32 * 0.1,
                    0.25 + y as f32 * 0.1,
                    0.25 + z as f32 * 0.1,
                ));
            }
        }
    }

    assert_neighbours_match_reference(&ctx, config, &positions, 0.15);
}

#[test]
fn random_points_neighbours_match_reference() {
    let Some(ctx) = test_context() else { return };

    let config = GridConfig::with_uniform_spacing(UVec3::new(8, 8, 8), 0.2);
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let positions: Vec<Vec3> = (0..300)
        .map(|_| {
            Vec3::new(
                rng.gen_range(0.0..1.6),
                rng.gen_range(0.0..1.6),
                rng.gen_range(0.0..1.6),
            )
        })
        .collect();

    assert_neighbours_match_reference(&ctx, config, &positions, 0.15);
}

#[test]
fn neighbours_across_zero_boundary() {
    let Some(ctx) = test_context() else { return };

    // Points just either side of the origin hash into cells at opposite ends
    // of the wrapped grid; the wrapped 27-cell enumeration must still pair
    // them up.
    let config = GridConfig::with_uniform_spacing(UVec3::new(8, 8, 8), 0.2);
    let positions = vec![
        Vec3::new(-0.05, 0.1, 0.1),
        Vec3::new(0.05, 0.1, 0.1),
        Vec3::new(-0.02, 0.12, 0.1),
        Vec3::new(0.5, 0.5, 0.5),
    ];

    assert_neighbours_match_reference(&ctx, config, &positions, 0.15);
}

#[test]
fn isolated_point_neighbours_only_itself() {
    let Some(ctx) = test_context() else { return };

    let config = GridConfig::with_uniform_spacing(UVec3::new(8, 8, 8), 0.2);
    let positions = vec![
        Vec3::new(0.1, 0.1, 0.1),
        Vec3::new(1.5, 1.5, 1.5),
    ];

    assert_neighbours_match_reference(&ctx, config, &positions, 0.15);
}

#[test]
fn rebuild_with_grown_point_count() {
    let Some(ctx) = test_context() else { return };

    let config = GridConfig::with_uniform_spacing(UVec3::new(8, 8, 8), 0.2);
    let capacity = 128;
    let radius = 0.15;

    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let mut random_points = |n: usize| -> Vec<Vec3> {
        (0..n)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(0.0..1.6),
                    rng.gen_range(0.0..1.6),
                    rng.gen_range(0.0..1.6),
                )
            })
            .collect()
    };

    let buffer = support::positions_buffer_with_capacity(&ctx.device, capacity);
    let mut grid = GpuPointHashGrid::new(&ctx.device, config, capacity, buffer.clone());
    let mut list = GpuNeighbourList::new(&ctx.device, &grid, radius, capacity * capacity);

    for n in [40, 128] {
        let positions = random_points(n);
        support::write_positions(&ctx.queue, &buffer, &positions);

        grid.prepare(&ctx.queue, n as u32);
        list.prepare(&ctx.queue, n as u32);
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Rebuild Encoder"),
            });
        grid.encode(&mut encoder);
        list.encode(&mut encoder);
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let sizes = list.read_neighbour_sizes(&ctx.device, &ctx.queue).expect("sizes");
        let offsets = list.read_neighbour_offsets(&ctx.device, &ctx.queue).expect("offsets");
        let total = list.total_neighbours(&ctx.device, &ctx.queue).expect("total");
        let flat = list
            .read_neighbour_list(&ctx.device, &ctx.queue, total as usize)
            .expect("list");

        let expected = cpu_neighbours(&positions, radius);
        for i in 0..n {
            let start = offsets[i] as usize;
            let got: BTreeSet<u32> = flat[start..start + sizes[i] as usize]
                .iter()
                .copied()
                .collect();
            assert_eq!(got, expected[i], "neighbour set of point {i} with n = {n}");
        }
    }
}

#[test]
fn empty_build_reports_no_pairs() {
    let Some(ctx) = test_context() else { return };

    let config = GridConfig::with_uniform_spacing(UVec3::new(4, 4, 4), 0.25);
    let buffer = support::positions_buffer_with_capacity(&ctx.device, 8);
    let mut grid = GpuPointHashGrid::new(&ctx.device, config, 8, buffer);
    let mut list = GpuNeighbourList::new(&ctx.device, &grid, 0.25, 64);

    grid.build(&ctx.device, &ctx.queue, 0);
    list.build(&ctx.device, &ctx.queue, 0);

    assert_eq!(
        list.total_neighbours(&ctx.device, &ctx.queue).expect("total"),
        0
    );
}
