//! Grid occupancy and neighbour statistics over a random point cloud.
//!
//! Builds the hash grid and neighbour list for a cloud of random points and
//! prints cell occupancy plus neighbour-count distributions, with a CPU
//! cross-check of the pair total.
//!
//! Run with: cargo run --example grid_diagnostic -p pointgrid --release

use std::sync::Arc;

use glam::{UVec3, Vec3};
use pointgrid::gpu::{GpuContext, GpuNeighbourList, GpuPointHashGrid};
use pointgrid::GridConfig;
use rand::{Rng, SeedableRng};
use wgpu::util::DeviceExt;

const POINT_COUNT: usize = 20_000;
const RESOLUTION: u32 = 16;
const SPACING: f32 = 0.1;
const RADIUS: f32 = 0.1;

fn main() {
    let Some(ctx) = GpuContext::headless() else {
        eprintln!("No GPU adapter available");
        return;
    };

    let config = GridConfig::with_uniform_spacing(UVec3::splat(RESOLUTION), SPACING);
    let domain = RESOLUTION as f32 * SPACING;

    let mut rng = rand::rngs::StdRng::seed_from_u64(0xD1CE);
    let positions: Vec<Vec3> = (0..POINT_COUNT)
        .map(|_| {
            Vec3::new(
                rng.gen_range(0.0..domain),
                rng.gen_range(0.0..domain),
                rng.gen_range(0.0..domain),
            )
        })
        .collect();

    let padded: Vec<[f32; 4]> = positions.iter().map(|p| [p.x, p.y, p.z, 0.0]).collect();
    let buffer = Arc::new(ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Diagnostic Positions"),
        contents: bytemuck::cast_slice(&padded),
        usage: wgpu::BufferUsages::STORAGE,
    }));

    let mut grid = GpuPointHashGrid::new(&ctx.device, config, POINT_COUNT, buffer);
    // Pair capacity from the uniform-density estimate (~20 neighbours per
    // point at radius == spacing), with 4x headroom for RNG clustering.
    let expected_per_point =
        POINT_COUNT as f32 / (RESOLUTION as f32).powi(3) * 4.0 / 3.0 * std::f32::consts::PI;
    let max_pairs = (POINT_COUNT as f32 * expected_per_point * 4.0) as usize;
    let mut list = GpuNeighbourList::new(&ctx.device, &grid, RADIUS, max_pairs);

    println!(
        "Grid: {r}x{r}x{r} cells of {s} m, {n} points, radius {radius} m",
        r = RESOLUTION,
        s = SPACING,
        n = POINT_COUNT,
        radius = RADIUS
    );

    grid.prepare(&ctx.queue, POINT_COUNT as u32);
    list.prepare(&ctx.queue, POINT_COUNT as u32);
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Diagnostic Encoder"),
        });
    grid.encode(&mut encoder);
    list.encode(&mut encoder);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let sizes = grid
        .read_bucket_sizes(&ctx.device, &ctx.queue)
        .expect("bucket size readback");
    let occupied = sizes.iter().filter(|&&s| s > 0).count();
    let max_bucket = sizes.iter().copied().max().unwrap_or(0);
    println!(
        "Occupied cells: {}/{} ({:.1}%), largest bucket: {}",
        occupied,
        config.cell_count(),
        100.0 * occupied as f32 / config.cell_count() as f32,
        max_bucket
    );
    assert_eq!(sizes.iter().sum::<u32>() as usize, POINT_COUNT);

    let neighbour_sizes = list
        .read_neighbour_sizes(&ctx.device, &ctx.queue)
        .expect("neighbour size readback");
    let total = list
        .total_neighbours(&ctx.device, &ctx.queue)
        .expect("total readback");
    let min_n = neighbour_sizes.iter().copied().min().unwrap_or(0);
    let max_n = neighbour_sizes.iter().copied().max().unwrap_or(0);
    println!(
        "Neighbour pairs: {} total, per point min {} / avg {:.1} / max {}",
        total,
        min_n,
        total as f32 / POINT_COUNT as f32,
        max_n
    );
    assert!((total as usize) <= max_pairs, "pair capacity exceeded");

    // Spot-check the pair total on the CPU over a subset.
    let sample = 500.min(POINT_COUNT);
    let mut cpu_pairs = 0usize;
    for i in 0..sample {
        for &q in &positions {
            if positions[i].distance(q) <= RADIUS {
                cpu_pairs += 1;
            }
        }
    }
    let gpu_pairs: u32 = neighbour_sizes[..sample].iter().sum();
    println!(
        "CPU cross-check over first {} points: cpu {} vs gpu {}",
        sample, cpu_pairs, gpu_pairs
    );
    // GPU sqrt may round differently for pairs sitting exactly on the radius,
    // so allow a couple of boundary flips across the 10M comparisons.
    let diff = (cpu_pairs as i64 - gpu_pairs as i64).unsigned_abs();
    assert!(diff <= 4, "CPU/GPU pair count mismatch: off by {diff}");

    println!("✓ diagnostic complete");
}
