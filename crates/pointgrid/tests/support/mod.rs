//! Shared helpers for the GPU integration tests: headless device setup,
//! position buffer upload, and CPU reference implementations the GPU results
//! are validated against.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use glam::Vec3;
use pointgrid::gpu::GpuContext;
use pointgrid::GridConfig;
use wgpu::util::DeviceExt;

/// Create a headless GPU context, or `None` when no adapter is available.
///
/// Callers skip their test on `None`; CI machines without a GPU must not fail.
pub fn test_context() -> Option<GpuContext> {
    let ctx = GpuContext::headless();
    if ctx.is_none() {
        println!("Skipped: No GPU");
    }
    ctx
}

/// Upload positions as tightly packed vec4 records (xyz used, w zero).
pub fn positions_buffer(device: &wgpu::Device, positions: &[Vec3]) -> Arc<wgpu::Buffer> {
    let padded: Vec<[f32; 4]> = positions.iter().map(|p| [p.x, p.y, p.z, 0.0]).collect();
    Arc::new(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Test Positions"),
        contents: bytemuck::cast_slice(&padded),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    }))
}

/// Allocate a position buffer for `capacity` points without contents.
pub fn positions_buffer_with_capacity(device: &wgpu::Device, capacity: usize) -> Arc<wgpu::Buffer> {
    Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Test Positions"),
        size: (capacity * 16) as u64,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    }))
}

/// Overwrite the front of a position buffer with new points.
pub fn write_positions(queue: &wgpu::Queue, buffer: &wgpu::Buffer, positions: &[Vec3]) {
    let padded: Vec<[f32; 4]> = positions.iter().map(|p| [p.x, p.y, p.z, 0.0]).collect();
    queue.write_buffer(buffer, 0, bytemuck::cast_slice(&padded));
}

/// Host exclusive prefix sum: `out[0] = 0`, `out[i] = out[i-1] + xs[i-1]`.
pub fn cpu_exclusive_scan(xs: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(xs.len());
    let mut sum = 0u32;
    for &x in xs {
        out.push(sum);
        sum += x;
    }
    out
}

/// Expected bucket contents per cell: the set of point indices hashing to it.
pub fn cpu_buckets(config: &GridConfig, positions: &[Vec3]) -> Vec<BTreeSet<u32>> {
    let mut buckets = vec![BTreeSet::new(); config.cell_count()];
    for (i, &p) in positions.iter().enumerate() {
        buckets[config.cell_index(p) as usize].insert(i as u32);
    }
    buckets
}

/// Brute-force neighbour reference: for each point, the set of indices within
/// `radius` (Euclidean, self included).
pub fn cpu_neighbours(positions: &[Vec3], radius: f32) -> Vec<BTreeSet<u32>> {
    positions
        .iter()
        .map(|&p| {
            positions
                .iter()
                .enumerate()
                .filter(|(_, &q)| p.distance(q) <= radius)
                .map(|(j, _)| j as u32)
                .collect()
        })
        .collect()
}

/// Check the full set of grid invariants against the CPU reference:
/// conservation, the exclusive-scan contract, and exact per-cell membership.
pub fn assert_grid_matches_reference(
    ctx: &GpuContext,
    grid: &pointgrid::gpu::GpuPointHashGrid,
    positions: &[Vec3],
) {
    let sizes = grid
        .read_bucket_sizes(&ctx.device, &ctx.queue)
        .expect("bucket size readback");
    let offsets = grid
        .read_bucket_offsets(&ctx.device, &ctx.queue)
        .expect("bucket offset readback");
    let buckets = grid
        .read_buckets(&ctx.device, &ctx.queue)
        .expect("bucket readback");

    let n = positions.len() as u32;
    let cell_count = grid.config().cell_count();

    // Conservation: every point counted exactly once.
    assert_eq!(sizes.iter().sum::<u32>(), n, "sum of bucket sizes");

    // Exclusive scan contract plus the end sentinel.
    assert_eq!(offsets[0], 0);
    for c in 1..cell_count {
        assert_eq!(
            offsets[c],
            offsets[c - 1] + sizes[c - 1],
            "offset mismatch at cell {c}"
        );
    }
    assert_eq!(offsets[cell_count], n, "end sentinel");

    // Per-cell membership equals the CPU hash, order within a cell ignored.
    let expected = cpu_buckets(grid.config(), positions);
    for c in 0..cell_count {
        let start = offsets[c] as usize;
        let got: BTreeSet<u32> = buckets[start..start + sizes[c] as usize]
            .iter()
            .copied()
            .collect();
        assert_eq!(
            got.len(),
            sizes[c] as usize,
            "duplicate index in bucket {c}"
        );
        assert_eq!(got, expected[c], "bucket {c} contents");
    }
}
