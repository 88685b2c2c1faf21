//! GPU uniform hash grid construction over an externally owned point buffer.
//!
//! Two-pass counting-sort build: count points per cell, exclusive-scan the
//! counts into offsets, then scatter point indices into a compacted bucket
//! array using per-cell atomic cursors. All three output buffers are rebuilt
//! wholesale on every build; there is no incremental update.

use std::sync::Arc;

use crate::grid::GridConfig;

use super::params::GridConstants;
use super::prefix_sum::GpuPrefixSum;
use super::readback::read_u32_buffer;
use super::GpuError;

const WORKGROUP_SIZE: u32 = 256;

/// Phase selector for the two grid-build dispatches.
///
/// A build steps through Count -> (scan) -> Scatter; the enum picks the
/// kernel entry point for each dispatch and documents that ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Histogram points into per-cell counts.
    Count,
    /// Claim slots from the seeded cursors and write point indices.
    Scatter,
}

/// GPU point hash grid.
///
/// Output buffers after a completed build (and queue synchronization):
/// - `bucket_size[cell]`: number of points in the cell
/// - `bucket_offset[cell]`: exclusive prefix sum of sizes; the trailing
///   element `bucket_offset[cell_count]` holds the point count so consumers
///   can iterate `bucket[offset[c]..offset[c + 1]]` for every cell
/// - `bucket[0..n]`: point indices grouped by cell, unordered within a cell
pub struct GpuPointHashGrid {
    config: GridConfig,
    max_points: usize,
    point_count: u32,

    positions: Arc<wgpu::Buffer>,
    constants_buffer: wgpu::Buffer,
    bucket_size_buffer: wgpu::Buffer,
    bucket_offset_buffer: wgpu::Buffer,
    bucket_cursor_buffer: wgpu::Buffer,
    bucket_buffer: wgpu::Buffer,

    count_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,

    prefix: GpuPrefixSum,
}

impl GpuPointHashGrid {
    /// Create a grid for up to `max_points` points.
    ///
    /// `positions` is the externally owned point buffer: tightly packed
    /// `vec4<f32>` records with the position in xyz. Only read, never written.
    pub fn new(
        device: &wgpu::Device,
        config: GridConfig,
        max_points: usize,
        positions: Arc<wgpu::Buffer>,
    ) -> Self {
        assert!(max_points > 0, "grid capacity must be non-zero");
        let cell_count = config.cell_count();

        let constants_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Grid Constants"),
            size: std::mem::size_of::<GridConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bucket_size_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bucket Sizes"),
            size: (cell_count * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // cell_count + 1 elements: the trailing slot is seeded with the point
        // count each build for end-of-last-cell lookups.
        let bucket_offset_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bucket Offsets"),
            size: ((cell_count + 1) * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // Live scatter cursors, seeded from the offsets by a buffer copy.
        // Kept separate from the offsets so the scanned result survives the
        // scatter pass intact.
        let bucket_cursor_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bucket Cursors"),
            size: (cell_count * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bucket_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bucket Indices"),
            size: (max_points * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Hash Grid Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/hash_grid.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Hash Grid Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Hash Grid Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: constants_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bucket_size_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bucket_cursor_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: bucket_buffer.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Hash Grid Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let create_pipeline = |label: &str, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let count_pipeline = create_pipeline("Count Points Pipeline", "count_points");
        let scatter_pipeline = create_pipeline("Scatter Points Pipeline", "scatter_points");

        let mut prefix = GpuPrefixSum::new(device, cell_count);
        prefix.configure(device, &bucket_offset_buffer);

        Self {
            config,
            max_points,
            point_count: 0,
            positions,
            constants_buffer,
            bucket_size_buffer,
            bucket_offset_buffer,
            bucket_cursor_buffer,
            bucket_buffer,
            count_pipeline,
            scatter_pipeline,
            bind_group,
            prefix,
        }
    }

    /// Upload constants and clear per-build state.
    ///
    /// Must be called before `encode` on every build; the counts are
    /// accumulated atomically and rely on this zero-fill.
    pub fn prepare(&mut self, queue: &wgpu::Queue, point_count: u32) {
        assert!(
            point_count as usize <= self.max_points,
            "{} points exceed grid capacity {}",
            point_count,
            self.max_points
        );
        self.point_count = point_count;

        let constants = GridConstants::new(&self.config, point_count, 0.0);
        queue.write_buffer(&self.constants_buffer, 0, bytemuck::bytes_of(&constants));

        let cell_count = self.config.cell_count();
        queue.write_buffer(&self.bucket_size_buffer, 0, &vec![0u8; cell_count * 4]);

        // End sentinel for consumers iterating [offset[c], offset[c + 1]).
        queue.write_buffer(
            &self.bucket_offset_buffer,
            (cell_count * 4) as u64,
            bytemuck::bytes_of(&point_count),
        );

        self.prefix.prepare(queue, cell_count as u32);
    }

    /// Record the full build: count, scan, scatter.
    ///
    /// Ordering between the passes and copies is enforced by the encoder.
    /// The caller owns submission and synchronization; the invariants hold
    /// once the recorded commands have executed.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let cell_count = self.config.cell_count();

        self.encode_pass(encoder, BuildPhase::Count);

        // Counts become offsets: copy, then scan in place.
        encoder.copy_buffer_to_buffer(
            &self.bucket_size_buffer,
            0,
            &self.bucket_offset_buffer,
            0,
            (cell_count * 4) as u64,
        );
        self.prefix.encode(encoder);

        // Seed the scatter cursors from the scanned offsets.
        encoder.copy_buffer_to_buffer(
            &self.bucket_offset_buffer,
            0,
            &self.bucket_cursor_buffer,
            0,
            (cell_count * 4) as u64,
        );

        self.encode_pass(encoder, BuildPhase::Scatter);
    }

    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, phase: BuildPhase) {
        let workgroups = (self.point_count + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
        if workgroups == 0 {
            return;
        }

        let (pipeline, label) = match phase {
            BuildPhase::Count => (&self.count_pipeline, "Grid Count Pass"),
            BuildPhase::Scatter => (&self.scatter_pipeline, "Grid Scatter Pass"),
        };

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }

    /// Prepare, record, and submit one build (convenience for one-shot use).
    pub fn build(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, point_count: u32) {
        self.prepare(queue, point_count);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Grid Build Encoder"),
        });
        self.encode(&mut encoder);
        queue.submit(std::iter::once(encoder.finish()));
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn point_count(&self) -> u32 {
        self.point_count
    }

    pub fn positions_buffer(&self) -> &Arc<wgpu::Buffer> {
        &self.positions
    }

    pub fn bucket_size_buffer(&self) -> &wgpu::Buffer {
        &self.bucket_size_buffer
    }

    pub fn bucket_offset_buffer(&self) -> &wgpu::Buffer {
        &self.bucket_offset_buffer
    }

    pub fn bucket_buffer(&self) -> &wgpu::Buffer {
        &self.bucket_buffer
    }

    /// Read back per-cell sizes (blocking).
    pub fn read_bucket_sizes(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u32>, GpuError> {
        read_u32_buffer(device, queue, &self.bucket_size_buffer, 0, self.config.cell_count())
    }

    /// Read back per-cell offsets including the end sentinel (blocking).
    pub fn read_bucket_offsets(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u32>, GpuError> {
        read_u32_buffer(
            device,
            queue,
            &self.bucket_offset_buffer,
            0,
            self.config.cell_count() + 1,
        )
    }

    /// Read back the compacted bucket array for the current point count
    /// (blocking).
    pub fn read_buckets(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u32>, GpuError> {
        read_u32_buffer(device, queue, &self.bucket_buffer, 0, self.point_count as usize)
    }
}
