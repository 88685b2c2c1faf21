//! GPU per-point neighbour list construction over a built hash grid.
//!
//! Structurally the same two-pass protocol as the grid build, keyed by point
//! instead of by cell: count matches in the 27 surrounding cells, scan the
//! counts into offsets, scatter matching indices through per-point cursors.
//! A grid build must have been recorded earlier into the same command stream;
//! this module only reads the grid's output buffers.

use crate::grid::GridConfig;

use super::hash_grid::GpuPointHashGrid;
use super::params::GridConstants;
use super::prefix_sum::GpuPrefixSum;
use super::readback::read_u32_buffer;
use super::GpuError;

const WORKGROUP_SIZE: u32 = 256;

/// GPU neighbour list: for every point, the indices of all points within
/// `radius` (itself included, at distance zero).
///
/// Matches within one point's range appear in cell-enumeration order and are
/// not deterministic across runs; consumers must treat each range as a set.
pub struct GpuNeighbourList {
    config: GridConfig,
    radius: f32,
    max_points: usize,
    max_pairs: usize,
    point_count: u32,

    constants_buffer: wgpu::Buffer,
    neighbour_size_buffer: wgpu::Buffer,
    neighbour_offset_buffer: wgpu::Buffer,
    neighbour_cursor_buffer: wgpu::Buffer,
    neighbour_list_buffer: wgpu::Buffer,

    count_pipeline: wgpu::ComputePipeline,
    scatter_pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,

    prefix: GpuPrefixSum,
}

impl GpuNeighbourList {
    /// Create a neighbour list builder over `grid`'s output buffers.
    ///
    /// `max_pairs` bounds the flattened list length (the sum of all
    /// per-point neighbour counts); exceeding it during a build is an
    /// out-of-bounds write on the GPU, so size it for the worst case.
    ///
    /// The 27-cell search is only exhaustive when every cell is at least as
    /// large as the search radius, so `spacing >= radius` is asserted here.
    /// A resolution of at least 3 per axis is likewise asserted: with fewer
    /// cells the wrapped enumeration visits the same cell twice and would
    /// record duplicate matches.
    pub fn new(
        device: &wgpu::Device,
        grid: &GpuPointHashGrid,
        radius: f32,
        max_pairs: usize,
    ) -> Self {
        let config = *grid.config();
        let max_points = grid.max_points();

        assert!(radius > 0.0, "search radius must be positive, got {radius}");
        assert!(
            config.spacing.cmpge(glam::Vec3::splat(radius)).all(),
            "search radius {} exceeds grid spacing {}; the 27-cell search would undercount",
            radius,
            config.spacing
        );
        assert!(
            config.resolution.cmpge(glam::UVec3::splat(3)).all(),
            "neighbour search needs a resolution of at least 3 per axis, got {}",
            config.resolution
        );
        assert!(max_pairs > 0, "neighbour list capacity must be non-zero");

        let constants_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Neighbour Constants"),
            size: std::mem::size_of::<GridConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let neighbour_size_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Neighbour Sizes"),
            size: (max_points * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let neighbour_offset_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Neighbour Offsets"),
            size: (max_points * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let neighbour_cursor_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Neighbour Cursors"),
            size: (max_points * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let neighbour_list_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Neighbour List"),
            size: (max_pairs * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Neighbour List Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/neighbour_list.wgsl").into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Neighbour List Bind Group Layout"),
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
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, false),
                storage_entry(6, false),
                storage_entry(7, false),
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Neighbour List Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: constants_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: grid.positions_buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: grid.bucket_size_buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: grid.bucket_offset_buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: grid.bucket_buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: neighbour_size_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: neighbour_cursor_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: neighbour_list_buffer.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Neighbour List Pipeline Layout"),
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

        let count_pipeline = create_pipeline("Count Neighbours Pipeline", "count_neighbours");
        let scatter_pipeline =
            create_pipeline("Scatter Neighbours Pipeline", "scatter_neighbours");

        let mut prefix = GpuPrefixSum::new(device, max_points);
        prefix.configure(device, &neighbour_offset_buffer);

        Self {
            config,
            radius,
            max_points,
            max_pairs,
            point_count: 0,
            constants_buffer,
            neighbour_size_buffer,
            neighbour_offset_buffer,
            neighbour_cursor_buffer,
            neighbour_list_buffer,
            count_pipeline,
            scatter_pipeline,
            bind_group,
            prefix,
        }
    }

    /// Upload constants for one build.
    pub fn prepare(&mut self, queue: &wgpu::Queue, point_count: u32) {
        assert!(
            point_count as usize <= self.max_points,
            "{} points exceed neighbour list capacity {}",
            point_count,
            self.max_points
        );
        self.point_count = point_count;

        let constants = GridConstants::new(&self.config, point_count, self.radius);
        queue.write_buffer(&self.constants_buffer, 0, bytemuck::bytes_of(&constants));

        self.prefix.prepare(queue, point_count);
    }

    /// Record the full build: count, scan, scatter.
    ///
    /// The grid this list was created over must have a build recorded earlier
    /// in the same command stream for the current positions.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let workgroups = (self.point_count + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
        if workgroups == 0 {
            return;
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Neighbour Count Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.count_pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        let byte_size = (self.point_count * 4) as u64;
        encoder.copy_buffer_to_buffer(
            &self.neighbour_size_buffer,
            0,
            &self.neighbour_offset_buffer,
            0,
            byte_size,
        );
        self.prefix.encode(encoder);

        encoder.copy_buffer_to_buffer(
            &self.neighbour_offset_buffer,
            0,
            &self.neighbour_cursor_buffer,
            0,
            byte_size,
        );

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Neighbour Scatter Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.scatter_pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
    }

    /// Prepare, record, and submit one build (convenience for one-shot use).
    pub fn build(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, point_count: u32) {
        self.prepare(queue, point_count);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Neighbour Build Encoder"),
        });
        self.encode(&mut encoder);
        queue.submit(std::iter::once(encoder.finish()));
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn max_pairs(&self) -> usize {
        self.max_pairs
    }

    pub fn neighbour_size_buffer(&self) -> &wgpu::Buffer {
        &self.neighbour_size_buffer
    }

    pub fn neighbour_offset_buffer(&self) -> &wgpu::Buffer {
        &self.neighbour_offset_buffer
    }

    pub fn neighbour_list_buffer(&self) -> &wgpu::Buffer {
        &self.neighbour_list_buffer
    }

    /// Total number of neighbour pairs found by the last build (blocking).
    pub fn total_neighbours(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<u32, GpuError> {
        self.prefix.total(device, queue)
    }

    /// Read back per-point neighbour counts (blocking).
    pub fn read_neighbour_sizes(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u32>, GpuError> {
        read_u32_buffer(
            device,
            queue,
            &self.neighbour_size_buffer,
            0,
            self.point_count as usize,
        )
    }

    /// Read back per-point offsets into the flattened list (blocking).
    pub fn read_neighbour_offsets(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u32>, GpuError> {
        read_u32_buffer(
            device,
            queue,
            &self.neighbour_offset_buffer,
            0,
            self.point_count as usize,
        )
    }

    /// Read back the flattened neighbour list (blocking).
    ///
    /// `count` is typically the value returned by `total_neighbours`.
    pub fn read_neighbour_list(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        count: usize,
    ) -> Result<Vec<u32>, GpuError> {
        read_u32_buffer(device, queue, &self.neighbour_list_buffer, 0, count)
    }
}
