//! Parallel exclusive prefix sum over a device buffer of u32.
//!
//! Implements the classic two-level scheme: per-workgroup Blelloch scans,
//! a single-workgroup scan of the per-block totals, and a carry add pass.
//! The scratch `block_sums` buffer keeps one trailing slot holding the grand
//! total of the scanned input, which callers can read back with [`GpuPrefixSum::total`].

use wgpu::util::DeviceExt;

use super::params::PrefixSumParams;
use super::readback::read_u32_buffer;
use super::GpuError;

/// Elements scanned by one workgroup of the local scan (256 invocations,
/// two elements each).
pub const ITEMS_PER_WORKGROUP: u32 = 512;

const WORKGROUP_SIZE: u32 = 256;

/// GPU exclusive prefix sum, in place over a caller-owned storage buffer.
///
/// Scratch is allocated once for `max_elements`; `configure` rebinds the
/// target buffer and must be called whenever the target changes. `prepare`
/// then `encode` record one scan; nothing blocks until the queue is waited on.
pub struct GpuPrefixSum {
    max_elements: usize,
    element_count: u32,

    params_buffer: wgpu::Buffer,
    block_sums_buffer: wgpu::Buffer,

    local_scan_pipeline: wgpu::ComputePipeline,
    scan_block_sums_pipeline: wgpu::ComputePipeline,
    add_block_offsets_pipeline: wgpu::ComputePipeline,

    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
}

impl GpuPrefixSum {
    pub fn new(device: &wgpu::Device, max_elements: usize) -> Self {
        assert!(max_elements > 0, "prefix sum capacity must be non-zero");

        let max_blocks = (max_elements as u32 + ITEMS_PER_WORKGROUP - 1) / ITEMS_PER_WORKGROUP;

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Prefix Sum Params"),
            size: std::mem::size_of::<PrefixSumParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // One slot per block plus the trailing grand-total slot.
        let block_sums_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Prefix Sum Block Sums"),
            size: ((max_blocks + 1) * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Prefix Sum Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/prefix_sum.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Prefix Sum Bind Group Layout"),
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
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
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
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Prefix Sum Pipeline Layout"),
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

        let local_scan_pipeline = create_pipeline("Local Prefix Sum Pipeline", "local_prefix_sum");
        let scan_block_sums_pipeline =
            create_pipeline("Scan Block Sums Pipeline", "scan_block_sums");
        let add_block_offsets_pipeline =
            create_pipeline("Add Block Offsets Pipeline", "add_block_offsets");

        Self {
            max_elements,
            element_count: 0,
            params_buffer,
            block_sums_buffer,
            local_scan_pipeline,
            scan_block_sums_pipeline,
            add_block_offsets_pipeline,
            bind_group_layout,
            bind_group: None,
        }
    }

    /// Bind the target buffer to be scanned.
    ///
    /// Must be called before the first `encode` and again whenever the target
    /// buffer is replaced. The buffer needs `STORAGE` usage and room for the
    /// element count later passed to `prepare`.
    pub fn configure(&mut self, device: &wgpu::Device, buffer: &wgpu::Buffer) {
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Prefix Sum Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.block_sums_buffer.as_entire_binding(),
                },
            ],
        }));
    }

    /// Upload the element count and clear the block-sum scratch.
    pub fn prepare(&mut self, queue: &wgpu::Queue, element_count: u32) {
        assert!(
            element_count as usize <= self.max_elements,
            "scan of {} elements exceeds configured capacity {}",
            element_count,
            self.max_elements
        );
        self.element_count = element_count;

        let params = PrefixSumParams::new(element_count);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        queue.write_buffer(
            &self.block_sums_buffer,
            0,
            &vec![0u8; self.block_sums_buffer.size() as usize],
        );
    }

    /// Record the scan into a command encoder. Never blocks.
    ///
    /// Zero elements records nothing. Ordering between the three stages is
    /// enforced by the encoder's pass boundaries.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let bind_group = self
            .bind_group
            .as_ref()
            .expect("GpuPrefixSum::configure must be called before encode");

        if self.element_count == 0 {
            return;
        }

        let num_blocks = (self.element_count + ITEMS_PER_WORKGROUP - 1) / ITEMS_PER_WORKGROUP;

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Local Prefix Sum Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.local_scan_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(num_blocks, 1, 1);
        }

        // Always run the block-sum scan so the trailing grand-total slot is
        // valid even for single-block inputs.
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Scan Block Sums Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.scan_block_sums_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }

        if num_blocks > 1 {
            let add_workgroups = (self.element_count + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Add Block Offsets Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.add_block_offsets_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(add_workgroups, 1, 1);
        }
    }

    /// Scan a host slice in place (blocking).
    ///
    /// Uploads into a fresh storage buffer, runs the scan through a one-shot
    /// submission, and copies the result back. Intended for utility callers
    /// and tests rather than per-frame work.
    pub fn scan_slice(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        data: &mut [u32],
    ) -> Result<(), GpuError> {
        if data.is_empty() {
            return Ok(());
        }

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Prefix Sum Host Data"),
            contents: bytemuck::cast_slice(data),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        self.configure(device, &buffer);
        self.prepare(queue, data.len() as u32);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Host Scan Encoder"),
        });
        self.encode(&mut encoder);
        queue.submit(std::iter::once(encoder.finish()));

        let result = read_u32_buffer(device, queue, &buffer, 0, data.len())?;
        data.copy_from_slice(&result);
        Ok(())
    }

    /// Read back the grand total of the most recent scan (blocking).
    pub fn total(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<u32, GpuError> {
        let num_blocks = (self.element_count + ITEMS_PER_WORKGROUP - 1) / ITEMS_PER_WORKGROUP;
        let result = read_u32_buffer(
            device,
            queue,
            &self.block_sums_buffer,
            num_blocks as usize,
            1,
        )?;
        Ok(result[0])
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }
}
