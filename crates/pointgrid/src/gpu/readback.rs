//! Blocking GPU buffer readback through a staging buffer.
//!
//! Copies the requested range into a MAP_READ staging buffer, waits for the
//! map, and casts the bytes out. Blocking, so intended for tests and
//! diagnostics rather than per-frame use.

use std::sync::mpsc;

use super::{await_buffer_map, GpuError};

/// Read `count` u32 elements starting at element `first` from a device buffer.
///
/// The source buffer must have been created with `COPY_SRC` usage.
pub fn read_u32_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    first: usize,
    count: usize,
) -> Result<Vec<u32>, GpuError> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let byte_size = (count * std::mem::size_of::<u32>()) as u64;
    let byte_offset = (first * std::mem::size_of::<u32>()) as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size: byte_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, byte_offset, &staging, 0, byte_size);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    await_buffer_map(rx)?;

    let data = slice.get_mapped_range();
    let result: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();

    Ok(result)
}
