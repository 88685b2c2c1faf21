//! GPU shader parameter structs.
//!
//! `#[repr(C)]` structs uploaded to uniform buffers; field order and padding
//! mirror the WGSL declarations exactly (vec3 fields align to 16 bytes).

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

use crate::grid::GridConfig;

/// Constants for the hash grid and neighbour list kernels (32 bytes).
///
/// The grid kernels ignore `radius`; the neighbour kernels use all fields.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub(crate) struct GridConstants {
    pub resolution: [u32; 3],
    pub point_count: u32,
    pub spacing: [f32; 3],
    pub radius: f32,
}

impl GridConstants {
    pub fn new(config: &GridConfig, point_count: u32, radius: f32) -> Self {
        let UVec3 { x: rx, y: ry, z: rz } = config.resolution;
        let Vec3 { x: sx, y: sy, z: sz } = config.spacing;
        Self {
            resolution: [rx, ry, rz],
            point_count,
            spacing: [sx, sy, sz],
            radius,
        }
    }
}

/// Parameters for the prefix sum kernels (16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub(crate) struct PrefixSumParams {
    pub element_count: u32,
    pub _pad0: u32,
    pub _pad1: u32,
    pub _pad2: u32,
}

impl PrefixSumParams {
    pub fn new(element_count: u32) -> Self {
        Self {
            element_count,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        }
    }
}
