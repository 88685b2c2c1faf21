//! Uniform grid geometry shared by the host and the GPU kernels.

use glam::{IVec3, UVec3, Vec3};

/// Resolution and per-axis cell size of a uniform 3D grid.
///
/// The cell hash implemented here is the exact CPU mirror of the WGSL
/// kernels: `floor(p / spacing)` wrapped toroidally into `[0, resolution)`
/// per axis, flattened as `(z * ry + y) * rx + x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridConfig {
    pub resolution: UVec3,
    pub spacing: Vec3,
}

impl GridConfig {
    pub fn new(resolution: UVec3, spacing: Vec3) -> Self {
        assert!(
            resolution.cmpgt(UVec3::ZERO).all(),
            "grid resolution must be non-zero on every axis, got {resolution}"
        );
        assert!(
            spacing.cmpgt(Vec3::ZERO).all(),
            "grid spacing must be positive on every axis, got {spacing}"
        );
        Self { resolution, spacing }
    }

    /// Uniform spacing on all three axes.
    pub fn with_uniform_spacing(resolution: UVec3, spacing: f32) -> Self {
        Self::new(resolution, Vec3::splat(spacing))
    }

    pub fn cell_count(&self) -> usize {
        (self.resolution.x * self.resolution.y * self.resolution.z) as usize
    }

    /// Grid coordinate of a point, wrapped into `[0, resolution)` per axis.
    ///
    /// Negative coordinates wrap from the far side: with resolution 10, the
    /// cell one step below zero is cell 9.
    pub fn cell_coord(&self, p: Vec3) -> UVec3 {
        let g = (p / self.spacing).floor().as_ivec3();
        g.rem_euclid(self.resolution.as_ivec3()).as_uvec3()
    }

    /// Flattened cell index of a point.
    pub fn cell_index(&self, p: Vec3) -> u32 {
        let c = self.cell_coord(p);
        (c.z * self.resolution.y + c.y) * self.resolution.x + c.x
    }

    /// Flattened index of a grid coordinate offset, wrapped per axis.
    ///
    /// Used when enumerating the 27-cell neighbourhood around a cell.
    pub fn wrapped_index(&self, c: IVec3) -> u32 {
        let w = c.rem_euclid(self.resolution.as_ivec3()).as_uvec3();
        (w.z * self.resolution.y + w.y) * self.resolution.x + w.x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_coord_positive_space() {
        let config = GridConfig::with_uniform_spacing(UVec3::new(10, 10, 10), 0.1);
        assert_eq!(config.cell_coord(Vec3::new(0.05, 0.15, 0.95)), UVec3::new(0, 1, 9));
    }

    #[test]
    fn cell_coord_wraps_negative_coordinates() {
        let config = GridConfig::with_uniform_spacing(UVec3::new(10, 10, 10), 0.1);
        // One cell below zero lands in the last cell, not in cell -1.
        assert_eq!(config.cell_coord(Vec3::new(-0.05, 0.05, 0.05)), UVec3::new(9, 0, 0));
        // A full domain below zero wraps all the way around.
        assert_eq!(config.cell_coord(Vec3::new(-1.0, 0.0, 0.0)).x, 0);
    }

    #[test]
    fn cell_index_flattening_order() {
        let config = GridConfig::with_uniform_spacing(UVec3::new(4, 3, 2), 1.0);
        // index = (z * ry + y) * rx + x
        assert_eq!(config.cell_index(Vec3::new(1.5, 2.5, 1.5)), (1 * 3 + 2) * 4 + 1);
    }

    #[test]
    fn per_axis_spacing() {
        let config = GridConfig::new(UVec3::new(10, 10, 1), Vec3::new(0.1, 0.1, 1.0));
        assert_eq!(config.cell_count(), 100);
        assert_eq!(config.cell_index(Vec3::new(0.35, 0.75, 0.5)), 7 * 10 + 3);
    }

    #[test]
    fn wrapped_index_neighbour_offsets() {
        let config = GridConfig::with_uniform_spacing(UVec3::new(4, 4, 4), 1.0);
        assert_eq!(config.wrapped_index(IVec3::new(-1, 0, 0)), 3);
        assert_eq!(config.wrapped_index(IVec3::new(4, 0, 0)), 0);
    }
}
