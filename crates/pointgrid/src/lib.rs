//! GPU spatial hash grid and neighbour list construction.
//!
//! Buckets a point set into a uniform 3D grid entirely on the GPU using a
//! two-pass counting-sort construction (count, exclusive prefix sum,
//! scatter), then builds per-point neighbour lists by scanning the 27 cells
//! around each point. The parallel prefix sum is exposed as a standalone
//! primitive.

pub mod gpu;
pub mod grid;

pub use grid::GridConfig;
