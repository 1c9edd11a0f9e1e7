#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Convex hull computation.
pub mod convex_hull;

/// Hidden point removal operator.
pub mod hpr;

/// I/O utilities for reading and writing point clouds.
pub mod io;

/// Octree spatial index.
pub mod octree;

/// Point cloud entity.
pub mod pointcloud;

/// Indexed views over a point cloud.
pub mod reference;

/// Octree based cloud subsampling.
pub mod sampling;

/// Visibility reduction pipeline.
pub mod visibility;
