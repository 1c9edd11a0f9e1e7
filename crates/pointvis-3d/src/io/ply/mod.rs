mod parser;
mod properties;
mod writer;

pub use parser::*;
pub use properties::*;
pub use writer::*;

use crate::pointcloud::PointCloudError;

/// Error types for the PLY module.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PlyError {
    /// Failed to read or write the PLY file
    #[error("Failed to access PLY file")]
    Io(#[from] std::io::Error),

    /// Malformed PLY header
    #[error("Malformed PLY header: {0}")]
    MalformedHeader(String),

    /// Unsupported PLY format
    #[error("Unsupported PLY format {0}")]
    UnsupportedFormat(String),

    /// Unsupported PLY property
    #[error("Unsupported PLY property {0}")]
    UnsupportedProperty(String),

    /// A vertex coordinate property is missing
    #[error("Missing vertex property {0}")]
    MissingCoordinate(&'static str),

    /// Failed to parse a value of an ascii PLY file
    #[error("Failed to parse PLY value at vertex {0}")]
    ParseValue(usize),

    /// The cloud attributes are inconsistent
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),
}
