//! CPU-side resource types shared across render backends

pub mod geometry;
pub mod shader;
pub mod texture;

pub use geometry::{GeometryData, Vertex2D, Vertex3D};
pub use shader::{
    AttributeConfig, AttributeType, ShaderConfig, ShaderError, ShaderScope, ShaderStages,
    ShaderState, ShaderUniform, UniformConfig, UniformTable, UniformType,
};
pub use texture::{TextureData, TextureHandle};

use thiserror::Error;

/// Errors raised while loading or describing resources
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Underlying file could not be read
    #[error("Resource IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File was read but could not be decoded
    #[error("Resource load failed: {0}")]
    LoadFailed(String),

    /// Requested resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),
}
