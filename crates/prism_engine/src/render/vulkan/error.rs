//! Vulkan backend error types

use ash::vk;
use thiserror::Error;

use crate::resources::ShaderError;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Named resource could not be found
    #[error("Resource not found: {name}")]
    ResourceNotFound {
        /// Name or id of the missing resource
        name: String,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// No suitable memory type found for an allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Vulkan initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Shader declaration or state error
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
