//! Vulkan rendering backend
//!
//! Low-level wrappers around the Vulkan API plus the [`VulkanBackend`]
//! orchestrator that implements the engine's backend trait.

pub mod backend;
pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

// Re-export commonly used types
pub use backend::VulkanBackend;
pub use buffer::{Buffer, IndexBuffer, VertexBuffer};
pub use commands::{CommandPool, CommandRecorder};
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilies};
pub use error::{VulkanError, VulkanResult};
pub use framebuffer::{DepthBuffer, Framebuffer};
pub use instance::{Surface, VulkanInstance};
pub use pipeline::{GraphicsPipeline, PipelineCreateInfo, ShaderModule};
pub use render_pass::RenderPass;
pub use shader::VulkanShader;
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
pub use texture::VulkanTexture;
