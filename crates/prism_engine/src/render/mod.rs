//! Rendering system
//!
//! High-level, backend-agnostic rendering interface over the Vulkan
//! implementation. Applications talk to [`GraphicsBackend`] and the frame
//! protocol it documents; everything Vulkan-specific stays in [`vulkan`].

use thiserror::Error;

pub mod api;
pub mod frame;
pub mod vulkan;
pub mod window;

pub use api::{
    BackendResult, DebugViewMode, FrameStatus, GlobalUniformObject, GraphicsBackend,
    RendererConfig, ShaderHandle,
};
pub use frame::{FrameBegin, FrameEnd, FrameScheduler};
pub use vulkan::VulkanBackend;
pub use window::{Window, WindowError};

/// Top-level rendering error
#[derive(Error, Debug)]
pub enum RenderError {
    /// Error from the Vulkan backend
    #[error(transparent)]
    Vulkan(#[from] vulkan::VulkanError),

    /// Error from the windowing layer
    #[error(transparent)]
    Window(#[from] WindowError),
}
