//! # Prism Engine
//!
//! A small real-time 3D engine core with a Vulkan rendering backend.
//!
//! ## Features
//!
//! - **Vulkan Rendering**: scored device selection, swapchain-synchronized
//!   frame submission, and automatic recreation on resize
//! - **Declarative Shaders**: shaders described by configuration, with
//!   global, instance, and local uniform scopes
//! - **Frames In Flight**: CPU records ahead of the GPU without data races
//! - **Tagged GPU Accounting**: every GPU allocation is tracked by category
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prism_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut window = Window::new("Demo", 1280, 720)?;
//!     let config = RendererConfig::new("Demo");
//!     let mut backend = VulkanBackend::new(&mut window, &config)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if backend.begin_frame(1.0 / 60.0)? == FrameStatus::Ready {
//!             backend.end_frame()?;
//!         }
//!     }
//!     backend.wait_idle()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod foundation;
pub mod render;
pub mod resources;

/// Common imports for engine users
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::foundation::math::{Mat4, Vec3, Vec4};
    pub use crate::render::{
        DebugViewMode, FrameStatus, GraphicsBackend, RenderError, RendererConfig, ShaderHandle,
        VulkanBackend, Window, WindowError,
    };
    pub use crate::resources::{GeometryData, ShaderConfig, TextureData, TextureHandle, Vertex3D};
}
