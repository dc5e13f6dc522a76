//! Backend-agnostic rendering API surface

pub mod graphics_backend;
pub mod renderer_config;

pub use graphics_backend::{
    BackendResult, DebugViewMode, FrameStatus, GlobalUniformObject, GraphicsBackend, ShaderHandle,
};
pub use renderer_config::RendererConfig;
