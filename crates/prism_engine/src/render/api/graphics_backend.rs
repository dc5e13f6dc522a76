//! Backend abstraction for the rendering system
//!
//! The frontend talks to whatever backend is active through
//! [`GraphicsBackend`]; only the backend knows about the graphics API.

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::render::RenderError;
use crate::resources::{GeometryData, ShaderConfig, TextureData, TextureHandle};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, RenderError>;

slotmap::new_key_type! {
    /// Stable handle to a shader owned by the backend
    pub struct ShaderHandle;
}

/// Outcome of a frame boundary call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Frame begun; draw commands may be recorded
    Ready,
    /// Swapchain was not usable; drop this frame and try again next tick
    Skipped,
    /// Frame submitted and queued for presentation
    Presented,
}

/// Shading mode applied by the builtin material shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugViewMode {
    /// Full material shading
    #[default]
    Default,
    /// Lighting contribution only
    Lighting,
    /// Surface normals as color
    Normals,
}

impl DebugViewMode {
    /// Integer value written into the global uniform block
    pub fn as_i32(self) -> i32 {
        match self {
            DebugViewMode::Default => 0,
            DebugViewMode::Lighting => 1,
            DebugViewMode::Normals => 2,
        }
    }
}

/// CPU-side mirror of the builtin material shader's global uniform scope
///
/// Field order matches the scope's declaration order, so the packed offsets
/// line up with the shader's uniform table: projection 0, view 64,
/// ambient_color 128, view_position 144, mode 156. 160 bytes, no implicit
/// padding.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalUniformObject {
    /// Camera projection matrix
    pub projection: Mat4,
    /// Camera view matrix
    pub view: Mat4,
    /// Scene-wide ambient light color
    pub ambient_color: Vec4,
    /// Camera position in world space
    pub view_position: Vec3,
    /// Active shading mode, as produced by [`DebugViewMode::as_i32`]
    pub mode: i32,
}

// Safe: repr(C), only f32 and i32 fields, no padding bytes.
unsafe impl bytemuck::Pod for GlobalUniformObject {}
unsafe impl bytemuck::Zeroable for GlobalUniformObject {}

/// Main rendering backend trait
///
/// Frame protocol: `begin_frame` must return [`FrameStatus::Ready`] before
/// any draw state is touched, and every ready frame must be closed with
/// `end_frame`. Between the two, shader state follows the order use shader,
/// bind and apply globals, then per object bind instance, set uniforms,
/// apply, draw.
pub trait GraphicsBackend {
    /// Begin a frame; on [`FrameStatus::Skipped`] no other calls are valid
    /// until the next `begin_frame`
    fn begin_frame(&mut self, delta_time: f32) -> BackendResult<FrameStatus>;

    /// Submit recorded commands and queue the image for presentation
    fn end_frame(&mut self) -> BackendResult<FrameStatus>;

    /// Note a new framebuffer size; applied at the next `begin_frame`
    fn on_resized(&mut self, width: u32, height: u32);

    /// Stage per-frame camera and environment state for the active shader
    fn update_global_state(
        &mut self,
        projection: Mat4,
        view: Mat4,
        view_position: Vec3,
        ambient_color: Vec4,
        mode: DebugViewMode,
    ) -> BackendResult<()>;

    /// Build a shader and its pipeline from a declarative config
    fn create_shader(&mut self, config: &ShaderConfig) -> BackendResult<ShaderHandle>;

    /// Make a shader current, binding its pipeline if a frame is being
    /// recorded
    fn use_shader(&mut self, shader: ShaderHandle) -> BackendResult<()>;

    /// Bind the global scope of the active shader
    fn bind_globals(&mut self) -> BackendResult<()>;

    /// Flush staged global uniforms and bind descriptor set 0
    fn apply_global(&mut self) -> BackendResult<()>;

    /// Bind one instance of the active shader
    fn bind_instance(&mut self, instance: u32) -> BackendResult<()>;

    /// Flush the bound instance's staged uniforms and bind descriptor set 1
    fn apply_instance(&mut self) -> BackendResult<()>;

    /// Stage a uniform value on the active shader
    fn set_uniform(&mut self, name: &str, value: &[u8]) -> BackendResult<()>;

    /// Bind a texture to a sampler uniform on the active shader
    fn set_sampler(&mut self, name: &str, texture: TextureHandle) -> BackendResult<()>;

    /// Allocate per-instance resources on the active shader
    fn acquire_shader_instance(&mut self) -> BackendResult<u32>;

    /// Release per-instance resources back to the active shader's pool
    fn release_shader_instance(&mut self, instance: u32) -> BackendResult<()>;

    /// Upload an indexed mesh, replacing the previously uploaded one
    fn upload_geometry(&mut self, geometry: &GeometryData) -> BackendResult<()>;

    /// Draw the uploaded mesh with a per-draw model matrix
    fn draw_geometry(&mut self, model: Mat4) -> BackendResult<()>;

    /// Create a texture from pixel data
    fn create_texture(&mut self, data: &TextureData) -> BackendResult<TextureHandle>;

    /// Destroy a texture; its handle becomes invalid
    fn destroy_texture(&mut self, texture: TextureHandle) -> BackendResult<()>;

    /// Current swapchain extent (width, height)
    fn swapchain_extent(&self) -> (u32, u32);

    /// Number of frames in flight
    fn frames_in_flight(&self) -> usize;

    /// Block until the device finishes all submitted work
    fn wait_idle(&self) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_view_mode_values() {
        assert_eq!(DebugViewMode::Default.as_i32(), 0);
        assert_eq!(DebugViewMode::Lighting.as_i32(), 1);
        assert_eq!(DebugViewMode::Normals.as_i32(), 2);
        assert_eq!(DebugViewMode::default(), DebugViewMode::Default);
    }

    #[test]
    fn test_global_uniform_object_matches_the_builtin_table() {
        use crate::resources::shader::UniformTable;
        use std::mem::{offset_of, size_of};

        let table = UniformTable::from_config(&ShaderConfig::builtin_material(), 256).unwrap();
        assert_eq!(size_of::<GlobalUniformObject>() as u64, table.global_ubo_size());

        let offset = |name: &str| {
            let id = table.uniform_index(name).unwrap();
            table.uniform(id).unwrap().offset
        };
        assert_eq!(offset_of!(GlobalUniformObject, projection) as u64, offset("projection"));
        assert_eq!(offset_of!(GlobalUniformObject, view) as u64, offset("view"));
        assert_eq!(
            offset_of!(GlobalUniformObject, ambient_color) as u64,
            offset("ambient_color")
        );
        assert_eq!(
            offset_of!(GlobalUniformObject, view_position) as u64,
            offset("view_position")
        );
        assert_eq!(offset_of!(GlobalUniformObject, mode) as u64, offset("mode"));
    }
}
