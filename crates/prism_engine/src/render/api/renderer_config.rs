//! Renderer configuration
//!
//! Applications describe what they want from the renderer here instead of
//! reaching into backend internals.

/// Configuration consumed when the rendering backend starts up
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Application name passed to the graphics API
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable API validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Background clear color, linear RGBA
    pub clear_color: [f32; 4],
}

impl RendererConfig {
    /// Create a configuration with defaults for `app_name`
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            frames_in_flight: 2,
            enable_validation: None,
            clear_color: [0.005, 0.005, 0.005, 1.0],
        }
    }

    /// Set the application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set the frames-in-flight count, clamped to a workable range
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.clamp(1, 8);
        self
    }

    /// Set the background clear color, linear RGBA
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Force validation layers on or off
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = Some(enable);
        self
    }

    /// Whether validation layers should be requested for this build
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Prism Application")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.application_version, (1, 0, 0));
    }

    #[test]
    fn test_frames_in_flight_is_clamped() {
        assert_eq!(RendererConfig::default().with_frames_in_flight(0).frames_in_flight, 1);
        assert_eq!(RendererConfig::default().with_frames_in_flight(3).frames_in_flight, 3);
        assert_eq!(RendererConfig::default().with_frames_in_flight(64).frames_in_flight, 8);
    }
}
