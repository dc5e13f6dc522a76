//! CPU-side texture resources
//!
//! Textures are described here as plain RGBA pixel data; uploading them to
//! the GPU is the renderer's job. Handles are slotmap keys so a released
//! texture's handle can never alias a later one.

use std::path::Path;

use crate::resources::ResourceError;

slotmap::new_key_type! {
    /// Stable handle to a texture owned by the renderer
    pub struct TextureHandle;
}

/// RGBA8 pixel data ready for GPU upload
#[derive(Debug, Clone)]
pub struct TextureData {
    /// Texture name, for diagnostics
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of color channels, always 4 after loading
    pub channels: u8,
    /// Whether any pixel has alpha below 255
    pub has_transparency: bool,
    /// Raw RGBA bytes, `width * height * 4` of them
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Load and decode an image file, converting to RGBA8
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ResourceError> {
        let path = path.as_ref();
        log::debug!("Loading texture from {path:?}");

        let decoded = image::open(path)
            .map_err(|e| ResourceError::LoadFailed(format!("failed to decode {path:?}: {e}")))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba.into_raw();
        let has_transparency = pixels.chunks_exact(4).any(|px| px[3] < u8::MAX);

        let name = path
            .file_stem()
            .map_or_else(|| "unnamed".to_string(), |stem| stem.to_string_lossy().into_owned());
        log::info!("Loaded texture \"{name}\" ({width}x{height})");

        Ok(Self { name, width, height, channels: 4, has_transparency, pixels })
    }

    /// Decode an image from memory, converting to RGBA8
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self, ResourceError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ResourceError::LoadFailed(format!("failed to decode \"{name}\": {e}")))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba.into_raw();
        let has_transparency = pixels.chunks_exact(4).any(|px| px[3] < u8::MAX);

        Ok(Self {
            name: name.to_string(),
            width,
            height,
            channels: 4,
            has_transparency,
            pixels,
        })
    }

    /// Build a single-color texture
    pub fn solid_color(name: &str, width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = (width * height) as usize;
        let mut pixels = Vec::with_capacity(pixel_count * 4);
        for _ in 0..pixel_count {
            pixels.extend_from_slice(&color);
        }
        Self {
            name: name.to_string(),
            width,
            height,
            channels: 4,
            has_transparency: color[3] < u8::MAX,
            pixels,
        }
    }

    /// The white/blue checkerboard used wherever a texture is missing
    pub fn fallback_checkerboard() -> Self {
        const DIM: u32 = 256;
        const CELL: u32 = 32;
        let mut pixels = Vec::with_capacity((DIM * DIM * 4) as usize);
        for y in 0..DIM {
            for x in 0..DIM {
                let checked = ((x / CELL) + (y / CELL)) % 2 == 0;
                if checked {
                    pixels.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    pixels.extend_from_slice(&[0, 0, 255, 255]);
                }
            }
        }
        Self {
            name: "Texture.Fallback".to_string(),
            width: DIM,
            height: DIM,
            channels: 4,
            has_transparency: false,
            pixels,
        }
    }

    /// Size of the pixel data in bytes
    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_dimensions_and_pixels() {
        let tex = TextureData::solid_color("red", 4, 4, [255, 0, 0, 255]);
        assert_eq!(tex.width, 4);
        assert_eq!(tex.height, 4);
        assert_eq!(tex.size_bytes(), 4 * 4 * 4);
        assert_eq!(&tex.pixels[0..4], &[255, 0, 0, 255]);
        assert!(!tex.has_transparency);
    }

    #[test]
    fn test_transparency_detection() {
        let tex = TextureData::solid_color("glass", 2, 2, [255, 255, 255, 128]);
        assert!(tex.has_transparency);
    }

    #[test]
    fn test_fallback_checkerboard_alternates_cells() {
        let tex = TextureData::fallback_checkerboard();
        assert_eq!(tex.width, 256);
        assert_eq!(tex.height, 256);
        assert_eq!(tex.size_bytes(), 256 * 256 * 4);

        // First cell white, the next cell over blue.
        assert_eq!(&tex.pixels[0..4], &[255, 255, 255, 255]);
        let next_cell = (32 * 4) as usize;
        assert_eq!(&tex.pixels[next_cell..next_cell + 4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_missing_file_reports_load_failure() {
        let result = TextureData::from_file("/nonexistent/texture.png");
        assert!(matches!(result, Err(ResourceError::LoadFailed(_))));
    }
}
