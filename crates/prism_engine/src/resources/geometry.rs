//! Backend-agnostic geometry data
//!
//! Vertex layouts match the builtin shaders attribute-for-attribute; the
//! renderer uploads these buffers verbatim.

/// Standard 3D vertex: position, normal, tangent, color, texture coordinate
///
/// `#[repr(C)]` keeps the layout stable for GPU upload. 16 floats, 64 bytes,
/// no implicit padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex3D {
    /// Position in model space
    pub position: [f32; 3],
    /// Surface normal
    pub normal: [f32; 3],
    /// Tangent with handedness in w
    pub tangent: [f32; 4],
    /// Per-vertex color
    pub color: [f32; 4],
    /// Texture coordinate
    pub texture_coord: [f32; 2],
}

// Safe: repr(C), only f32 fields, no padding bytes.
unsafe impl bytemuck::Pod for Vertex3D {}
unsafe impl bytemuck::Zeroable for Vertex3D {}

impl Vertex3D {
    /// Build a vertex with white color and a zero tangent
    pub fn new(position: [f32; 3], normal: [f32; 3], texture_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tangent: [0.0; 4],
            color: [1.0, 1.0, 1.0, 1.0],
            texture_coord,
        }
    }
}

/// 2D vertex for screen-space geometry
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex2D {
    /// Position in screen or clip space
    pub position: [f32; 2],
    /// Texture coordinate
    pub texture_coord: [f32; 2],
}

// Safe: repr(C), only f32 fields, no padding bytes.
unsafe impl bytemuck::Pod for Vertex2D {}
unsafe impl bytemuck::Zeroable for Vertex2D {}

/// A complete indexed triangle mesh
#[derive(Debug, Clone)]
pub struct GeometryData {
    /// Geometry name, for diagnostics
    pub name: String,
    /// Vertex data
    pub vertices: Vec<Vertex3D>,
    /// Triangle indices into `vertices`
    pub indices: Vec<u32>,
}

impl GeometryData {
    /// Build a mesh from raw vertex and index data
    pub fn new(name: &str, vertices: Vec<Vertex3D>, indices: Vec<u32>) -> Self {
        Self { name: name.to_string(), vertices, indices }
    }

    /// Axis-aligned unit cube centered at the origin, one quad per face
    pub fn unit_cube(name: &str) -> Self {
        let h = 0.5f32;
        // (normal, four corners counter-clockwise seen from outside)
        let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
            ([0.0, 0.0, 1.0], [[-h, -h, h], [h, -h, h], [h, h, h], [-h, h, h]]),
            ([0.0, 0.0, -1.0], [[h, -h, -h], [-h, -h, -h], [-h, h, -h], [h, h, -h]]),
            ([1.0, 0.0, 0.0], [[h, -h, h], [h, -h, -h], [h, h, -h], [h, h, h]]),
            ([-1.0, 0.0, 0.0], [[-h, -h, -h], [-h, -h, h], [-h, h, h], [-h, h, -h]]),
            ([0.0, 1.0, 0.0], [[-h, h, h], [h, h, h], [h, h, -h], [-h, h, -h]]),
            ([0.0, -1.0, 0.0], [[-h, -h, -h], [h, -h, -h], [h, -h, h], [-h, -h, h]]),
        ];
        let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, corners) in &faces {
            let base = vertices.len() as u32;
            for (corner, uv) in corners.iter().zip(uvs) {
                vertices.push(Vertex3D::new(*corner, *normal, uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(name, vertices, indices)
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_strides_have_no_padding() {
        assert_eq!(std::mem::size_of::<Vertex3D>(), 64);
        assert_eq!(std::mem::size_of::<Vertex2D>(), 16);
    }

    #[test]
    fn test_vertex_bytes_round_trip_through_bytemuck() {
        let vertex = Vertex3D::new([1.0, 2.0, 3.0], [0.0, 1.0, 0.0], [0.5, 0.5]);
        let bytes: &[u8] = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 64);
        let back: &Vertex3D = bytemuck::from_bytes(bytes);
        assert_eq!(*back, vertex);
    }

    #[test]
    fn test_unit_cube_topology() {
        let cube = GeometryData::unit_cube("cube");
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.triangle_count(), 12);
        let max_index = cube.indices.iter().max().copied().unwrap();
        assert!((max_index as usize) < cube.vertices.len());
    }

    #[test]
    fn test_unit_cube_is_centered() {
        let cube = GeometryData::unit_cube("cube");
        for vertex in &cube.vertices {
            for coordinate in vertex.position {
                assert!(coordinate.abs() <= 0.5);
            }
        }
    }
}
