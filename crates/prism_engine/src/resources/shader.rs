//! Generic shader description and uniform state
//!
//! A shader is declared by a [`ShaderConfig`] (stages, vertex attributes,
//! uniforms with their binding scope) loaded from a RON file. From that
//! declaration a [`UniformTable`] resolves every uniform to a byte placement
//! that respects the device's uniform-buffer alignment, and a [`ShaderState`]
//! holds the staged uniform values and draw-time binding state shared by any
//! concrete pipeline built from the config. Nothing in this module touches
//! the GPU.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::foundation::collections::SlotPool;
use crate::resources::texture::TextureHandle;

/// Maximum number of simultaneously live shader instances
pub const MAX_INSTANCE_COUNT: usize = 1024;

/// Maximum accepted length for shader, attribute, and uniform names
pub const MAX_NAME_LENGTH: usize = 256;

/// Capacity of the per-draw (local scope) push constant block in bytes
pub const PUSH_CONSTANT_STRIDE: u64 = 128;

bitflags::bitflags! {
    /// Pipeline stages a shader program participates in
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderStages: u8 {
        /// Vertex stage
        const VERTEX = 0x1;
        /// Geometry stage
        const GEOMETRY = 0x2;
        /// Fragment stage
        const FRAGMENT = 0x4;
        /// Compute stage
        const COMPUTE = 0x8;
    }
}

/// Serde representation of [`ShaderStages`] as a list of stage names
mod stage_names {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::ShaderStages;

    const NAMES: [(&str, ShaderStages); 4] = [
        ("vertex", ShaderStages::VERTEX),
        ("geometry", ShaderStages::GEOMETRY),
        ("fragment", ShaderStages::FRAGMENT),
        ("compute", ShaderStages::COMPUTE),
    ];

    pub fn serialize<S: Serializer>(stages: &ShaderStages, serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(_, flag)| stages.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        names.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ShaderStages, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        let mut stages = ShaderStages::empty();
        for name in &names {
            let (_, flag) = NAMES
                .iter()
                .find(|(known, _)| known == name)
                .ok_or_else(|| D::Error::custom(format!("unknown shader stage \"{name}\"")))?;
            stages |= *flag;
        }
        Ok(stages)
    }
}

/// Supported vertex attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Single 32-bit float
    Float32,
    /// Two 32-bit floats
    Vec2,
    /// Three 32-bit floats
    Vec3,
    /// Four 32-bit floats
    Vec4,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 8-bit integer
    Uint8,
    /// Unsigned 16-bit integer
    Uint16,
    /// Unsigned 32-bit integer
    Uint32,
}

impl AttributeType {
    /// Size of one attribute of this type in bytes
    pub fn size(self) -> u32 {
        match self {
            AttributeType::Int8 | AttributeType::Uint8 => 1,
            AttributeType::Int16 | AttributeType::Uint16 => 2,
            AttributeType::Float32 | AttributeType::Int32 | AttributeType::Uint32 => 4,
            AttributeType::Vec2 => 8,
            AttributeType::Vec3 => 12,
            AttributeType::Vec4 => 16,
        }
    }
}

/// Supported uniform value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformType {
    /// Single 32-bit float
    Float32,
    /// Two 32-bit floats
    Vec2,
    /// Three 32-bit floats
    Vec3,
    /// Four 32-bit floats
    Vec4,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 8-bit integer
    Uint8,
    /// Unsigned 16-bit integer
    Uint16,
    /// Unsigned 32-bit integer
    Uint32,
    /// 4x4 matrix of 32-bit floats
    Matrix4,
    /// Combined image sampler; carries no uniform-buffer bytes
    Sampler,
    /// Opaque block whose size comes from the declaration
    Custom,
}

impl UniformType {
    /// Intrinsic size in bytes; `None` for types sized by the declaration
    pub fn size(self) -> Option<u16> {
        match self {
            UniformType::Int8 | UniformType::Uint8 => Some(1),
            UniformType::Int16 | UniformType::Uint16 => Some(2),
            UniformType::Float32 | UniformType::Int32 | UniformType::Uint32 => Some(4),
            UniformType::Vec2 => Some(8),
            UniformType::Vec3 => Some(12),
            UniformType::Vec4 => Some(16),
            UniformType::Matrix4 => Some(64),
            UniformType::Sampler => Some(0),
            UniformType::Custom => None,
        }
    }

    /// Whether this uniform binds a texture rather than buffer bytes
    pub fn is_sampler(self) -> bool {
        self == UniformType::Sampler
    }
}

/// Binding frequency tier of a uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderScope {
    /// Set once per frame
    Global,
    /// Set once per drawable instance
    Instance,
    /// Set once per draw call (push-constant backed)
    Local,
}

impl ShaderScope {
    fn label(self) -> &'static str {
        match self {
            ShaderScope::Global => "global",
            ShaderScope::Instance => "instance",
            ShaderScope::Local => "local",
        }
    }
}

/// One declared vertex attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Attribute name, for diagnostics
    pub name: String,
    /// Value type, fixing size and format
    pub attribute_type: AttributeType,
}

/// One declared uniform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformConfig {
    /// Uniform name, resolved case-sensitively at set time
    pub name: String,
    /// Byte size; only consulted for [`UniformType::Custom`]
    #[serde(default)]
    pub size: u16,
    /// Value type
    pub uniform_type: UniformType,
    /// Binding scope
    pub scope: ShaderScope,
}

/// Declarative description of a shader program
///
/// Usually loaded from a `.ron` file through [`crate::config::Config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Shader name; also the stem used to locate SPIR-V stage artifacts
    pub name: String,
    /// Name of the render pass the pipeline is built against
    pub render_pass_name: String,
    /// Active pipeline stages
    #[serde(with = "stage_names")]
    pub stages: ShaderStages,
    /// Vertex attributes in buffer order
    pub attributes: Vec<AttributeConfig>,
    /// Uniform declarations across all scopes
    pub uniforms: Vec<UniformConfig>,
    /// Whether per-instance state (descriptor set 1) is used
    pub use_instances: bool,
    /// Whether per-draw push constants are used
    pub use_locals: bool,
}

impl ShaderConfig {
    /// Name of the builtin world render pass
    pub const BUILTIN_WORLD_PASS: &'static str = "Renderpass.Builtin.World";

    /// The builtin material shader: per-frame camera state, per-instance
    /// diffuse color and texture, per-draw model matrix.
    pub fn builtin_material() -> Self {
        let uniform = |name: &str, uniform_type, scope| UniformConfig {
            name: name.to_string(),
            size: 0,
            uniform_type,
            scope,
        };
        Self {
            name: "Shader.Builtin.Material".to_string(),
            render_pass_name: Self::BUILTIN_WORLD_PASS.to_string(),
            stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
            attributes: vec![
                AttributeConfig { name: "in_position".to_string(), attribute_type: AttributeType::Vec3 },
                AttributeConfig { name: "in_normal".to_string(), attribute_type: AttributeType::Vec3 },
                AttributeConfig { name: "in_tangent".to_string(), attribute_type: AttributeType::Vec4 },
                AttributeConfig { name: "in_color".to_string(), attribute_type: AttributeType::Vec4 },
                AttributeConfig { name: "in_texture_coord".to_string(), attribute_type: AttributeType::Vec2 },
            ],
            uniforms: vec![
                uniform("projection", UniformType::Matrix4, ShaderScope::Global),
                uniform("view", UniformType::Matrix4, ShaderScope::Global),
                uniform("ambient_color", UniformType::Vec4, ShaderScope::Global),
                uniform("view_position", UniformType::Vec3, ShaderScope::Global),
                uniform("mode", UniformType::Int32, ShaderScope::Global),
                uniform("diffuse_color", UniformType::Vec4, ShaderScope::Instance),
                uniform("diffuse_texture", UniformType::Sampler, ShaderScope::Instance),
                uniform("model", UniformType::Matrix4, ShaderScope::Local),
            ],
            use_instances: true,
            use_locals: true,
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::builtin_material()
    }
}

impl crate::config::Config for ShaderConfig {}

/// Shader declaration and usage errors
#[derive(thiserror::Error, Debug)]
pub enum ShaderError {
    /// Name did not resolve to a declared uniform
    #[error("Unknown uniform \"{name}\"")]
    UnknownUniform {
        /// The name that failed to resolve
        name: String,
    },

    /// Numeric uniform id outside the declared range
    #[error("Uniform id {id} is out of range")]
    UniformIdOutOfRange {
        /// The rejected id
        id: u16,
    },

    /// A sampler uniform was addressed through the data-uniform path
    #[error("Uniform \"{name}\" is a sampler")]
    ExpectedData {
        /// Name of the sampler uniform
        name: String,
    },

    /// A data uniform was addressed through the sampler path
    #[error("Uniform \"{name}\" is not a sampler")]
    ExpectedSampler {
        /// Name of the data uniform
        name: String,
    },

    /// Provided value bytes do not match the declared uniform size
    #[error("Value of {provided} bytes does not fit uniform \"{name}\" of {expected} bytes")]
    SizeMismatch {
        /// Name of the uniform
        name: String,
        /// Declared size
        expected: u16,
        /// Size of the rejected value
        provided: usize,
    },

    /// Required scope has not been bound
    #[error("The {scope} scope is not bound")]
    ScopeNotBound {
        /// Scope label
        scope: &'static str,
    },

    /// Instance id does not refer to a live instance
    #[error("Unknown shader instance id {id}")]
    UnknownInstance {
        /// The rejected id
        id: u32,
    },

    /// No free slot left in the instance pool
    #[error("Shader instance pool exhausted ({capacity} instances)")]
    InstancePoolExhausted {
        /// Configured pool capacity
        capacity: usize,
    },

    /// Declared local uniforms exceed the push constant block
    #[error("Local uniforms exceed the {capacity} byte push constant block")]
    PushConstantOverflow {
        /// Block capacity in bytes
        capacity: u64,
    },

    /// Shader configuration failed validation
    #[error("Invalid shader configuration: {0}")]
    InvalidConfig(String),
}

/// Resolved placement of one declared uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderUniform {
    /// Byte offset inside the scope's buffer region (0 for samplers)
    pub offset: u64,
    /// Size in bytes (0 for samplers)
    pub size: u16,
    /// Sampler slot within the scope for samplers, otherwise the uniform id
    pub location: u16,
    /// Uniform id: position in the declared uniform list
    pub index: u16,
    /// Descriptor set index (0 global, 1 instance); unused for local scope
    pub set_index: u8,
    /// Binding scope
    pub scope: ShaderScope,
    /// Value type
    pub uniform_type: UniformType,
}

/// Resolved vertex attribute with its offset in the vertex stride
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderAttribute {
    /// Attribute name
    pub name: String,
    /// Value type
    pub attribute_type: AttributeType,
    /// Size in bytes
    pub size: u32,
    /// Byte offset from the start of the vertex
    pub offset: u32,
}

/// Byte range of one local uniform inside the push constant block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Offset inside the block, 4-byte aligned
    pub offset: u64,
    /// Range size, padded to a multiple of 4
    pub size: u64,
}

/// Descriptor set index of the global scope
pub const DESC_SET_INDEX_GLOBAL: u8 = 0;
/// Descriptor set index of the instance scope
pub const DESC_SET_INDEX_INSTANCE: u8 = 1;

fn round_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Deterministic uniform and attribute layout for one shader declaration
///
/// Built once from a [`ShaderConfig`] and the device's minimum
/// uniform-buffer-offset alignment. The same inputs always produce the same
/// table.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformTable {
    uniforms: Vec<ShaderUniform>,
    lookup: HashMap<String, u16>,
    attributes: Vec<ShaderAttribute>,
    attribute_stride: u32,
    global_ubo_size: u64,
    global_ubo_stride: u64,
    instance_ubo_size: u64,
    instance_ubo_stride: u64,
    push_constant_size: u64,
    push_constant_ranges: Vec<PushConstantRange>,
    global_sampler_count: u8,
    instance_sampler_count: u8,
}

impl UniformTable {
    /// Resolve `config` against the device alignment
    pub fn from_config(config: &ShaderConfig, min_ubo_alignment: u64) -> Result<Self, ShaderError> {
        Self::validate(config)?;

        let mut attributes = Vec::with_capacity(config.attributes.len());
        let mut attribute_stride = 0u32;
        for attribute in &config.attributes {
            let size = attribute.attribute_type.size();
            attributes.push(ShaderAttribute {
                name: attribute.name.clone(),
                attribute_type: attribute.attribute_type,
                size,
                offset: attribute_stride,
            });
            attribute_stride += size;
        }

        let mut table = Self {
            uniforms: Vec::with_capacity(config.uniforms.len()),
            lookup: HashMap::with_capacity(config.uniforms.len()),
            attributes,
            attribute_stride,
            global_ubo_size: 0,
            global_ubo_stride: 0,
            instance_ubo_size: 0,
            instance_ubo_stride: 0,
            push_constant_size: 0,
            push_constant_ranges: Vec::new(),
            global_sampler_count: 0,
            instance_sampler_count: 0,
        };

        for uniform in &config.uniforms {
            if uniform.uniform_type.is_sampler() {
                table.add_sampler(uniform);
            } else {
                table.add_uniform(uniform);
            }
        }

        table.global_ubo_stride = round_up(table.global_ubo_size, min_ubo_alignment);
        table.instance_ubo_stride = round_up(table.instance_ubo_size, min_ubo_alignment);

        if table.push_constant_size > PUSH_CONSTANT_STRIDE {
            return Err(ShaderError::PushConstantOverflow { capacity: PUSH_CONSTANT_STRIDE });
        }

        Ok(table)
    }

    fn validate(config: &ShaderConfig) -> Result<(), ShaderError> {
        if config.stages.is_empty() {
            return Err(ShaderError::InvalidConfig("no shader stages declared".to_string()));
        }
        let all_names = config
            .uniforms
            .iter()
            .map(|u| u.name.as_str())
            .chain(config.attributes.iter().map(|a| a.name.as_str()))
            .chain(std::iter::once(config.name.as_str()));
        for name in all_names {
            if name.is_empty() || name.len() > MAX_NAME_LENGTH {
                return Err(ShaderError::InvalidConfig(format!(
                    "name \"{name}\" is empty or longer than {MAX_NAME_LENGTH} characters"
                )));
            }
        }
        let mut seen = HashMap::new();
        for uniform in &config.uniforms {
            if seen.insert(uniform.name.as_str(), ()).is_some() {
                return Err(ShaderError::InvalidConfig(format!(
                    "duplicate uniform \"{}\"",
                    uniform.name
                )));
            }
            if uniform.uniform_type == UniformType::Custom && uniform.size == 0 {
                return Err(ShaderError::InvalidConfig(format!(
                    "custom uniform \"{}\" declares no size",
                    uniform.name
                )));
            }
            if uniform.uniform_type.is_sampler() && uniform.scope == ShaderScope::Local {
                return Err(ShaderError::InvalidConfig(format!(
                    "sampler \"{}\" cannot use local scope",
                    uniform.name
                )));
            }
            if uniform.scope == ShaderScope::Instance && !config.use_instances {
                return Err(ShaderError::InvalidConfig(format!(
                    "instance uniform \"{}\" declared but use_instances is false",
                    uniform.name
                )));
            }
            if uniform.scope == ShaderScope::Local && !config.use_locals {
                return Err(ShaderError::InvalidConfig(format!(
                    "local uniform \"{}\" declared but use_locals is false",
                    uniform.name
                )));
            }
        }
        Ok(())
    }

    fn add_sampler(&mut self, config: &UniformConfig) {
        let index = self.uniforms.len() as u16;
        let (set_index, location) = match config.scope {
            ShaderScope::Global => {
                let slot = self.global_sampler_count;
                self.global_sampler_count += 1;
                (DESC_SET_INDEX_GLOBAL, u16::from(slot))
            }
            ShaderScope::Instance => {
                let slot = self.instance_sampler_count;
                self.instance_sampler_count += 1;
                (DESC_SET_INDEX_INSTANCE, u16::from(slot))
            }
            // Rejected by validate.
            ShaderScope::Local => unreachable!("local samplers fail validation"),
        };
        self.push_entry(config, ShaderUniform {
            offset: 0,
            size: 0,
            location,
            index,
            set_index,
            scope: config.scope,
            uniform_type: config.uniform_type,
        });
    }

    fn add_uniform(&mut self, config: &UniformConfig) {
        let index = self.uniforms.len() as u16;
        let size = config.uniform_type.size().unwrap_or(config.size);

        let entry = match config.scope {
            ShaderScope::Global => {
                let offset = self.global_ubo_size;
                self.global_ubo_size += u64::from(size);
                ShaderUniform {
                    offset,
                    size,
                    location: index,
                    index,
                    set_index: DESC_SET_INDEX_GLOBAL,
                    scope: config.scope,
                    uniform_type: config.uniform_type,
                }
            }
            ShaderScope::Instance => {
                let offset = self.instance_ubo_size;
                self.instance_ubo_size += u64::from(size);
                ShaderUniform {
                    offset,
                    size,
                    location: index,
                    index,
                    set_index: DESC_SET_INDEX_INSTANCE,
                    scope: config.scope,
                    uniform_type: config.uniform_type,
                }
            }
            ShaderScope::Local => {
                let offset = self.push_constant_size;
                let padded = round_up(u64::from(size), 4);
                self.push_constant_size += padded;
                self.push_constant_ranges.push(PushConstantRange { offset, size: padded });
                ShaderUniform {
                    offset,
                    size,
                    location: index,
                    index,
                    set_index: 0,
                    scope: config.scope,
                    uniform_type: config.uniform_type,
                }
            }
        };
        self.push_entry(config, entry);
    }

    fn push_entry(&mut self, config: &UniformConfig, entry: ShaderUniform) {
        self.lookup.insert(config.name.clone(), entry.index);
        self.uniforms.push(entry);
    }

    /// Resolve a uniform name to its id; exact, case-sensitive match
    pub fn uniform_index(&self, name: &str) -> Result<u16, ShaderError> {
        self.lookup
            .get(name)
            .copied()
            .ok_or_else(|| ShaderError::UnknownUniform { name: name.to_string() })
    }

    /// Look up a uniform by id
    pub fn uniform(&self, id: u16) -> Result<&ShaderUniform, ShaderError> {
        self.uniforms
            .get(usize::from(id))
            .ok_or(ShaderError::UniformIdOutOfRange { id })
    }

    /// All resolved uniforms in declaration order
    pub fn uniforms(&self) -> &[ShaderUniform] {
        &self.uniforms
    }

    /// Resolved vertex attributes in declaration order
    pub fn attributes(&self) -> &[ShaderAttribute] {
        &self.attributes
    }

    /// Bytes per vertex
    pub fn attribute_stride(&self) -> u32 {
        self.attribute_stride
    }

    /// Bytes of global uniform data
    pub fn global_ubo_size(&self) -> u64 {
        self.global_ubo_size
    }

    /// Global region stride, aligned to the device minimum
    pub fn global_ubo_stride(&self) -> u64 {
        self.global_ubo_stride
    }

    /// Bytes of per-instance uniform data
    pub fn instance_ubo_size(&self) -> u64 {
        self.instance_ubo_size
    }

    /// Per-instance stride, aligned to the device minimum
    pub fn instance_ubo_stride(&self) -> u64 {
        self.instance_ubo_stride
    }

    /// Total bytes of local (push constant) uniforms, range-padded
    pub fn push_constant_size(&self) -> u64 {
        self.push_constant_size
    }

    /// Push constant ranges in declaration order
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Number of global-scope samplers
    pub fn global_sampler_count(&self) -> u8 {
        self.global_sampler_count
    }

    /// Number of instance-scope samplers
    pub fn instance_sampler_count(&self) -> u8 {
        self.instance_sampler_count
    }

    /// Size of the uniform buffer backing every scope of one shader:
    /// the global region followed by `MAX_INSTANCE_COUNT` instance regions.
    pub fn buffer_size(&self) -> u64 {
        self.global_ubo_stride + self.instance_ubo_stride * MAX_INSTANCE_COUNT as u64
    }

    /// Byte offset of an instance slot's region inside the uniform buffer
    pub fn instance_region_offset(&self, slot: usize) -> u64 {
        self.global_ubo_stride + self.instance_ubo_stride * slot as u64
    }
}

/// Per-instance record tracked by [`ShaderState`]
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// Byte offset of the instance's region in the shader uniform buffer
    pub ubo_offset: u64,
    /// Staged uniform bytes for this instance
    staging: Vec<u8>,
    /// Bound textures, one slot per instance sampler
    textures: Vec<Option<TextureHandle>>,
    /// Bumped on every change that requires a descriptor refresh
    generation: u64,
}

/// Staged uniform values and draw-time binding state for one shader
///
/// Follows the strict per-frame order: bind globals, stage global values,
/// apply; then per instance bind, stage, apply. The concrete pipeline
/// flushes the staged bytes on apply.
pub struct ShaderState {
    table: UniformTable,
    use_locals: bool,
    bound_scope: ShaderScope,
    bound_instance: Option<u32>,
    globals_bound: bool,
    global_staging: Vec<u8>,
    global_textures: Vec<Option<TextureHandle>>,
    global_generation: u64,
    local_staging: Vec<u8>,
    instances: SlotPool<InstanceRecord>,
}

impl ShaderState {
    /// Build the runtime state for `config` resolved at `min_ubo_alignment`
    pub fn new(config: &ShaderConfig, min_ubo_alignment: u64) -> Result<Self, ShaderError> {
        let table = UniformTable::from_config(config, min_ubo_alignment)?;
        let global_staging = vec![0u8; table.global_ubo_size() as usize];
        let global_textures = vec![None; usize::from(table.global_sampler_count())];
        let local_staging = if config.use_locals {
            vec![0u8; PUSH_CONSTANT_STRIDE as usize]
        } else {
            Vec::new()
        };
        let capacity = if config.use_instances { MAX_INSTANCE_COUNT } else { 0 };

        Ok(Self {
            table,
            use_locals: config.use_locals,
            bound_scope: ShaderScope::Global,
            bound_instance: None,
            globals_bound: false,
            global_staging,
            global_textures,
            global_generation: 0,
            local_staging,
            instances: SlotPool::with_capacity(capacity),
        })
    }

    /// The resolved layout this state was built from
    pub fn table(&self) -> &UniformTable {
        &self.table
    }

    /// Bind the global scope; required before setting global uniforms
    pub fn bind_globals(&mut self) {
        self.bound_scope = ShaderScope::Global;
        self.bound_instance = None;
        self.globals_bound = true;
    }

    /// Bind a live instance; required before setting instance uniforms
    pub fn bind_instance(&mut self, id: u32) -> Result<(), ShaderError> {
        if self.instances.get(id as usize).is_none() {
            return Err(ShaderError::UnknownInstance { id });
        }
        self.bound_scope = ShaderScope::Instance;
        self.bound_instance = Some(id);
        Ok(())
    }

    /// Currently bound scope
    pub fn bound_scope(&self) -> ShaderScope {
        self.bound_scope
    }

    /// Currently bound instance id, if any
    pub fn bound_instance(&self) -> Option<u32> {
        self.bound_instance
    }

    /// Check that globals were bound this frame; used by apply paths
    pub fn ensure_globals_bound(&self) -> Result<(), ShaderError> {
        if self.globals_bound {
            Ok(())
        } else {
            Err(ShaderError::ScopeNotBound { scope: ShaderScope::Global.label() })
        }
    }

    /// Check that an instance is bound; returns its id for apply paths
    pub fn ensure_instance_bound(&self) -> Result<u32, ShaderError> {
        match (self.bound_scope, self.bound_instance) {
            (ShaderScope::Instance, Some(id)) => Ok(id),
            _ => Err(ShaderError::ScopeNotBound { scope: ShaderScope::Instance.label() }),
        }
    }

    /// Allocate an instance slot; fails when the pool is at capacity
    pub fn acquire_instance(&mut self) -> Result<u32, ShaderError> {
        let capacity = self.instances.capacity();
        let instance_size = self.table.instance_ubo_size() as usize;
        let sampler_count = usize::from(self.table.instance_sampler_count());
        let table = &self.table;
        let slot = self
            .instances
            .acquire_with(|slot| InstanceRecord {
                ubo_offset: table.instance_region_offset(slot),
                staging: vec![0u8; instance_size],
                textures: vec![None; sampler_count],
                generation: 0,
            })
            .ok_or(ShaderError::InstancePoolExhausted { capacity })?;
        Ok(slot as u32)
    }

    /// Release an instance slot for reuse
    pub fn release_instance(&mut self, id: u32) -> Result<(), ShaderError> {
        if self.bound_instance == Some(id) {
            self.bound_instance = None;
            self.bound_scope = ShaderScope::Global;
        }
        self.instances
            .release(id as usize)
            .map(|_| ())
            .ok_or(ShaderError::UnknownInstance { id })
    }

    /// Number of live instances
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Stage a uniform value by name
    pub fn set_uniform(&mut self, name: &str, value: &[u8]) -> Result<(), ShaderError> {
        let id = self.table.uniform_index(name)?;
        self.set_uniform_by_index(id, value)
    }

    /// Stage a uniform value by id
    pub fn set_uniform_by_index(&mut self, id: u16, value: &[u8]) -> Result<(), ShaderError> {
        let uniform = *self.table.uniform(id)?;
        if uniform.uniform_type.is_sampler() {
            return Err(ShaderError::ExpectedData { name: self.uniform_name(id) });
        }
        if value.len() != usize::from(uniform.size) {
            return Err(ShaderError::SizeMismatch {
                name: self.uniform_name(id),
                expected: uniform.size,
                provided: value.len(),
            });
        }

        let start = uniform.offset as usize;
        let end = start + usize::from(uniform.size);
        match uniform.scope {
            ShaderScope::Global => {
                self.global_staging[start..end].copy_from_slice(value);
            }
            ShaderScope::Instance => {
                let id = self.ensure_instance_bound()?;
                let record = self
                    .instances
                    .get_mut(id as usize)
                    .ok_or(ShaderError::UnknownInstance { id })?;
                record.staging[start..end].copy_from_slice(value);
            }
            ShaderScope::Local => {
                self.local_staging[start..end].copy_from_slice(value);
            }
        }
        Ok(())
    }

    /// Bind a texture to a sampler uniform by name
    pub fn set_sampler(&mut self, name: &str, texture: TextureHandle) -> Result<(), ShaderError> {
        let id = self.table.uniform_index(name)?;
        self.set_sampler_by_index(id, texture)
    }

    /// Bind a texture to a sampler uniform by id
    pub fn set_sampler_by_index(&mut self, id: u16, texture: TextureHandle) -> Result<(), ShaderError> {
        let uniform = *self.table.uniform(id)?;
        if !uniform.uniform_type.is_sampler() {
            return Err(ShaderError::ExpectedSampler { name: self.uniform_name(id) });
        }

        let slot = usize::from(uniform.location);
        match uniform.scope {
            ShaderScope::Global => {
                self.global_textures[slot] = Some(texture);
                self.global_generation += 1;
            }
            ShaderScope::Instance => {
                let id = self.ensure_instance_bound()?;
                let record = self
                    .instances
                    .get_mut(id as usize)
                    .ok_or(ShaderError::UnknownInstance { id })?;
                record.textures[slot] = Some(texture);
                record.generation += 1;
            }
            // Rejected at table construction.
            ShaderScope::Local => unreachable!("local samplers fail validation"),
        }
        Ok(())
    }

    fn uniform_name(&self, id: u16) -> String {
        self.table
            .lookup
            .iter()
            .find(|(_, index)| **index == id)
            .map_or_else(|| format!("#{id}"), |(name, _)| name.clone())
    }

    /// Staged global uniform bytes, flushed by `apply_global`
    pub fn global_bytes(&self) -> &[u8] {
        &self.global_staging
    }

    /// Staged bytes for one instance, flushed by `apply_instance`
    pub fn instance_bytes(&self, id: u32) -> Result<&[u8], ShaderError> {
        self.instances
            .get(id as usize)
            .map(|record| record.staging.as_slice())
            .ok_or(ShaderError::UnknownInstance { id })
    }

    /// Uniform buffer offset of one instance's region
    pub fn instance_ubo_offset(&self, id: u32) -> Result<u64, ShaderError> {
        self.instances
            .get(id as usize)
            .map(|record| record.ubo_offset)
            .ok_or(ShaderError::UnknownInstance { id })
    }

    /// Textures bound in the global scope, one entry per sampler slot
    pub fn global_textures(&self) -> &[Option<TextureHandle>] {
        &self.global_textures
    }

    /// Textures bound for one instance, one entry per sampler slot
    pub fn instance_textures(&self, id: u32) -> Result<&[Option<TextureHandle>], ShaderError> {
        self.instances
            .get(id as usize)
            .map(|record| record.textures.as_slice())
            .ok_or(ShaderError::UnknownInstance { id })
    }

    /// Generation counter of the global texture bindings
    pub fn global_generation(&self) -> u64 {
        self.global_generation
    }

    /// Generation counter of one instance's bindings
    pub fn instance_generation(&self, id: u32) -> Result<u64, ShaderError> {
        self.instances
            .get(id as usize)
            .map(|record| record.generation)
            .ok_or(ShaderError::UnknownInstance { id })
    }

    /// Staged push constant bytes, flushed per draw by `apply_local`
    pub fn local_bytes(&self) -> &[u8] {
        &self.local_staging
    }

    /// Whether local (push constant) uniforms are in use
    pub fn use_locals(&self) -> bool {
        self.use_locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn table(config: &ShaderConfig, alignment: u64) -> UniformTable {
        UniformTable::from_config(config, alignment).unwrap()
    }

    #[test]
    fn test_builtin_material_layout() {
        let t = table(&ShaderConfig::builtin_material(), 256);

        // Global scope: projection(64) view(64) ambient(16) view_pos(12) mode(4).
        assert_eq!(t.global_ubo_size(), 160);
        assert_eq!(t.global_ubo_stride(), 256);
        let projection = t.uniform(t.uniform_index("projection").unwrap()).unwrap();
        let view = t.uniform(t.uniform_index("view").unwrap()).unwrap();
        let mode = t.uniform(t.uniform_index("mode").unwrap()).unwrap();
        assert_eq!(projection.offset, 0);
        assert_eq!(view.offset, 64);
        assert_eq!(mode.offset, 156);

        // Instance scope: diffuse_color(16) + one sampler.
        assert_eq!(t.instance_ubo_size(), 16);
        assert_eq!(t.instance_sampler_count(), 1);

        // Local scope: one 64-byte matrix.
        assert_eq!(t.push_constant_size(), 64);
        assert_eq!(t.push_constant_ranges().len(), 1);

        // Vertex: vec3 + vec3 + vec4 + vec4 + vec2.
        assert_eq!(t.attribute_stride(), 64);
    }

    #[test]
    fn test_stride_is_multiple_of_alignment_and_offsets_never_overlap() {
        for alignment in [16u64, 64, 256] {
            let t = table(&ShaderConfig::builtin_material(), alignment);
            assert_eq!(t.global_ubo_stride() % alignment, 0);
            assert_eq!(t.instance_ubo_stride() % alignment, 0);

            for scope in [ShaderScope::Global, ShaderScope::Instance] {
                let mut ranges: Vec<(u64, u64)> = t
                    .uniforms()
                    .iter()
                    .filter(|u| u.scope == scope && !u.uniform_type.is_sampler())
                    .map(|u| (u.offset, u.offset + u64::from(u.size)))
                    .collect();
                ranges.sort_unstable();
                for pair in ranges.windows(2) {
                    assert!(pair[0].1 <= pair[1].0, "overlap in {scope:?} scope");
                }
            }
        }
    }

    #[test]
    fn test_layout_is_deterministic() {
        let config = ShaderConfig::builtin_material();
        let a = table(&config, 64);
        let b = table(&config, 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_uniform_lookup_is_exact_and_case_sensitive() {
        let t = table(&ShaderConfig::builtin_material(), 64);
        assert!(t.uniform_index("view").is_ok());
        assert!(matches!(
            t.uniform_index("View"),
            Err(ShaderError::UnknownUniform { .. })
        ));
        assert!(matches!(
            t.uniform_index("vie"),
            Err(ShaderError::UnknownUniform { .. })
        ));
    }

    #[test]
    fn test_custom_uniform_requires_size() {
        let mut config = ShaderConfig::builtin_material();
        config.uniforms.push(UniformConfig {
            name: "material_block".to_string(),
            size: 0,
            uniform_type: UniformType::Custom,
            scope: ShaderScope::Global,
        });
        assert!(matches!(
            UniformTable::from_config(&config, 64),
            Err(ShaderError::InvalidConfig(_))
        ));

        config.uniforms.last_mut().unwrap().size = 48;
        let t = table(&config, 64);
        let id = t.uniform_index("material_block").unwrap();
        assert_eq!(t.uniform(id).unwrap().size, 48);
    }

    #[test]
    fn test_push_constant_overflow_is_rejected() {
        let mut config = ShaderConfig::builtin_material();
        config.uniforms.push(UniformConfig {
            name: "model_extra".to_string(),
            size: 0,
            uniform_type: UniformType::Matrix4,
            scope: ShaderScope::Local,
        });
        // Two 64-byte matrices fit exactly; a third overflows the block.
        assert!(UniformTable::from_config(&config, 64).is_ok());

        config.uniforms.push(UniformConfig {
            name: "model_overflow".to_string(),
            size: 0,
            uniform_type: UniformType::Matrix4,
            scope: ShaderScope::Local,
        });
        assert!(matches!(
            UniformTable::from_config(&config, 64),
            Err(ShaderError::PushConstantOverflow { .. })
        ));
    }

    #[test]
    fn test_duplicate_uniform_names_are_rejected() {
        let mut config = ShaderConfig::builtin_material();
        config.uniforms.push(UniformConfig {
            name: "view".to_string(),
            size: 0,
            uniform_type: UniformType::Vec4,
            scope: ShaderScope::Global,
        });
        assert!(matches!(
            UniformTable::from_config(&config, 64),
            Err(ShaderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_set_unknown_uniform_leaves_staged_bytes_unmodified() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        state.bind_globals();
        let mode = 2i32.to_ne_bytes();
        state.set_uniform("mode", &mode).unwrap();
        let before = state.global_bytes().to_vec();

        let result = state.set_uniform("nonexistent_name", &[1, 2, 3, 4]);
        assert!(matches!(result, Err(ShaderError::UnknownUniform { .. })));
        assert_eq!(state.global_bytes(), before.as_slice());
    }

    #[test]
    fn test_set_uniform_size_mismatch_is_rejected() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        state.bind_globals();
        let result = state.set_uniform("mode", &[0u8; 8]);
        assert!(matches!(result, Err(ShaderError::SizeMismatch { .. })));
    }

    #[test]
    fn test_sampler_and_data_paths_do_not_cross() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        let id = state.acquire_instance().unwrap();
        state.bind_instance(id).unwrap();

        let result = state.set_uniform("diffuse_texture", &[0u8; 4]);
        assert!(matches!(result, Err(ShaderError::ExpectedData { .. })));

        let handle = TextureHandle::default();
        let result = state.set_sampler("diffuse_color", handle);
        assert!(matches!(result, Err(ShaderError::ExpectedSampler { .. })));
    }

    #[test]
    fn test_instance_uniform_requires_bound_instance() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        let color = [0u8; 16];
        let result = state.set_uniform("diffuse_color", &color);
        assert!(matches!(result, Err(ShaderError::ScopeNotBound { .. })));
    }

    #[test]
    fn test_instance_staging_is_isolated_per_instance() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        let a = state.acquire_instance().unwrap();
        let b = state.acquire_instance().unwrap();

        state.bind_instance(a).unwrap();
        state.set_uniform("diffuse_color", &[0xAA; 16]).unwrap();

        state.bind_instance(b).unwrap();
        assert_eq!(state.instance_bytes(b).unwrap(), &[0u8; 16]);
        assert_eq!(state.instance_bytes(a).unwrap(), &[0xAA; 16]);
    }

    #[test]
    fn test_instance_acquire_release_cycles_do_not_leak() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();

        // Far more cycles than capacity, but never more than capacity live.
        for _ in 0..MAX_INSTANCE_COUNT * 2 {
            let id = state.acquire_instance().unwrap();
            state.release_instance(id).unwrap();
        }
        assert_eq!(state.instance_count(), 0);

        let mut live = Vec::new();
        for _ in 0..MAX_INSTANCE_COUNT {
            live.push(state.acquire_instance().unwrap());
        }
        assert!(matches!(
            state.acquire_instance(),
            Err(ShaderError::InstancePoolExhausted { .. })
        ));
        for id in live {
            state.release_instance(id).unwrap();
        }
    }

    #[test]
    fn test_released_instance_id_is_invalid_until_reacquired() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        let id = state.acquire_instance().unwrap();
        state.release_instance(id).unwrap();

        assert!(matches!(
            state.bind_instance(id),
            Err(ShaderError::UnknownInstance { .. })
        ));
        assert!(matches!(
            state.release_instance(id),
            Err(ShaderError::UnknownInstance { .. })
        ));

        let reacquired = state.acquire_instance().unwrap();
        assert_eq!(reacquired, id);
        assert!(state.bind_instance(reacquired).is_ok());
    }

    #[test]
    fn test_reacquired_slot_starts_with_a_clean_record() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        let id = state.acquire_instance().unwrap();
        state.bind_instance(id).unwrap();
        state.set_uniform("diffuse_color", &[0xAA; 16]).unwrap();
        state.set_sampler("diffuse_texture", TextureHandle::default()).unwrap();
        assert_eq!(state.instance_generation(id).unwrap(), 1);
        state.release_instance(id).unwrap();

        // The recycled slot must not inherit the previous tenant's staging,
        // textures, or generation.
        let reused = state.acquire_instance().unwrap();
        assert_eq!(reused, id);
        assert_eq!(state.instance_generation(reused).unwrap(), 0);
        assert_eq!(state.instance_bytes(reused).unwrap(), &[0u8; 16]);
        assert!(state.instance_textures(reused).unwrap().iter().all(Option::is_none));
    }

    #[test]
    fn test_instance_offsets_follow_the_global_region() {
        let state = ShaderState::new(&ShaderConfig::builtin_material(), 256).unwrap();
        let t = state.table();
        assert_eq!(t.instance_region_offset(0), t.global_ubo_stride());
        assert_eq!(
            t.instance_region_offset(5),
            t.global_ubo_stride() + 5 * t.instance_ubo_stride()
        );
        assert_eq!(
            t.buffer_size(),
            t.global_ubo_stride() + MAX_INSTANCE_COUNT as u64 * t.instance_ubo_stride()
        );
    }

    #[test]
    fn test_sampler_generation_tracks_rebinds() {
        let mut state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        let id = state.acquire_instance().unwrap();
        state.bind_instance(id).unwrap();
        assert_eq!(state.instance_generation(id).unwrap(), 0);

        state.set_sampler("diffuse_texture", TextureHandle::default()).unwrap();
        assert_eq!(state.instance_generation(id).unwrap(), 1);
    }

    #[test]
    fn test_apply_without_bind_is_a_contract_violation() {
        let state = ShaderState::new(&ShaderConfig::builtin_material(), 64).unwrap();
        assert!(matches!(
            state.ensure_globals_bound(),
            Err(ShaderError::ScopeNotBound { scope: "global" })
        ));
        assert!(matches!(
            state.ensure_instance_bound(),
            Err(ShaderError::ScopeNotBound { scope: "instance" })
        ));
    }

    #[test]
    fn test_config_round_trips_through_ron() {
        let config = ShaderConfig::builtin_material();
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default()).unwrap();
        let parsed: ShaderConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_loads_from_file() {
        let config = ShaderConfig::builtin_material();
        let path = std::env::temp_dir().join("prism_shader_test.ron");
        let path = path.to_str().unwrap();
        config.save_to_file(path).unwrap();
        let loaded = ShaderConfig::load_from_file(path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unknown_stage_name_fails_deserialization() {
        let text = r#"(
            name: "s",
            render_pass_name: "Renderpass.Builtin.World",
            stages: ["vertex", "tessellation"],
            attributes: [],
            uniforms: [],
            use_instances: false,
            use_locals: false,
        )"#;
        assert!(ron::from_str::<ShaderConfig>(text).is_err());
    }
}
