//! Config-driven shader backend
//!
//! Builds one graphics pipeline per shader config: SPIR-V modules per
//! declared stage, descriptor set layouts derived from the uniform table,
//! and a single host-visible uniform buffer holding the global region
//! followed by every instance region. Draw-time state flows through the
//! frontend `ShaderState`; this type turns its staged bytes and texture
//! slots into buffer writes and descriptor updates.

use std::collections::HashMap;

use ash::{vk, Device, Instance};
use slotmap::SlotMap;

use crate::render::vulkan::buffer::Buffer;
use crate::render::vulkan::descriptor::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
};
use crate::render::vulkan::pipeline::{GraphicsPipeline, PipelineCreateInfo, ShaderModule};
use crate::render::vulkan::texture::VulkanTexture;
use crate::render::vulkan::{
    CommandRecorder, LogicalDevice, PhysicalDeviceInfo, RenderPass, VulkanError, VulkanResult,
};
use crate::resources::shader::{
    DESC_SET_INDEX_GLOBAL, DESC_SET_INDEX_INSTANCE, MAX_INSTANCE_COUNT, PUSH_CONSTANT_STRIDE,
};
use crate::resources::{
    AttributeType, ShaderConfig, ShaderError, ShaderState, ShaderStages, TextureHandle,
};

const SHADER_ASSET_PATH: &str = "assets/shaders";

/// Per-instance descriptor sets, one per frame in flight
///
/// Entries outlive their slot's release so a reacquire recycles the sets.
struct InstanceBinding {
    sets: Vec<vk::DescriptorSet>,
    applied: Vec<Option<u64>>,
}

/// GPU-side shader built from a `ShaderConfig`
pub struct VulkanShader {
    name: String,
    state: ShaderState,
    // Field order keeps the pipeline alive until after nothing records with it.
    pipeline: GraphicsPipeline,
    _modules: Vec<ShaderModule>,
    _global_layout: DescriptorSetLayout,
    instance_layout: Option<DescriptorSetLayout>,
    descriptor_pool: DescriptorPool,
    uniform_buffer: Buffer,
    global_sets: Vec<vk::DescriptorSet>,
    global_applied: Vec<Option<u64>>,
    instance_bindings: HashMap<u32, InstanceBinding>,
    frames_in_flight: usize,
    device: Device,
}

impl VulkanShader {
    /// Create the pipeline, layouts, and uniform storage for a shader config
    pub fn new(
        device: &LogicalDevice,
        instance: &Instance,
        physical: &PhysicalDeviceInfo,
        render_pass: &RenderPass,
        config: &ShaderConfig,
        frames_in_flight: usize,
    ) -> VulkanResult<Self> {
        if config.stages.contains(ShaderStages::COMPUTE) {
            return Err(ShaderError::InvalidConfig(format!(
                "Shader '{}' requests a compute stage, which the graphics pipeline cannot host",
                config.name
            ))
            .into());
        }

        let state = ShaderState::new(config, physical.min_ubo_alignment())?;
        let table = state.table();

        let mut modules = Vec::new();
        let mut stage_infos = Vec::new();
        for (stage, extension) in [
            (ShaderStages::VERTEX, "vert"),
            (ShaderStages::GEOMETRY, "geom"),
            (ShaderStages::FRAGMENT, "frag"),
        ] {
            if !config.stages.contains(stage) {
                continue;
            }
            let path = format!("{}/{}.{}.spv", SHADER_ASSET_PATH, config.name, extension);
            let module = ShaderModule::from_file(device.device.clone(), &path)?;
            stage_infos.push(module.stage_info(stage_flags(stage)));
            modules.push(module);
        }

        let binding_descriptions = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: table.attribute_stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }];

        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = table
            .attributes()
            .iter()
            .enumerate()
            .map(|(location, attribute)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format: attribute_format(attribute.attribute_type),
                offset: attribute.offset,
            })
            .collect();

        let uniform_stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

        let mut global_builder =
            DescriptorSetLayoutBuilder::new().add_uniform_buffer(0, uniform_stages);
        if table.global_sampler_count() > 0 {
            global_builder = global_builder.add_combined_image_samplers(
                1,
                u32::from(table.global_sampler_count()),
                vk::ShaderStageFlags::FRAGMENT,
            );
        }
        let global_layout = global_builder.build(&device.device)?;

        let instance_layout = if config.use_instances {
            let mut builder = DescriptorSetLayoutBuilder::new().add_uniform_buffer(0, uniform_stages);
            if table.instance_sampler_count() > 0 {
                builder = builder.add_combined_image_samplers(
                    1,
                    u32::from(table.instance_sampler_count()),
                    vk::ShaderStageFlags::FRAGMENT,
                );
            }
            Some(builder.build(&device.device)?)
        } else {
            None
        };

        let push_constant_ranges = if state.use_locals() {
            vec![vk::PushConstantRange {
                stage_flags: uniform_stages,
                offset: 0,
                size: PUSH_CONSTANT_STRIDE as u32,
            }]
        } else {
            Vec::new()
        };

        let mut set_layouts = vec![global_layout.handle()];
        if let Some(layout) = &instance_layout {
            set_layouts.push(layout.handle());
        }

        let pipeline = GraphicsPipeline::new(
            device.device.clone(),
            &PipelineCreateInfo {
                render_pass: render_pass.handle(),
                stages: &stage_infos,
                binding_descriptions: &binding_descriptions,
                attribute_descriptions: &attribute_descriptions,
                descriptor_set_layouts: &set_layouts,
                push_constant_ranges: &push_constant_ranges,
                wireframe: false,
            },
        )?;

        let instance_set_count = if config.use_instances { MAX_INSTANCE_COUNT } else { 0 };
        let max_sets = ((1 + instance_set_count) * frames_in_flight) as u32;
        let descriptor_pool = DescriptorPool::new(device.device.clone(), max_sets)?;

        let uniform_buffer = Buffer::new(
            device.device.clone(),
            instance,
            physical.device,
            table.buffer_size().max(1),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let global_set_layouts = vec![global_layout.handle(); frames_in_flight];
        let global_sets = descriptor_pool.allocate_descriptor_sets(&global_set_layouts)?;

        // Descriptor buffer ranges must be non-zero even for sampler-only scopes.
        let global_range = table.global_ubo_stride().max(4);
        for &set in &global_sets {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: uniform_buffer.handle(),
                offset: 0,
                range: global_range,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            unsafe {
                device.device.update_descriptor_sets(&[write], &[]);
            }
        }

        log::info!(
            "Created shader '{}': {} stages, {} bytes of uniform storage",
            config.name,
            stage_infos.len(),
            table.buffer_size()
        );

        Ok(Self {
            name: config.name.clone(),
            state,
            pipeline,
            _modules: modules,
            _global_layout: global_layout,
            instance_layout,
            descriptor_pool,
            uniform_buffer,
            global_sets,
            global_applied: vec![None; frames_in_flight],
            instance_bindings: HashMap::new(),
            frames_in_flight,
            device: device.device.clone(),
        })
    }

    /// Shader name from the config
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes of device memory held by the uniform buffer
    pub fn uniform_buffer_size(&self) -> u64 {
        self.uniform_buffer.size()
    }

    /// Whether the shader declares local (push constant) uniforms
    pub fn use_locals(&self) -> bool {
        self.state.use_locals()
    }

    /// Bind the pipeline for subsequent draws
    pub fn bind_pipeline(&self, recorder: &mut CommandRecorder) {
        recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
    }

    /// Route uniform writes to the global scope
    pub fn bind_globals(&mut self) {
        self.state.bind_globals();
    }

    /// Route uniform writes to one acquired instance
    pub fn bind_instance(&mut self, id: u32) -> VulkanResult<()> {
        self.state.bind_instance(id).map_err(Into::into)
    }

    /// Reserve an instance slot and its per-frame descriptor sets
    ///
    /// Reusing a released slot recycles its descriptor sets; the uniform
    /// buffer binding already points at the slot's region.
    pub fn acquire_instance(&mut self) -> VulkanResult<u32> {
        let layout = self.instance_layout.as_ref().ok_or_else(|| {
            VulkanError::InvalidOperation {
                reason: format!("Shader '{}' does not use instances", self.name),
            }
        })?;

        let id = self.state.acquire_instance()?;

        if let Some(binding) = self.instance_bindings.get_mut(&id) {
            // Recycled slot: generations restart at zero, so clear the
            // applied marks to force a sampler rewrite on next apply.
            for applied in &mut binding.applied {
                *applied = None;
            }
            return Ok(id);
        }

        let layouts = vec![layout.handle(); self.frames_in_flight];
        let sets = match self.descriptor_pool.allocate_descriptor_sets(&layouts) {
            Ok(sets) => sets,
            Err(err) => {
                let _ = self.state.release_instance(id);
                return Err(err);
            }
        };

        let range = self.state.table().instance_ubo_stride().max(4);
        let offset = self.state.instance_ubo_offset(id)?;
        for &set in &sets {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: self.uniform_buffer.handle(),
                offset,
                range,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            unsafe {
                self.device.update_descriptor_sets(&[write], &[]);
            }
        }

        self.instance_bindings.insert(
            id,
            InstanceBinding { sets, applied: vec![None; self.frames_in_flight] },
        );
        Ok(id)
    }

    /// Release an instance slot for reuse
    ///
    /// The slot's descriptor sets are kept for the next acquire; frames in
    /// flight may still reference them, so nothing is freed or rewritten.
    pub fn release_instance(&mut self, id: u32) -> VulkanResult<()> {
        self.state.release_instance(id).map_err(Into::into)
    }

    /// Stage a data uniform by name
    pub fn set_uniform(&mut self, name: &str, value: &[u8]) -> VulkanResult<()> {
        self.state.set_uniform(name, value).map_err(Into::into)
    }

    /// Stage a data uniform by id
    pub fn set_uniform_by_index(&mut self, id: u16, value: &[u8]) -> VulkanResult<()> {
        self.state.set_uniform_by_index(id, value).map_err(Into::into)
    }

    /// Point a sampler slot at a texture
    pub fn set_sampler(&mut self, name: &str, texture: TextureHandle) -> VulkanResult<()> {
        self.state.set_sampler(name, texture).map_err(Into::into)
    }

    /// Look up a uniform id for the by-index setters
    pub fn uniform_index(&self, name: &str) -> VulkanResult<u16> {
        self.state.table().uniform_index(name).map_err(Into::into)
    }

    /// Flush global uniforms and bind descriptor set 0
    pub fn apply_global(
        &mut self,
        recorder: &mut CommandRecorder,
        frame: usize,
        textures: &SlotMap<TextureHandle, VulkanTexture>,
        fallback: &VulkanTexture,
    ) -> VulkanResult<()> {
        self.state.ensure_globals_bound()?;

        let global_bytes = self.state.global_bytes();
        if !global_bytes.is_empty() {
            self.uniform_buffer.write_bytes_at(0, global_bytes)?;
        }

        let set = self.global_sets[frame];
        let generation = self.state.global_generation();
        if self.state.table().global_sampler_count() > 0
            && self.global_applied[frame] != Some(generation)
        {
            let infos = image_infos(self.state.global_textures(), textures, fallback);
            write_samplers(&self.device, set, &infos);
            self.global_applied[frame] = Some(generation);
        }

        recorder.bind_descriptor_sets(
            self.pipeline.layout(),
            u32::from(DESC_SET_INDEX_GLOBAL),
            &[set],
        );
        Ok(())
    }

    /// Flush the bound instance's uniforms and bind descriptor set 1
    pub fn apply_instance(
        &mut self,
        recorder: &mut CommandRecorder,
        frame: usize,
        textures: &SlotMap<TextureHandle, VulkanTexture>,
        fallback: &VulkanTexture,
    ) -> VulkanResult<()> {
        let id = self.state.ensure_instance_bound()?;

        let offset = self.state.instance_ubo_offset(id)?;
        let instance_bytes = self.state.instance_bytes(id)?;
        if !instance_bytes.is_empty() {
            self.uniform_buffer.write_bytes_at(offset, instance_bytes)?;
        }

        let generation = self.state.instance_generation(id)?;
        let needs_sampler_write = self.state.table().instance_sampler_count() > 0;
        let binding = self.instance_bindings.get_mut(&id).ok_or(
            ShaderError::UnknownInstance { id },
        )?;
        let set = binding.sets[frame];

        if needs_sampler_write && binding.applied[frame] != Some(generation) {
            let infos = image_infos(self.state.instance_textures(id)?, textures, fallback);
            write_samplers(&self.device, set, &infos);
            binding.applied[frame] = Some(generation);
        }

        recorder.bind_descriptor_sets(
            self.pipeline.layout(),
            u32::from(DESC_SET_INDEX_INSTANCE),
            &[set],
        );
        Ok(())
    }

    /// Push the local uniform block as push constants
    pub fn apply_local(&mut self, recorder: &mut CommandRecorder) -> VulkanResult<()> {
        if !self.state.use_locals() {
            return Ok(());
        }
        let bytes = self.state.local_bytes();
        if bytes.is_empty() {
            return Ok(());
        }
        recorder.push_constants(
            self.pipeline.layout(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            0,
            bytes,
        );
        Ok(())
    }
}

fn stage_flags(stage: ShaderStages) -> vk::ShaderStageFlags {
    if stage == ShaderStages::VERTEX {
        vk::ShaderStageFlags::VERTEX
    } else if stage == ShaderStages::GEOMETRY {
        vk::ShaderStageFlags::GEOMETRY
    } else if stage == ShaderStages::FRAGMENT {
        vk::ShaderStageFlags::FRAGMENT
    } else {
        vk::ShaderStageFlags::empty()
    }
}

fn attribute_format(attribute_type: AttributeType) -> vk::Format {
    match attribute_type {
        AttributeType::Float32 => vk::Format::R32_SFLOAT,
        AttributeType::Vec2 => vk::Format::R32G32_SFLOAT,
        AttributeType::Vec3 => vk::Format::R32G32B32_SFLOAT,
        AttributeType::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        AttributeType::Int8 => vk::Format::R8_SINT,
        AttributeType::Int16 => vk::Format::R16_SINT,
        AttributeType::Int32 => vk::Format::R32_SINT,
        AttributeType::Uint8 => vk::Format::R8_UINT,
        AttributeType::Uint16 => vk::Format::R16_UINT,
        AttributeType::Uint32 => vk::Format::R32_UINT,
    }
}

fn image_infos(
    slots: &[Option<TextureHandle>],
    textures: &SlotMap<TextureHandle, VulkanTexture>,
    fallback: &VulkanTexture,
) -> Vec<vk::DescriptorImageInfo> {
    slots
        .iter()
        .map(|slot| {
            let texture = slot.and_then(|handle| textures.get(handle)).unwrap_or(fallback);
            vk::DescriptorImageInfo {
                sampler: texture.sampler(),
                image_view: texture.view(),
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        })
        .collect()
}

fn write_samplers(device: &Device, set: vk::DescriptorSet, infos: &[vk::DescriptorImageInfo]) {
    if infos.is_empty() {
        return;
    }
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(1)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(infos)
        .build();
    unsafe {
        device.update_descriptor_sets(&[write], &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_formats_cover_all_types() {
        assert_eq!(attribute_format(AttributeType::Vec3), vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attribute_format(AttributeType::Vec4), vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(attribute_format(AttributeType::Uint32), vk::Format::R32_UINT);
    }

    #[test]
    fn test_stage_flag_mapping() {
        assert_eq!(stage_flags(ShaderStages::VERTEX), vk::ShaderStageFlags::VERTEX);
        assert_eq!(stage_flags(ShaderStages::FRAGMENT), vk::ShaderStageFlags::FRAGMENT);
    }
}
