//! GPU texture upload and sampling
//!
//! Pixel data arrives as RGBA8 from the resource layer, goes through a
//! host-visible staging buffer, and lands in a device-local sampled image.
//! Layout moves UNDEFINED -> TRANSFER_DST -> SHADER_READ_ONLY inside one
//! blocking single-time submission.

use ash::{vk, Device, Instance};

use crate::render::vulkan::buffer::{find_memory_type, Buffer};
use crate::render::vulkan::{
    CommandPool, LogicalDevice, PhysicalDeviceInfo, VulkanError, VulkanResult,
};
use crate::resources::TextureData;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Sampled 2D texture with its view and sampler
pub struct VulkanTexture {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
    width: u32,
    height: u32,
    size_bytes: u64,
}

impl VulkanTexture {
    /// Upload pixel data and build the view and sampler
    pub fn new(
        device: &LogicalDevice,
        instance: &Instance,
        physical: &PhysicalDeviceInfo,
        command_pool: &CommandPool,
        data: &TextureData,
    ) -> VulkanResult<Self> {
        if data.pixels.len() != data.size_bytes() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Texture '{}' pixel data is {} bytes, expected {}",
                    data.name,
                    data.pixels.len(),
                    data.size_bytes()
                ),
            });
        }

        let staging = Buffer::new(
            device.device.clone(),
            instance,
            physical.device,
            data.pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_bytes_at(0, &data.pixels)?;

        let (image, memory, size_bytes) =
            create_image(&device.device, instance, physical.device, data.width, data.height)?;

        let upload_result = upload_pixels(
            device,
            command_pool,
            staging.handle(),
            image,
            data.width,
            data.height,
        );
        if let Err(err) = upload_result {
            unsafe {
                device.device.destroy_image(image, None);
                device.device.free_memory(memory, None);
            }
            return Err(err);
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            match device.device.create_image_view(&view_info, None) {
                Ok(view) => view,
                Err(err) => {
                    device.device.destroy_image(image, None);
                    device.device.free_memory(memory, None);
                    return Err(VulkanError::Api(err));
                }
            }
        };

        let sampler = match create_sampler(&device.device, physical) {
            Ok(sampler) => sampler,
            Err(err) => {
                unsafe {
                    device.device.destroy_image_view(view, None);
                    device.device.destroy_image(image, None);
                    device.device.free_memory(memory, None);
                }
                return Err(err);
            }
        };

        log::debug!(
            "Uploaded texture '{}' {}x{} ({} bytes)",
            data.name,
            data.width,
            data.height,
            data.pixels.len()
        );

        Ok(Self {
            device: device.device.clone(),
            image,
            memory,
            view,
            sampler,
            width: data.width,
            height: data.height,
            size_bytes,
        })
    }

    /// Get the image view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get the sampler handle
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Texture width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Texture height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes of device memory backing the image
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

fn create_image(
    device: &Device,
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    width: u32,
    height: u32,
) -> VulkanResult<(vk::Image, vk::DeviceMemory, u64)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .extent(vk::Extent3D { width, height, depth: 1 })
        .mip_levels(1)
        .array_layers(1)
        .format(TEXTURE_FORMAT)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .samples(vk::SampleCountFlags::TYPE_1);

    let image = unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? };

    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let memory_type_index = match find_memory_type(
        instance,
        physical_device,
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(index) => index,
        Err(err) => {
            unsafe { device.destroy_image(image, None) };
            return Err(err);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe {
        match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(err) => {
                device.destroy_image(image, None);
                return Err(VulkanError::Api(err));
            }
        }
    };

    unsafe {
        if let Err(err) = device.bind_image_memory(image, memory, 0) {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
            return Err(VulkanError::Api(err));
        }
    }

    Ok((image, memory, requirements.size))
}

fn upload_pixels(
    device: &LogicalDevice,
    command_pool: &CommandPool,
    staging: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> VulkanResult<()> {
    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    let mut recorder = command_pool.begin_single_time()?;

    let to_transfer = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .build();
    recorder.pipeline_barrier(
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        to_transfer,
    );

    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D { width, height, depth: 1 },
    };
    recorder.copy_buffer_to_image(
        staging,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        region,
    );

    let to_shader_read = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .build();
    recorder.pipeline_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        to_shader_read,
    );

    command_pool.submit_single_time(recorder, device.graphics_queue)
}

fn create_sampler(device: &Device, physical: &PhysicalDeviceInfo) -> VulkanResult<vk::Sampler> {
    let mut sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    if physical.supports_anisotropy() {
        sampler_info = sampler_info
            .anisotropy_enable(true)
            .max_anisotropy(physical.properties.limits.max_sampler_anisotropy);
    } else {
        sampler_info = sampler_info.anisotropy_enable(false).max_anisotropy(1.0);
    }

    unsafe { device.create_sampler(&sampler_info, None).map_err(VulkanError::Api) }
}
