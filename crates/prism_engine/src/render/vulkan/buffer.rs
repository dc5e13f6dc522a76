//! Buffer management for vertex data, indices, and shader uniforms
//!
//! Memory management following RAII patterns with proper allocation and
//! cleanup. Geometry buffers are device-local and filled through a staging
//! copy; uniform buffers stay host-visible for per-frame rewrites.

use ash::{vk, Device, Instance};
use std::mem;

use crate::render::vulkan::{CommandPool, LogicalDevice, VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub fn new(
        device: Device,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match find_memory_type(
            instance,
            physical_device,
            mem_requirements.memory_type_bits,
            properties,
        ) {
            Ok(index) => index,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            match device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(err) => {
                    device.destroy_buffer(buffer, None);
                    return Err(VulkanError::Api(err));
                }
            }
        };

        unsafe {
            if let Err(err) = device.bind_buffer_memory(buffer, memory, 0) {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
                return Err(VulkanError::Api(err));
            }
        }

        Ok(Self { device, buffer, memory, size })
    }

    /// Write bytes at an offset into host-visible memory
    ///
    /// The memory must have been allocated HOST_VISIBLE | HOST_COHERENT.
    pub fn write_bytes_at(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Write of {} bytes at offset {} exceeds buffer size {}",
                    bytes.len(),
                    offset,
                    self.size
                ),
            });
        }

        unsafe {
            let data_ptr = self
                .device
                .map_memory(
                    self.memory,
                    offset,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data_ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Write a slice of plain-old-data values starting at offset zero
    pub fn write_data<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes_at(0, bytemuck::cast_slice(data))
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Device-local vertex buffer filled through a staging copy
pub struct VertexBuffer {
    buffer: Buffer,
    vertex_count: u32,
}

impl VertexBuffer {
    /// Create vertex buffer with vertex data
    pub fn new<V: bytemuck::Pod>(
        device: &LogicalDevice,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        command_pool: &CommandPool,
        vertices: &[V],
    ) -> VulkanResult<Self> {
        let size = (vertices.len() * mem::size_of::<V>()) as vk::DeviceSize;

        let buffer = Buffer::new(
            device.device.clone(),
            instance,
            physical_device,
            size,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        upload_via_staging(
            device,
            instance,
            physical_device,
            command_pool,
            bytemuck::cast_slice(vertices),
            &buffer,
        )?;

        Ok(Self { buffer, vertex_count: vertices.len() as u32 })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Get vertex count
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

/// Device-local index buffer for u32 indices
pub struct IndexBuffer {
    buffer: Buffer,
    index_count: u32,
}

impl IndexBuffer {
    /// Create index buffer with index data
    pub fn new(
        device: &LogicalDevice,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        command_pool: &CommandPool,
        indices: &[u32],
    ) -> VulkanResult<Self> {
        let size = (indices.len() * mem::size_of::<u32>()) as vk::DeviceSize;

        let buffer = Buffer::new(
            device.device.clone(),
            instance,
            physical_device,
            size,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        upload_via_staging(
            device,
            instance,
            physical_device,
            command_pool,
            bytemuck::cast_slice(indices),
            &buffer,
        )?;

        Ok(Self { buffer, index_count: indices.len() as u32 })
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Get index count
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

fn upload_via_staging(
    device: &LogicalDevice,
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    command_pool: &CommandPool,
    bytes: &[u8],
    destination: &Buffer,
) -> VulkanResult<()> {
    let staging = Buffer::new(
        device.device.clone(),
        instance,
        physical_device,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    staging.write_bytes_at(0, bytes)?;

    let mut recorder = command_pool.begin_single_time()?;
    recorder.copy_buffer(staging.handle(), destination.handle(), bytes.len() as vk::DeviceSize);
    command_pool.submit_single_time(recorder, device.graphics_queue)
}

/// Find a memory type matching the filter and property requirements
pub(crate) fn find_memory_type(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let mem_properties =
        unsafe { instance.get_physical_device_memory_properties(physical_device) };

    for i in 0..mem_properties.memory_type_count {
        if (type_filter & (1 << i)) != 0
            && (mem_properties.memory_types[i as usize].property_flags & properties)
                == properties
        {
            return Ok(i);
        }
    }

    Err(VulkanError::NoSuitableMemoryType)
}
