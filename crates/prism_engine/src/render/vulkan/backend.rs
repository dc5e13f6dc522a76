//! Vulkan rendering backend
//!
//! Owns every GPU object and drives the frame protocol. Frame pacing
//! decisions live in [`FrameScheduler`]; this type adapts the swapchain,
//! queues, and per-slot sync objects to the scheduler's [`FrameDevice`]
//! contract and handles what the scheduler reports: skipped frames,
//! swapchain recreation, and presentation.

use std::collections::HashMap;

use ash::vk;
use slotmap::SlotMap;

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::foundation::memory::{AllocationId, AllocationTracker, MemoryTag};
use crate::render::api::{
    BackendResult, DebugViewMode, FrameStatus, GraphicsBackend, RendererConfig, ShaderHandle,
};
use crate::render::frame::{
    AcquireOutcome, FrameBegin, FrameDevice, FrameEnd, FrameScheduler, PresentOutcome,
};
use crate::render::vulkan::buffer::{IndexBuffer, VertexBuffer};
use crate::render::vulkan::{
    CommandPool, CommandRecorder, DepthBuffer, Framebuffer, FrameSync, LogicalDevice,
    PhysicalDeviceInfo, RenderPass, Surface, Swapchain, VulkanError, VulkanInstance,
    VulkanShader, VulkanTexture,
};
use crate::render::window::Window;
use crate::resources::{GeometryData, ShaderConfig, TextureData, TextureHandle};

/// One uploaded mesh and its tracked allocations
struct GeometryBuffers {
    name: String,
    vertex_buffer: VertexBuffer,
    index_buffer: IndexBuffer,
    vertex_allocation: AllocationId,
    index_allocation: AllocationId,
}

/// Adapts the backend's GPU objects to the scheduler's device contract
struct SubmitContext<'a> {
    device: &'a LogicalDevice,
    swapchain: &'a Swapchain,
    frame_sync: &'a [FrameSync],
    command_buffers: &'a [vk::CommandBuffer],
}

impl FrameDevice for SubmitContext<'_> {
    type Error = VulkanError;

    fn wait_for_fence(&mut self, slot: usize) -> Result<(), VulkanError> {
        self.frame_sync[slot].in_flight.wait(u64::MAX)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome, VulkanError> {
        let result = unsafe {
            self.swapchain.loader().acquire_next_image(
                self.swapchain.handle(),
                u64::MAX,
                self.frame_sync[slot].image_available.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            // A suboptimal acquire still yields a usable image; present
            // reports it again and triggers the rebuild.
            Ok((image_index, _suboptimal)) => Ok(AcquireOutcome::Acquired(image_index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    fn reset_fence(&mut self, slot: usize) -> Result<(), VulkanError> {
        self.frame_sync[slot].in_flight.reset()
    }

    fn submit(&mut self, slot: usize, _image_index: u32) -> Result<(), VulkanError> {
        let sync = &self.frame_sync[slot];
        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffers[slot]];
        let signal_semaphores = [sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight.handle(),
                )
                .map_err(VulkanError::Api)
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, VulkanError> {
        let wait_semaphores = [self.frame_sync[slot].render_finished.handle()];
        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain
                .loader()
                .queue_present(self.device.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }
}

/// Vulkan implementation of [`GraphicsBackend`]
///
/// Field declaration order doubles as teardown order: shaders and resources
/// drop before the objects they were created from, and the instance goes
/// last.
pub struct VulkanBackend {
    scheduler: FrameScheduler,
    current_image: Option<u32>,
    current_recorder: Option<CommandRecorder>,
    active_shader: Option<ShaderHandle>,
    tracker: AllocationTracker,
    shader_names: HashMap<String, ShaderHandle>,
    shader_allocations: HashMap<ShaderHandle, AllocationId>,
    texture_allocations: HashMap<TextureHandle, AllocationId>,
    depth_allocation: AllocationId,
    fallback_allocation: AllocationId,

    shaders: SlotMap<ShaderHandle, VulkanShader>,
    textures: SlotMap<TextureHandle, VulkanTexture>,
    fallback_texture: VulkanTexture,
    geometry: Option<GeometryBuffers>,
    framebuffers: Vec<Framebuffer>,
    depth_buffer: DepthBuffer,
    render_passes: HashMap<String, RenderPass>,
    swapchain: Swapchain,
    frame_sync: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    command_pool: CommandPool,
    device: LogicalDevice,
    physical: PhysicalDeviceInfo,
    surface: Surface,
    instance: VulkanInstance,
}

impl VulkanBackend {
    /// Bring up the full Vulkan stack against `window`
    pub fn new(window: &mut Window, config: &RendererConfig) -> BackendResult<Self> {
        let mut tracker = AllocationTracker::new();

        let instance = VulkanInstance::new(
            window,
            &config.application_name,
            config.application_version,
            config.validation_enabled(),
        )?;
        let surface = Surface::new(&instance, window)?;
        let physical = PhysicalDeviceInfo::select_best_device(&instance.instance, &surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical)?;

        let frames_in_flight = config.frames_in_flight;
        let swapchain = Swapchain::new(
            &physical,
            &device,
            &surface,
            window.framebuffer_size(),
            None,
        )?;

        let depth_format = physical.find_depth_format(&instance.instance)?;
        let depth_buffer = DepthBuffer::new(
            device.device.clone(),
            &instance.instance,
            physical.device,
            swapchain.extent(),
            depth_format,
        )?;
        let depth_allocation = tracker.track(depth_buffer.size_bytes(), MemoryTag::GpuTexture);

        let world_pass = RenderPass::new_forward_pass(
            device.device.clone(),
            swapchain.format(),
            depth_format,
            config.clear_color,
        )?;
        let mut render_passes = HashMap::new();
        render_passes.insert(ShaderConfig::BUILTIN_WORLD_PASS.to_string(), world_pass);

        let framebuffers = create_framebuffers(
            &device,
            &render_passes[ShaderConfig::BUILTIN_WORLD_PASS],
            &swapchain,
            &depth_buffer,
        )?;

        let command_pool = CommandPool::new(device.device.clone(), device.queue_families.graphics)?;
        let command_buffers = command_pool.allocate_command_buffers(frames_in_flight as u32)?;

        let frame_sync = (0..frames_in_flight)
            .map(|_| FrameSync::new(device.device.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let fallback_data = TextureData::fallback_checkerboard();
        let fallback_texture =
            VulkanTexture::new(&device, &instance.instance, &physical, &command_pool, &fallback_data)?;
        let fallback_allocation =
            tracker.track(fallback_texture.size_bytes(), MemoryTag::GpuTexture);

        log::info!(
            "Vulkan backend ready: {} frames in flight, {}x{} swapchain",
            frames_in_flight,
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            scheduler: FrameScheduler::new(frames_in_flight),
            current_image: None,
            current_recorder: None,
            active_shader: None,
            tracker,
            shader_names: HashMap::new(),
            shader_allocations: HashMap::new(),
            texture_allocations: HashMap::new(),
            depth_allocation,
            fallback_allocation,
            shaders: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            fallback_texture,
            geometry: None,
            framebuffers,
            depth_buffer,
            render_passes,
            swapchain,
            frame_sync,
            command_buffers,
            command_pool,
            device,
            physical,
            surface,
            instance,
        })
    }

    fn recorder_mut(&mut self) -> Result<&mut CommandRecorder, VulkanError> {
        self.current_recorder.as_mut().ok_or(VulkanError::InvalidOperation {
            reason: "No frame is being recorded".to_string(),
        })
    }

    /// Frames presented since startup
    pub fn frame_number(&self) -> u64 {
        self.scheduler.frame_number()
    }

    fn active_shader_handle(&self) -> Result<ShaderHandle, VulkanError> {
        self.active_shader.ok_or(VulkanError::InvalidOperation {
            reason: "No shader is in use".to_string(),
        })
    }

    fn active_shader_mut(&mut self) -> Result<&mut VulkanShader, VulkanError> {
        let handle = self.active_shader_handle()?;
        self.shaders.get_mut(handle).ok_or(VulkanError::InvalidOperation {
            reason: "Active shader was destroyed".to_string(),
        })
    }

    /// Tear down and rebuild everything sized to the swapchain
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<(), VulkanError> {
        if width == 0 || height == 0 {
            // Minimized. Leave the resize pending until a real size arrives.
            self.scheduler.notify_resize(width, height);
            return Ok(());
        }

        self.device.wait_idle()?;
        self.framebuffers.clear();

        let new_swapchain = Swapchain::new(
            &self.physical,
            &self.device,
            &self.surface,
            (width, height),
            Some(&self.swapchain),
        )?;
        self.swapchain = new_swapchain;

        let depth_format = self.depth_buffer.format();
        self.depth_buffer = DepthBuffer::new(
            self.device.device.clone(),
            &self.instance.instance,
            self.physical.device,
            self.swapchain.extent(),
            depth_format,
        )?;
        self.tracker.release(self.depth_allocation, MemoryTag::GpuTexture);
        self.depth_allocation =
            self.tracker.track(self.depth_buffer.size_bytes(), MemoryTag::GpuTexture);

        self.framebuffers = create_framebuffers(
            &self.device,
            self.render_passes
                .get(ShaderConfig::BUILTIN_WORLD_PASS)
                .ok_or_else(|| VulkanError::ResourceNotFound {
                    name: ShaderConfig::BUILTIN_WORLD_PASS.to_string(),
                })?,
            &self.swapchain,
            &self.depth_buffer,
        )?;

        log::debug!(
            "Recreated swapchain at {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }
}

impl GraphicsBackend for VulkanBackend {
    fn begin_frame(&mut self, _delta_time: f32) -> BackendResult<FrameStatus> {
        if let Some((width, height)) = self.scheduler.take_pending_resize() {
            self.recreate_swapchain(width, height)?;
            return Ok(FrameStatus::Skipped);
        }

        let begin = {
            let mut context = SubmitContext {
                device: &self.device,
                swapchain: &self.swapchain,
                frame_sync: &self.frame_sync,
                command_buffers: &self.command_buffers,
            };
            self.scheduler.begin_frame(&mut context)?
        };

        let image_index = match begin {
            FrameBegin::SwapchainOutOfDate => {
                let extent = self.swapchain.extent();
                self.recreate_swapchain(extent.width, extent.height)?;
                return Ok(FrameStatus::Skipped);
            }
            FrameBegin::Ready { image_index } => image_index,
        };

        let slot = self.scheduler.current_frame();
        let mut recorder =
            CommandRecorder::new(self.command_buffers[slot], self.device.device.clone());
        recorder.begin()?;

        let pass = self
            .render_passes
            .get(ShaderConfig::BUILTIN_WORLD_PASS)
            .ok_or_else(|| VulkanError::ResourceNotFound {
                name: ShaderConfig::BUILTIN_WORLD_PASS.to_string(),
            })?;
        let extent = self.swapchain.extent();
        recorder.begin_render_pass(
            pass.handle(),
            self.framebuffers[image_index as usize].handle(),
            vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent },
            pass.clear_values(),
        )?;

        recorder.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        recorder.set_scissor(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent });

        self.current_image = Some(image_index);
        self.current_recorder = Some(recorder);
        Ok(FrameStatus::Ready)
    }

    fn end_frame(&mut self) -> BackendResult<FrameStatus> {
        let image_index = self.current_image.take().ok_or(VulkanError::InvalidOperation {
            reason: "end_frame without a ready begin_frame".to_string(),
        })?;
        let mut recorder = self.current_recorder.take().ok_or(VulkanError::InvalidOperation {
            reason: "end_frame without a recorded command buffer".to_string(),
        })?;

        recorder.end_render_pass();
        recorder.end()?;

        let end = {
            let mut context = SubmitContext {
                device: &self.device,
                swapchain: &self.swapchain,
                frame_sync: &self.frame_sync,
                command_buffers: &self.command_buffers,
            };
            self.scheduler.end_frame(&mut context, image_index)?
        };

        if end == FrameEnd::PresentedNeedsRecreate {
            let extent = self.swapchain.extent();
            self.recreate_swapchain(extent.width, extent.height)?;
        }

        Ok(FrameStatus::Presented)
    }

    fn on_resized(&mut self, width: u32, height: u32) {
        log::debug!("Window resized to {width}x{height}");
        self.scheduler.notify_resize(width, height);
    }

    fn update_global_state(
        &mut self,
        projection: Mat4,
        view: Mat4,
        view_position: Vec3,
        ambient_color: Vec4,
        mode: DebugViewMode,
    ) -> BackendResult<()> {
        let shader = self.active_shader_mut()?;
        shader.bind_globals();
        shader.set_uniform("projection", bytemuck::cast_slice(projection.as_slice()))?;
        shader.set_uniform("view", bytemuck::cast_slice(view.as_slice()))?;
        shader.set_uniform("ambient_color", bytemuck::cast_slice(ambient_color.as_slice()))?;
        shader.set_uniform("view_position", bytemuck::cast_slice(view_position.as_slice()))?;
        let mode_value = mode.as_i32();
        shader.set_uniform("mode", bytemuck::bytes_of(&mode_value))?;
        Ok(())
    }

    fn create_shader(&mut self, config: &ShaderConfig) -> BackendResult<ShaderHandle> {
        if self.shader_names.contains_key(&config.name) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Shader '{}' already exists", config.name),
            }
            .into());
        }

        let render_pass = self.render_passes.get(&config.render_pass_name).ok_or_else(|| {
            VulkanError::ResourceNotFound { name: config.render_pass_name.clone() }
        })?;

        let shader = VulkanShader::new(
            &self.device,
            &self.instance.instance,
            &self.physical,
            render_pass,
            config,
            self.scheduler.frames_in_flight(),
        )?;

        let allocation = self.tracker.track(shader.uniform_buffer_size(), MemoryTag::Shader);
        let handle = self.shaders.insert(shader);
        self.shader_names.insert(config.name.clone(), handle);
        self.shader_allocations.insert(handle, allocation);
        Ok(handle)
    }

    fn use_shader(&mut self, shader: ShaderHandle) -> BackendResult<()> {
        if !self.shaders.contains_key(shader) {
            return Err(VulkanError::InvalidOperation {
                reason: "Unknown shader handle".to_string(),
            }
            .into());
        }
        self.active_shader = Some(shader);

        // Outside a frame this only selects the shader; resource setup like
        // instance acquisition needs an active shader but no command buffer.
        if let Some(recorder) = self.current_recorder.as_mut() {
            self.shaders[shader].bind_pipeline(recorder);
        }
        Ok(())
    }

    fn bind_globals(&mut self) -> BackendResult<()> {
        self.active_shader_mut()?.bind_globals();
        Ok(())
    }

    fn apply_global(&mut self) -> BackendResult<()> {
        let handle = self.active_shader_handle()?;
        let frame = self.scheduler.current_frame();
        let recorder = self.current_recorder.as_mut().ok_or(VulkanError::InvalidOperation {
            reason: "No frame is being recorded".to_string(),
        })?;
        let shader = self.shaders.get_mut(handle).ok_or(VulkanError::InvalidOperation {
            reason: "Active shader was destroyed".to_string(),
        })?;
        shader.apply_global(recorder, frame, &self.textures, &self.fallback_texture)?;
        Ok(())
    }

    fn bind_instance(&mut self, instance: u32) -> BackendResult<()> {
        self.active_shader_mut()?.bind_instance(instance)?;
        Ok(())
    }

    fn apply_instance(&mut self) -> BackendResult<()> {
        let handle = self.active_shader_handle()?;
        let frame = self.scheduler.current_frame();
        let recorder = self.current_recorder.as_mut().ok_or(VulkanError::InvalidOperation {
            reason: "No frame is being recorded".to_string(),
        })?;
        let shader = self.shaders.get_mut(handle).ok_or(VulkanError::InvalidOperation {
            reason: "Active shader was destroyed".to_string(),
        })?;
        shader.apply_instance(recorder, frame, &self.textures, &self.fallback_texture)?;
        Ok(())
    }

    fn set_uniform(&mut self, name: &str, value: &[u8]) -> BackendResult<()> {
        self.active_shader_mut()?.set_uniform(name, value)?;
        Ok(())
    }

    fn set_sampler(&mut self, name: &str, texture: TextureHandle) -> BackendResult<()> {
        self.active_shader_mut()?.set_sampler(name, texture)?;
        Ok(())
    }

    fn acquire_shader_instance(&mut self) -> BackendResult<u32> {
        Ok(self.active_shader_mut()?.acquire_instance()?)
    }

    fn release_shader_instance(&mut self, instance: u32) -> BackendResult<()> {
        self.active_shader_mut()?.release_instance(instance)?;
        Ok(())
    }

    fn upload_geometry(&mut self, geometry: &GeometryData) -> BackendResult<()> {
        if let Some(previous) = self.geometry.take() {
            // The old buffers may still be referenced by in-flight frames.
            self.device.wait_idle()?;
            self.tracker.release(previous.vertex_allocation, MemoryTag::GpuBuffer);
            self.tracker.release(previous.index_allocation, MemoryTag::GpuBuffer);
        }

        let vertex_buffer = VertexBuffer::new(
            &self.device,
            &self.instance.instance,
            self.physical.device,
            &self.command_pool,
            &geometry.vertices,
        )?;
        let index_buffer = IndexBuffer::new(
            &self.device,
            &self.instance.instance,
            self.physical.device,
            &self.command_pool,
            &geometry.indices,
        )?;

        let vertex_allocation = self.tracker.track(vertex_buffer.size(), MemoryTag::GpuBuffer);
        let index_allocation = self.tracker.track(index_buffer.size(), MemoryTag::GpuBuffer);

        log::debug!(
            "Uploaded geometry '{}': {} vertices, {} indices",
            geometry.name,
            vertex_buffer.vertex_count(),
            index_buffer.index_count()
        );

        self.geometry = Some(GeometryBuffers {
            name: geometry.name.clone(),
            vertex_buffer,
            index_buffer,
            vertex_allocation,
            index_allocation,
        });
        Ok(())
    }

    fn draw_geometry(&mut self, model: Mat4) -> BackendResult<()> {
        let handle = self.active_shader_handle()?;
        let recorder = self.current_recorder.as_mut().ok_or(VulkanError::InvalidOperation {
            reason: "No frame is being recorded".to_string(),
        })?;
        let shader = self.shaders.get_mut(handle).ok_or(VulkanError::InvalidOperation {
            reason: "Active shader was destroyed".to_string(),
        })?;
        let geometry = self.geometry.as_ref().ok_or(VulkanError::InvalidOperation {
            reason: "No geometry has been uploaded".to_string(),
        })?;

        if shader.use_locals() {
            shader.set_uniform("model", bytemuck::cast_slice(model.as_slice()))?;
            shader.apply_local(recorder)?;
        }

        recorder.bind_vertex_buffers(0, &[geometry.vertex_buffer.handle()], &[0]);
        recorder.bind_index_buffer(geometry.index_buffer.handle(), 0, vk::IndexType::UINT32);
        recorder.draw_indexed(geometry.index_buffer.index_count(), 1, 0, 0, 0);
        Ok(())
    }

    fn create_texture(&mut self, data: &TextureData) -> BackendResult<TextureHandle> {
        let texture = VulkanTexture::new(
            &self.device,
            &self.instance.instance,
            &self.physical,
            &self.command_pool,
            data,
        )?;
        let allocation = self.tracker.track(texture.size_bytes(), MemoryTag::GpuTexture);
        let handle = self.textures.insert(texture);
        self.texture_allocations.insert(handle, allocation);
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> BackendResult<()> {
        if self.textures.remove(texture).is_none() {
            return Err(VulkanError::InvalidOperation {
                reason: "Unknown texture handle".to_string(),
            }
            .into());
        }
        // Frames in flight may still sample the image.
        self.device.wait_idle()?;
        if let Some(allocation) = self.texture_allocations.remove(&texture) {
            self.tracker.release(allocation, MemoryTag::GpuTexture);
        }
        Ok(())
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        let extent = self.swapchain.extent();
        (extent.width, extent.height)
    }

    fn frames_in_flight(&self) -> usize {
        self.scheduler.frames_in_flight()
    }

    fn wait_idle(&self) -> BackendResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::warn!("Device wait failed during renderer shutdown: {err}");
        }

        for (_, allocation) in self.shader_allocations.drain() {
            self.tracker.release(allocation, MemoryTag::Shader);
        }
        for (_, allocation) in self.texture_allocations.drain() {
            self.tracker.release(allocation, MemoryTag::GpuTexture);
        }
        if let Some(geometry) = self.geometry.take() {
            self.tracker.release(geometry.vertex_allocation, MemoryTag::GpuBuffer);
            self.tracker.release(geometry.index_allocation, MemoryTag::GpuBuffer);
            log::debug!("Released geometry '{}'", geometry.name);
        }
        self.tracker.release(self.depth_allocation, MemoryTag::GpuTexture);
        self.tracker.release(self.fallback_allocation, MemoryTag::GpuTexture);

        self.tracker.report();
        log::info!("Vulkan backend shut down after {} frames", self.scheduler.frame_number());
    }
}

fn create_framebuffers(
    device: &LogicalDevice,
    render_pass: &RenderPass,
    swapchain: &Swapchain,
    depth_buffer: &DepthBuffer,
) -> Result<Vec<Framebuffer>, VulkanError> {
    swapchain
        .image_views()
        .iter()
        .map(|&view| {
            Framebuffer::new(
                device.device.clone(),
                render_pass.handle(),
                &[view, depth_buffer.image_view()],
                swapchain.extent(),
            )
        })
        .collect()
}
