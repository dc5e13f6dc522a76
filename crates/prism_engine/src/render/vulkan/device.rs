//! Physical device selection and logical device creation
//!
//! Candidate GPUs are scored rather than taken first-fit: discrete beats
//! integrated, larger image limits break ties, and optional features add
//! small bonuses. A device that cannot present, lacks the swapchain
//! extension, or has no graphics queue is rejected outright.

use std::collections::HashSet;
use std::ffi::CStr;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Instance};

use crate::render::vulkan::instance::Surface;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Queue family indices resolved for a physical device
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilies {
    /// Graphics-capable family
    pub graphics: u32,
    /// Presentation-capable family
    pub present: u32,
    /// Transfer-capable family, preferring one dedicated to transfer
    pub transfer: u32,
    /// Compute-capable family, absent on devices without one
    pub compute: Option<u32>,
}

/// Selected physical device, its capabilities, and its score
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Resolved queue family indices
    pub queue_families: QueueFamilies,
    /// Suitability score this device won with
    pub score: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the highest scoring device that meets the hard requirements
    pub fn select_best_device(instance: &Instance, surface: &Surface) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices().map_err(VulkanError::Api)?
        };

        let mut best: Option<Self> = None;
        for device in devices {
            match Self::evaluate_device(instance, device, surface) {
                Ok(info) => {
                    log::debug!(
                        "Candidate GPU \"{}\" scored {}",
                        info.name(),
                        info.score
                    );
                    if best.as_ref().map_or(true, |current| info.score > current.score) {
                        best = Some(info);
                    }
                }
                Err(e) => log::debug!("Rejected GPU: {e}"),
            }
        }

        let info = best.ok_or_else(|| {
            VulkanError::InitializationFailed("No suitable GPU found".to_string())
        })?;
        log::info!(
            "Selected GPU: {} (score {}, type {:?})",
            info.name(),
            info.score,
            info.properties.device_type
        );
        Ok(info)
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let queue_families = Self::find_queue_families(instance, device, surface)?;

        Self::check_extensions(instance, device)?;

        // Presentable at all? Formats and present modes must be non-empty.
        if surface.formats(device)?.is_empty() || surface.present_modes(device)?.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "Device has no usable surface formats or present modes".to_string(),
            ));
        }

        let mut score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 0,
        };
        score += properties.limits.max_image_dimension2_d / 1000;
        if features.sampler_anisotropy == vk::TRUE {
            score += 50;
        }

        Ok(Self { device, properties, features, queue_families, score })
    }

    fn find_queue_families(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &Surface,
    ) -> VulkanResult<QueueFamilies> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics = None;
        let mut present = None;
        let mut transfer: Option<(u32, bool)> = None;
        let mut compute = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics.is_none() {
                graphics = Some(index);
            }

            if family.queue_flags.contains(vk::QueueFlags::COMPUTE) && compute.is_none() {
                compute = Some(index);
            }

            if present.is_none() && surface.supports_present(device, index)? {
                present = Some(index);
            }

            if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
                let dedicated = !family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                match transfer {
                    Some((_, true)) => {}
                    Some((_, false)) if dedicated => transfer = Some((index, true)),
                    Some(_) => {}
                    None => transfer = Some((index, dedicated)),
                }
            }
        }

        let graphics = graphics.ok_or_else(|| {
            VulkanError::InitializationFailed("No graphics queue family found".to_string())
        })?;
        let present = present.ok_or_else(|| {
            VulkanError::InitializationFailed("No present queue family found".to_string())
        })?;
        // Graphics queues support transfer even when the flag is unreported.
        let transfer = transfer.map_or(graphics, |(index, _)| index);

        Ok(QueueFamilies { graphics, present, transfer, compute })
    }

    fn check_extensions(instance: &Instance, device: vk::PhysicalDevice) -> VulkanResult<()> {
        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        let required = [SwapchainLoader::name()];
        let supported = required.iter().all(|required| {
            extensions.iter().any(|available| {
                let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
                name == *required
            })
        });

        if supported {
            Ok(())
        } else {
            Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ))
        }
    }

    /// Device name as reported by the driver
    pub fn name(&self) -> String {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        }
    }

    /// Minimum alignment for uniform buffer offsets
    pub fn min_ubo_alignment(&self) -> u64 {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Whether anisotropic filtering can be enabled
    pub fn supports_anisotropy(&self) -> bool {
        self.features.sampler_anisotropy == vk::TRUE
    }

    /// First depth format with optimal-tiling attachment support
    pub fn find_depth_format(&self, instance: &Instance) -> VulkanResult<vk::Format> {
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        for format in candidates {
            let props = unsafe {
                instance.get_physical_device_format_properties(self.device, format)
            };
            if props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            {
                return Ok(format);
            }
        }
        Err(VulkanError::InitializationFailed(
            "No supported depth format found".to_string(),
        ))
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Transfer operations queue
    pub transfer_queue: vk::Queue,
    /// Compute operations queue, absent on devices without a compute family
    pub compute_queue: Option<vk::Queue>,
    /// Resolved queue family indices
    pub queue_families: QueueFamilies,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the logical device with one queue per distinct family
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical.queue_families;
        let mut unique_families: HashSet<u32> =
            [families.graphics, families.present, families.transfer].into_iter().collect();
        if let Some(compute) = families.compute {
            unique_families.insert(compute);
        }

        let queue_priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical.supports_anisotropy())
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let transfer_queue = unsafe { device.get_device_queue(families.transfer, 0) };
        let compute_queue =
            families.compute.map(|family| unsafe { device.get_device_queue(family, 0) });

        let swapchain_loader = SwapchainLoader::new(instance, &device);

        log::info!(
            "Logical device created (graphics family {}, present family {}, transfer family {})",
            families.graphics,
            families.present,
            families.transfer
        );

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            transfer_queue,
            compute_queue,
            queue_families: families,
            swapchain_loader,
        })
    }

    /// Block until all queues on the device are idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}
