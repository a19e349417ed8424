/// Vulkan device dispatch
///
/// Implements [`DeviceDispatch`] with `ash` for an application-owned Vulkan
/// device. Requires VK_EXT_image_drm_format_modifier and
/// VK_KHR_external_memory_fd (plus Vulkan 1.1 for the `*2` entry points);
/// VK_EXT_image_compression_control is only used when the swapchain asks for
/// compression control.
///
/// The instance and device are borrowed handles: they are cloned function
/// tables and never destroyed here.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use ash::vk::{self, Handle};
use display_wsi::drm_fourcc::DrmModifier;
use display_wsi::wsi::swapchain::{
    CompressionControl, DeviceDispatch, ExternalImageFormatProperties, ExternalMemoryFeatures,
    ExternalMemoryHandleType, Extent3D, FenceHandle, ImageCreateInfo, ImageDesc, ImageHandle, MemoryBinding,
    MemoryHandle, ModifierProperties, QueueHandle, SemaphoreHandle, SharingMode,
};
use display_wsi::wsi::{Error, Result};
use display_wsi::{wsi_err, wsi_error, wsi_warn};
use nix::unistd::{close, dup, lseek, Whence};

/// Map a failed Vulkan call to the layer error classes
fn vk_error(call: &str, result: vk::Result) -> Error {
    match result {
        vk::Result::TIMEOUT => Error::Timeout,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            wsi_error!("wsi::vulkan", "{} failed: {:?}", call, result);
            Error::OutOfHostMemory
        }
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED => Error::FormatNotSupported(format!("{}: {:?}", call, result)),
        _ => wsi_err!("wsi::vulkan", "{} failed: {:?}", call, result),
    }
}

fn vk_handle_type(handle_type: ExternalMemoryHandleType) -> vk::ExternalMemoryHandleTypeFlags {
    match handle_type {
        ExternalMemoryHandleType::DmaBuf => vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT,
    }
}

fn vk_sharing(sharing_mode: &SharingMode) -> (vk::SharingMode, &[u32]) {
    match sharing_mode {
        SharingMode::Exclusive => (vk::SharingMode::EXCLUSIVE, &[]),
        SharingMode::Concurrent(families) => (vk::SharingMode::CONCURRENT, families.as_slice()),
    }
}

fn memory_plane_aspect(plane: u32) -> vk::ImageAspectFlags {
    match plane {
        0 => vk::ImageAspectFlags::MEMORY_PLANE_0_EXT,
        1 => vk::ImageAspectFlags::MEMORY_PLANE_1_EXT,
        2 => vk::ImageAspectFlags::MEMORY_PLANE_2_EXT,
        _ => vk::ImageAspectFlags::MEMORY_PLANE_3_EXT,
    }
}

/// Fixed-rate masks of a compression request, in the form the chain wants
fn fixed_rate_flags(compression: &CompressionControl) -> Vec<vk::ImageCompressionFixedRateFlagsEXT> {
    compression
        .fixed_rate_flags
        .iter()
        .map(|flags| vk::ImageCompressionFixedRateFlagsEXT::from_raw(*flags))
        .collect()
}

fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// [`DeviceDispatch`] over an `ash` device
pub struct VulkanDeviceDispatch {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    external_memory_fd: ash::khr::external_memory_fd::Device,
}

impl VulkanDeviceDispatch {
    /// Wrap an application device
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the device was created from
    /// * `physical_device` - Physical device backing `device`
    /// * `device` - Logical device with the required extensions enabled
    pub fn new(instance: &ash::Instance, physical_device: vk::PhysicalDevice, device: &ash::Device) -> Self {
        Self {
            instance: instance.clone(),
            physical_device,
            external_memory_fd: ash::khr::external_memory_fd::Device::new(instance, device),
            device: device.clone(),
        }
    }

    /// Size of the buffer behind `fd`
    fn dma_buf_size(fd: BorrowedFd<'_>) -> Result<u64> {
        let size = lseek(fd.as_raw_fd(), 0, Whence::SeekEnd)
            .map_err(|errno| wsi_err!("wsi::vulkan", "lseek on DMA-BUF failed: {}", errno))?;
        // Rewind so other importers see the buffer from the start
        if let Err(errno) = lseek(fd.as_raw_fd(), 0, Whence::SeekSet) {
            wsi_warn!("wsi::vulkan", "Rewinding DMA-BUF after size query failed: {}", errno);
        }
        u64::try_from(size).map_err(|_| wsi_err!("wsi::vulkan", "Invalid DMA-BUF size {}", size))
    }
}

impl DeviceDispatch for VulkanDeviceDispatch {
    fn drm_format_modifier_properties(&self, api_format: i32) -> Result<Vec<ModifierProperties>> {
        let format = vk::Format::from_raw(api_format);

        let mut list = vk::DrmFormatModifierPropertiesListEXT::default();
        {
            let mut props = vk::FormatProperties2::default().push_next(&mut list);
            unsafe {
                self.instance
                    .get_physical_device_format_properties2(self.physical_device, format, &mut props)
            };
        }

        let mut modifiers = Vec::new();
        modifiers.try_reserve_exact(list.drm_format_modifier_count as usize)?;
        modifiers.resize(list.drm_format_modifier_count as usize, vk::DrmFormatModifierPropertiesEXT::default());

        let mut list = vk::DrmFormatModifierPropertiesListEXT::default().drm_format_modifier_properties(&mut modifiers);
        {
            let mut props = vk::FormatProperties2::default().push_next(&mut list);
            unsafe {
                self.instance
                    .get_physical_device_format_properties2(self.physical_device, format, &mut props)
            };
        }
        let count = list.drm_format_modifier_count as usize;

        Ok(modifiers
            .iter()
            .take(count)
            .map(|props| ModifierProperties {
                modifier: DrmModifier::from(props.drm_format_modifier),
                plane_count: props.drm_format_modifier_plane_count,
                supports_disjoint: props
                    .drm_format_modifier_tiling_features
                    .contains(vk::FormatFeatureFlags::DISJOINT),
            })
            .collect())
    }

    fn external_image_format_properties(
        &self,
        desc: &ImageDesc,
        modifier: DrmModifier,
        compression: Option<&CompressionControl>,
    ) -> Result<ExternalImageFormatProperties> {
        let (sharing_mode, queue_families) = vk_sharing(&desc.sharing_mode);

        let mut external_info = vk::PhysicalDeviceExternalImageFormatInfo::default()
            .handle_type(vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT);
        let mut modifier_info = vk::PhysicalDeviceImageDrmFormatModifierInfoEXT::default()
            .drm_format_modifier(u64::from(modifier))
            .sharing_mode(sharing_mode)
            .queue_family_indices(queue_families);
        let mut rates = compression.map(fixed_rate_flags).unwrap_or_default();
        let mut compression_info = match compression {
            Some(compression) => Some(
                vk::ImageCompressionControlEXT::default()
                    .flags(vk::ImageCompressionFlagsEXT::from_raw(compression.flags.bits()))
                    .fixed_rate_flags(&mut rates),
            ),
            None => None,
        };

        let mut info = vk::PhysicalDeviceImageFormatInfo2::default()
            .format(vk::Format::from_raw(desc.api_format))
            .ty(vk::ImageType::TYPE_2D)
            .tiling(vk::ImageTiling::DRM_FORMAT_MODIFIER_EXT)
            .usage(vk::ImageUsageFlags::from_raw(desc.usage))
            .flags(vk::ImageCreateFlags::from_raw(desc.flags.bits()))
            .push_next(&mut external_info)
            .push_next(&mut modifier_info);
        if let Some(compression_info) = compression_info.as_mut() {
            info = info.push_next(compression_info);
        }

        let mut external_props = vk::ExternalImageFormatProperties::default();
        let mut props = vk::ImageFormatProperties2::default().push_next(&mut external_props);
        unsafe {
            self.instance
                .get_physical_device_image_format_properties2(self.physical_device, &info, &mut props)
        }
        .map_err(|result| Error::FormatNotSupported(format!("{:?} with {:?}: {:?}", desc.fourcc, modifier, result)))?;

        let limits = props.image_format_properties;
        Ok(ExternalImageFormatProperties {
            max_extent: Extent3D {
                width: limits.max_extent.width,
                height: limits.max_extent.height,
                depth: limits.max_extent.depth,
            },
            max_mip_levels: limits.max_mip_levels,
            max_array_layers: limits.max_array_layers,
            sample_counts: limits.sample_counts.as_raw(),
            external_features: ExternalMemoryFeatures::from_bits_truncate(
                external_props.external_memory_properties.external_memory_features.as_raw(),
            ),
        })
    }

    fn create_image(&self, info: &ImageCreateInfo) -> Result<ImageHandle> {
        let desc = &info.desc;
        let (sharing_mode, queue_families) = vk_sharing(&desc.sharing_mode);

        // The explicit layout lists one entry per memory plane
        let plane_layouts: Vec<vk::SubresourceLayout> = info
            .import
            .plane_layouts
            .iter()
            .take(info.import.memory_plane_count as usize)
            .map(|layout| vk::SubresourceLayout {
                offset: layout.offset,
                size: 0,
                row_pitch: layout.row_pitch,
                array_pitch: 0,
                depth_pitch: 0,
            })
            .collect();

        let mut modifier_info = vk::ImageDrmFormatModifierExplicitCreateInfoEXT::default()
            .drm_format_modifier(u64::from(info.import.modifier))
            .plane_layouts(&plane_layouts);
        let mut external_info =
            vk::ExternalMemoryImageCreateInfo::default().handle_types(vk_handle_type(info.import.handle_type));
        let mut rates = info.compression.as_ref().map(fixed_rate_flags).unwrap_or_default();
        let mut compression_info = match info.compression.as_ref() {
            Some(compression) => Some(
                vk::ImageCompressionControlEXT::default()
                    .flags(vk::ImageCompressionFlagsEXT::from_raw(compression.flags.bits()))
                    .fixed_rate_flags(&mut rates),
            ),
            None => None,
        };

        let mut create_info = vk::ImageCreateInfo::default()
            .flags(vk::ImageCreateFlags::from_raw(desc.flags.bits()))
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::from_raw(desc.api_format))
            .extent(vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: desc.extent.depth })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::from_raw(desc.samples))
            .tiling(vk::ImageTiling::DRM_FORMAT_MODIFIER_EXT)
            .usage(vk::ImageUsageFlags::from_raw(desc.usage))
            .sharing_mode(sharing_mode)
            .queue_family_indices(queue_families)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .push_next(&mut modifier_info)
            .push_next(&mut external_info);
        if let Some(compression_info) = compression_info.as_mut() {
            create_info = create_info.push_next(compression_info);
        }

        let image = unsafe { self.device.create_image(&create_info, None) }
            .map_err(|result| vk_error("vkCreateImage", result))?;
        Ok(ImageHandle(image.as_raw()))
    }

    fn destroy_image(&self, image: ImageHandle) {
        unsafe { self.device.destroy_image(vk::Image::from_raw(image.0), None) };
    }

    fn import_memory_fd(&self, fd: BorrowedFd<'_>, handle_type: ExternalMemoryHandleType) -> Result<MemoryHandle> {
        let handle_type = vk_handle_type(handle_type);

        let mut fd_props = vk::MemoryFdPropertiesKHR::default();
        unsafe {
            self.external_memory_fd
                .get_memory_fd_properties(handle_type, fd.as_raw_fd(), &mut fd_props)
        }
        .map_err(|result| vk_error("vkGetMemoryFdPropertiesKHR", result))?;
        if fd_props.memory_type_bits == 0 {
            return Err(wsi_err!("wsi::vulkan", "No memory type can import the DMA-BUF"));
        }

        let size = Self::dma_buf_size(fd)?;

        // A successful import transfers ownership of the descriptor to the driver
        let import_fd = dup(fd.as_raw_fd())
            .map_err(|errno| wsi_err!("wsi::vulkan", "dup of DMA-BUF failed: {}", errno))?;
        let mut import_info = vk::ImportMemoryFdInfoKHR::default().handle_type(handle_type).fd(import_fd);
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(fd_props.memory_type_bits.trailing_zeros())
            .push_next(&mut import_info);

        match unsafe { self.device.allocate_memory(&allocate_info, None) } {
            Ok(memory) => Ok(MemoryHandle(memory.as_raw())),
            Err(result) => {
                let _ = close(import_fd);
                Err(vk_error("vkAllocateMemory", result))
            }
        }
    }

    fn bind_image_memory(&self, image: ImageHandle, bindings: &[MemoryBinding]) -> Result<()> {
        let mut plane_infos: Vec<vk::BindImagePlaneMemoryInfo> = bindings
            .iter()
            .map(|binding| {
                vk::BindImagePlaneMemoryInfo::default().plane_aspect(memory_plane_aspect(binding.plane.unwrap_or(0)))
            })
            .collect();

        let infos: Vec<vk::BindImageMemoryInfo> = bindings
            .iter()
            .zip(plane_infos.iter_mut())
            .map(|(binding, plane_info)| {
                let info = vk::BindImageMemoryInfo::default()
                    .image(vk::Image::from_raw(image.0))
                    .memory(vk::DeviceMemory::from_raw(binding.memory.0))
                    .memory_offset(binding.offset);
                if binding.plane.is_some() {
                    info.push_next(plane_info)
                } else {
                    info
                }
            })
            .collect();

        unsafe { self.device.bind_image_memory2(&infos) }.map_err(|result| vk_error("vkBindImageMemory2", result))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        unsafe { self.device.free_memory(vk::DeviceMemory::from_raw(memory.0), None) };
    }

    fn create_fence(&self) -> Result<FenceHandle> {
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|result| vk_error("vkCreateFence", result))?;
        Ok(FenceHandle(fence.as_raw()))
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<()> {
        unsafe { self.device.reset_fences(&[vk::Fence::from_raw(fence.0)]) }
            .map_err(|result| vk_error("vkResetFences", result))
    }

    fn submit_fence_payload(
        &self,
        queue: QueueHandle,
        wait_semaphores: &[SemaphoreHandle],
        fence: FenceHandle,
    ) -> Result<()> {
        let semaphores: Vec<vk::Semaphore> =
            wait_semaphores.iter().map(|semaphore| vk::Semaphore::from_raw(semaphore.0)).collect();
        let stages = vec![vk::PipelineStageFlags::BOTTOM_OF_PIPE; semaphores.len()];
        let submit = vk::SubmitInfo::default().wait_semaphores(&semaphores).wait_dst_stage_mask(&stages);

        unsafe {
            self.device
                .queue_submit(vk::Queue::from_raw(queue.0), &[submit], vk::Fence::from_raw(fence.0))
        }
        .map_err(|result| vk_error("vkQueueSubmit", result))
    }

    fn wait_fence(&self, fence: FenceHandle, timeout: Duration) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[vk::Fence::from_raw(fence.0)], true, timeout_nanos(timeout))
        }
        .map_err(|result| vk_error("vkWaitForFences", result))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(vk::Fence::from_raw(fence.0), None) };
    }
}

#[cfg(test)]
#[path = "vulkan_dispatch_tests.rs"]
mod tests;
