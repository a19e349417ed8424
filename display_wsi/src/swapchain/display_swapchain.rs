/// Direct-to-display swapchain backend
///
/// Implements the platform side of a swapchain presenting straight to a DRM
/// output. The lifecycle manager ([`SwapchainOwner`]) owns the image array
/// and calls in here to create, bind, present and destroy images.
///
/// Per-image backend state lives in a typed map keyed by image index. Image
/// teardown happens in two steps: the image is marked invalid under the
/// status lock, then its device and kernel resources are released without
/// holding it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use drm_fourcc::DrmFormat;
use rustc_hash::FxHashMap;

use crate::allocator::{allocate_buffers, check_allocator_version, AllocFormat, AllocateFlags, BufferAllocator};
use crate::display::{create_framebuffer, destroy_framebuffer, FramebufferId, PresentScheduler, PresentState};
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::swapchain::{
    surface_compatible_formats, DeviceDispatch, ExternalMemory, ImageCreateFlags, ImageCreateInfo, ImageDesc,
    ImageHandle, ImageStatus, PresentFence, QueueHandle, SemaphoreHandle, SwapchainConfig, SwapchainOwner,
};

/// A present request handed over by the presentation thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPresent {
    pub image_index: u32,
    /// Application present id, if one was supplied
    pub present_id: Option<u64>,
}

/// Creation parameters shared by every image of a swapchain
///
/// Negotiated with the first image and reused unchanged for the others.
#[derive(Debug, Clone)]
pub struct ImageCreationParameters {
    pub create_info: ImageCreateInfo,
    pub allocated_format: AllocFormat,
}

/// Backend state of one swapchain image
struct DisplayImageData {
    external_memory: ExternalMemory,
    framebuffer: Option<FramebufferId>,
    present_fence: Option<Arc<Mutex<PresentFence>>>,
}

impl DisplayImageData {
    fn new(dispatch: Arc<dyn DeviceDispatch>) -> Self {
        Self { external_memory: ExternalMemory::new(dispatch), framebuffer: None, present_fence: None }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn display_unavailable() -> Error {
    crate::wsi_error!("wsi::swapchain", "DRM display not available");
    Error::InitializationFailed("DRM display not available".to_string())
}

/// Swapchain presenting directly to the process-wide DRM display
pub struct DisplaySwapchain {
    dispatch: Arc<dyn DeviceDispatch>,
    allocator: Mutex<Box<dyn BufferAllocator>>,
    owner: Arc<dyn SwapchainOwner>,
    config: SwapchainConfig,
    creation_parameters: Mutex<Option<ImageCreationParameters>>,
    image_data: Mutex<FxHashMap<u32, DisplayImageData>>,
    scheduler: Mutex<PresentScheduler>,
    last_present_id: AtomicU64,
}

impl DisplaySwapchain {
    /// Initialize the platform side of a swapchain
    ///
    /// # Arguments
    ///
    /// * `dispatch` - Device function table
    /// * `allocator` - Buffer allocator, owned by this swapchain until it is dropped
    /// * `owner` - Lifecycle manager holding the image array
    /// * `config` - Present-id and compression settings
    ///
    /// # Errors
    ///
    /// Returns `InitializationFailed` if the allocator interface version does not match.
    pub fn new(
        dispatch: Arc<dyn DeviceDispatch>,
        allocator: Box<dyn BufferAllocator>,
        owner: Arc<dyn SwapchainOwner>,
        config: SwapchainConfig,
    ) -> Result<Self> {
        check_allocator_version(allocator.as_ref())?;

        crate::wsi_debug!(
            "wsi::swapchain",
            "Display swapchain created ({} images, present id {})",
            owner.images().len(),
            if config.present_id_enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            dispatch,
            allocator: Mutex::new(allocator),
            owner,
            config,
            creation_parameters: Mutex::new(None),
            image_data: Mutex::new(FxHashMap::default()),
            scheduler: Mutex::new(PresentScheduler::new()),
            last_present_id: AtomicU64::new(0),
        })
    }

    fn allocation_flags(&self, desc: &ImageDesc, layout_only: bool) -> AllocateFlags {
        let mut flags = AllocateFlags::empty();
        if desc.flags.contains(ImageCreateFlags::PROTECTED) {
            flags |= AllocateFlags::PROTECTED;
        }
        if layout_only {
            flags |= AllocateFlags::NO_MEMORY;
        }
        if self.config.compression.as_ref().is_some_and(|c| c.wants_highest_fixed_rate()) {
            flags |= AllocateFlags::HIGHEST_FIXED_RATE_COMPRESSION;
        }
        flags
    }

    /// Negotiate format, modifier and plane layout with the first image
    fn negotiate_image_parameters(
        &self,
        desc: &ImageDesc,
        data: &mut DisplayImageData,
    ) -> Result<ImageCreationParameters> {
        let display = Layer::display().ok_or_else(display_unavailable)?;

        let compatible = surface_compatible_formats(
            self.dispatch.as_ref(),
            &display,
            desc,
            self.config.compression.as_ref(),
        )?;

        // Import support is mandatory: buffers always come from the allocator
        if compatible.importable.is_empty() {
            crate::wsi_error!("wsi::swapchain", "Export/Import not supported for {:?}", desc.fourcc);
            return Err(Error::InitializationFailed(format!(
                "no importable modifier in common with the display for {:?}",
                desc.fourcc
            )));
        }

        let allocation = allocate_buffers(
            lock(&self.allocator).as_ref(),
            &compatible.importable,
            desc.extent.width,
            desc.extent.height,
            self.allocation_flags(desc, true),
        )?;
        let allocated_format = allocation.result.format;
        data.external_memory.set_allocation(&allocation);

        if let Some(prop) = compatible
            .modifier_properties
            .iter()
            .find(|prop| prop.modifier == allocated_format.modifier)
        {
            data.external_memory.set_num_memories(prop.plane_count);
        }

        let mut desc = desc.clone();
        if data.external_memory.is_disjoint() {
            desc.flags |= ImageCreateFlags::DISJOINT;
        }
        let import = data.external_memory.image_import_info(allocated_format.modifier)?;

        crate::wsi_info!(
            "wsi::swapchain",
            "Negotiated {:?} with modifier {:?} ({} planes, {} memories)",
            allocated_format.fourcc,
            allocated_format.modifier,
            data.external_memory.num_planes(),
            data.external_memory.num_memories()
        );

        Ok(ImageCreationParameters {
            create_info: ImageCreateInfo { desc, import, compression: self.config.compression.clone() },
            allocated_format,
        })
    }

    /// Error to report when the swapchain is already lost
    ///
    /// The loss is sticky whether it came from a kernel call in the scheduler
    /// or was recorded on the owner directly.
    fn lost_error(&self) -> Option<Error> {
        if let Some(err) = self.owner.error_state() {
            return Some(err);
        }
        (lock(&self.scheduler).state() == PresentState::Error)
            .then(|| Error::SurfaceLost("swapchain is lost".to_string()))
    }

    /// Mark the swapchain lost in both the scheduler and the owner
    fn lose(&self, err: Error) {
        lock(&self.scheduler).mark_lost();
        self.owner.set_error_state(err);
    }

    /// Take the backend data of image `index` out of the map
    ///
    /// Hardware work on an image runs on the detached data so the map lock
    /// is never held across kernel or device calls.
    fn detach_image_data(&self, index: u32) -> Option<DisplayImageData> {
        lock(&self.image_data).remove(&index)
    }

    fn attach_image_data(&self, index: u32, data: DisplayImageData) -> Result<()> {
        let mut image_data = lock(&self.image_data);
        image_data.try_reserve(1)?;
        image_data.insert(index, data);
        Ok(())
    }

    /// Create the device image of slot `index`
    ///
    /// The first call negotiates the creation parameters for the whole
    /// swapchain; later calls reuse them.
    ///
    /// # Errors
    ///
    /// `SurfaceLost` once the swapchain is lost, `InitializationFailed` if the
    /// index is outside the image array, no modifier can be imported or the
    /// display is unavailable, `FormatNotSupported`/`OutOfHostMemory` from
    /// the allocator, or the device error from image creation.
    pub fn create_swapchain_image(&self, desc: &ImageDesc, index: u32) -> Result<ImageHandle> {
        if let Some(err) = self.lost_error() {
            return Err(err);
        }
        let images = self.owner.images();
        if index as usize >= images.len() {
            crate::wsi_error!("wsi::swapchain", "Image index {} out of range ({} images)", index, images.len());
            return Err(Error::InitializationFailed(format!("image index {} out of range", index)));
        }

        let create_info = {
            let mut parameters = lock(&self.creation_parameters);
            if parameters.is_none() {
                let mut data = self
                    .detach_image_data(index)
                    .unwrap_or_else(|| DisplayImageData::new(self.dispatch.clone()));
                let negotiated = self.negotiate_image_parameters(desc, &mut data);
                self.attach_image_data(index, data)?;
                *parameters = Some(negotiated?);
            } else {
                let mut image_data = lock(&self.image_data);
                image_data.try_reserve(1)?;
                image_data
                    .entry(index)
                    .or_insert_with(|| DisplayImageData::new(self.dispatch.clone()));
            }
            match parameters.as_ref() {
                Some(parameters) => parameters.create_info.clone(),
                None => return Err(Error::InitializationFailed("no image creation parameters".to_string())),
            }
        };

        let handle = self.dispatch.create_image(&create_info)?;
        if !images.set_image_handle(index, handle) {
            self.dispatch.destroy_image(handle);
            return Err(Error::InitializationFailed(format!("image index {} out of range", index)));
        }
        Ok(handle)
    }

    /// Allocate the buffers of image `index`, build its framebuffer and bind its memory
    ///
    /// # Errors
    ///
    /// `SurfaceLost` once the swapchain is lost, `FormatNotSupported`/
    /// `OutOfHostMemory` from the allocator, `InitializationFailed` if the
    /// framebuffer cannot be created, or the device error from memory import
    /// and binding.
    pub fn allocate_and_bind_swapchain_image(&self, index: u32) -> Result<()> {
        if let Some(err) = self.lost_error() {
            return Err(err);
        }
        let images = self.owner.images();
        images.set_status(index, ImageStatus::Free);
        let image = images.image_handle(index).ok_or_else(|| {
            crate::wsi_error!("wsi::swapchain", "Image {} was never created", index);
            Error::InitializationFailed(format!("image {} was never created", index))
        })?;

        let mut data = self
            .detach_image_data(index)
            .ok_or_else(|| Error::InitializationFailed(format!("image {} has no backend data", index)))?;
        let result = self.allocate_and_bind(index, image, &mut data);
        // Reattach on failure too so destroy_image releases what was built
        let attached = self.attach_image_data(index, data);
        result.and(attached)
    }

    fn allocate_and_bind(&self, index: u32, image: ImageHandle, data: &mut DisplayImageData) -> Result<()> {
        let (extent, format) = {
            let mut parameters = lock(&self.creation_parameters);
            let parameters = parameters
                .as_mut()
                .ok_or_else(|| Error::InitializationFailed("no image creation parameters".to_string()))?;

            let mut formats = Vec::new();
            formats.try_reserve_exact(1)?;
            formats.push(parameters.allocated_format);

            let desc = &parameters.create_info.desc;
            let allocation = allocate_buffers(
                lock(&self.allocator).as_ref(),
                &formats,
                desc.extent.width,
                desc.extent.height,
                self.allocation_flags(desc, false),
            )
            .map_err(|err| {
                crate::wsi_error!("wsi::swapchain", "Failed to allocate image {}: {}", index, err);
                err
            })?;
            parameters.allocated_format = allocation.result.format;
            data.external_memory.set_allocation(&allocation);
            (desc.extent, parameters.allocated_format)
        };

        let display = Layer::display().ok_or_else(display_unavailable)?;
        let drm_format = DrmFormat { code: format.fourcc, modifier: format.modifier };
        let framebuffer =
            create_framebuffer(&display, extent.width, extent.height, &drm_format, &data.external_memory)?;
        data.framebuffer = Some(framebuffer);

        data.external_memory.import_memory_and_bind(image).map_err(|err| {
            crate::wsi_error!("wsi::swapchain", "Failed to import memory and bind image {}: {}", index, err);
            err
        })?;

        let fence = PresentFence::new(self.dispatch.clone()).map_err(|err| {
            crate::wsi_error!("wsi::swapchain", "Failed to create present fence: {}", err);
            Error::OutOfHostMemory
        })?;
        data.present_fence = Some(Arc::new(Mutex::new(fence)));

        crate::wsi_trace!("wsi::swapchain", "Image {} bound to framebuffer {}", index, framebuffer.0);
        Ok(())
    }

    /// Bind an application-created image to the memory of swapchain image `index`
    pub fn bind_swapchain_image(&self, image: ImageHandle, index: u32) -> Result<()> {
        let image_data = lock(&self.image_data);
        let data = image_data
            .get(&index)
            .ok_or_else(|| Error::InitializationFailed(format!("image {} has no backend data", index)))?;
        data.external_memory.bind_swapchain_image_memory(image)
    }

    /// Put image `request.image_index` on screen
    ///
    /// Blocks until the display has switched to the image. Failures do not
    /// return: they set the owner's sticky error state.
    pub fn present_image(&self, request: &PendingPresent) {
        if let Some(err) = self.lost_error() {
            crate::wsi_debug!("wsi::swapchain", "Dropping present of image {}: {}", request.image_index, err);
            if self.owner.error_state().is_none() {
                self.owner.set_error_state(err);
            }
            return;
        }

        let Some(display) = Layer::display() else {
            crate::wsi_error!("wsi::swapchain", "DRM display not available for present");
            self.lose(Error::SurfaceLost("DRM display not available".to_string()));
            return;
        };

        let framebuffer = lock(&self.image_data)
            .get(&request.image_index)
            .and_then(|data| data.framebuffer);
        let Some(framebuffer) = framebuffer else {
            crate::wsi_error!("wsi::swapchain", "Image {} has no framebuffer", request.image_index);
            self.lose(Error::SurfaceLost(format!("image {} has no framebuffer", request.image_index)));
            return;
        };

        let first_present = {
            let mut scheduler = lock(&self.scheduler);
            let first_present = scheduler.state() == PresentState::NeverPresented;
            if let Err(err) = scheduler.present(&display, framebuffer) {
                self.owner.set_error_state(err);
                return;
            }
            first_present
        };

        let previous = self.owner.images().mark_presented(request.image_index);
        if !first_present && previous.is_none() {
            crate::wsi_error!("wsi::swapchain", "No image was on screen before presenting {}", request.image_index);
        }
        debug_assert!(first_present || previous.is_some());

        if self.config.present_id_enabled {
            if let Some(present_id) = request.present_id {
                self.last_present_id.store(present_id, Ordering::Release);
            }
        }

        if let Some(previous) = previous {
            self.owner.unpresent_image(previous);
        }
    }

    fn present_fence(&self, index: u32) -> Result<Arc<Mutex<PresentFence>>> {
        lock(&self.image_data)
            .get(&index)
            .and_then(|data| data.present_fence.clone())
            .ok_or_else(|| crate::wsi_err!("wsi::swapchain", "Image {} has no present fence", index))
    }

    /// Arm the present fence of image `index` behind `wait_semaphores`
    pub fn set_present_payload(
        &self,
        index: u32,
        queue: QueueHandle,
        wait_semaphores: &[SemaphoreHandle],
    ) -> Result<()> {
        let fence = self.present_fence(index)?;
        let mut fence = lock(&fence);
        fence.set_payload(queue, wait_semaphores)
    }

    /// Wait for the GPU work of the last present of image `index`
    ///
    /// # Errors
    ///
    /// `Timeout` if the work is not done within `timeout`.
    pub fn wait_present(&self, index: u32, timeout: Duration) -> Result<()> {
        let fence = self.present_fence(index)?;
        let mut fence = lock(&fence);
        fence.wait_payload(timeout)
    }

    /// Destroy image `index` and release its buffers and framebuffer
    ///
    /// Destroying an image twice is a no-op.
    pub fn destroy_image(&self, index: u32) {
        if let Some(Some(handle)) = self.owner.images().mark_invalid(index) {
            self.dispatch.destroy_image(handle);
        }

        let data = lock(&self.image_data).remove(&index);
        if let Some(mut data) = data {
            match Layer::display() {
                Some(display) => destroy_framebuffer(&display, &mut data.framebuffer),
                None => {
                    if let Some(framebuffer) = data.framebuffer.take() {
                        crate::wsi_warn!(
                            "wsi::swapchain",
                            "DRM display gone, framebuffer {} of image {} not removed",
                            framebuffer.0,
                            index
                        );
                    }
                }
            }
        }
    }

    pub fn present_state(&self) -> PresentState {
        lock(&self.scheduler).state()
    }

    /// Id of the last completed present, when present ids are enabled
    pub fn last_present_id(&self) -> Option<u64> {
        match self.last_present_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn image_creation_parameters(&self) -> Option<ImageCreationParameters> {
        lock(&self.creation_parameters).clone()
    }

    /// Kernel framebuffer of image `index`, if it has one
    pub fn framebuffer(&self, index: u32) -> Option<FramebufferId> {
        lock(&self.image_data).get(&index).and_then(|data| data.framebuffer)
    }
}

impl Drop for DisplaySwapchain {
    fn drop(&mut self) {
        let mut indices: Vec<u32> = (0..self.owner.images().len() as u32).collect();
        indices.extend(lock(&self.image_data).keys().copied().filter(|index| {
            *index as usize >= self.owner.images().len()
        }));
        for index in indices {
            self.destroy_image(index);
        }
    }
}

#[cfg(test)]
#[path = "display_swapchain_tests.rs"]
mod tests;
