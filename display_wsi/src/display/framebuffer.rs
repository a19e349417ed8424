/// Kernel framebuffer manager
///
/// Turns the per-plane DMA-BUF descriptors of a swapchain image into a kernel
/// framebuffer object the display controller can scan out.

use std::os::fd::AsFd;
use drm_fourcc::DrmFormat;

use crate::display::{DrmDisplay, FramebufferDesc, FramebufferId, GemHandle, KmsDevice, MAX_FB_PLANES};
use crate::error::{Error, Result};
use crate::swapchain::ExternalMemory;

/// GEM handles imported for one framebuffer, closed when dropped
///
/// The kernel keeps its own reference to the buffers once the framebuffer
/// exists, so the handles are only needed during creation.
struct GemHandles<'a> {
    device: &'a dyn KmsDevice,
    handles: [Option<GemHandle>; MAX_FB_PLANES],
}

impl<'a> GemHandles<'a> {
    fn new(device: &'a dyn KmsDevice) -> Self {
        Self { device, handles: [None; MAX_FB_PLANES] }
    }
}

impl Drop for GemHandles<'_> {
    fn drop(&mut self) {
        for (plane, handle) in self.handles.iter().enumerate() {
            let Some(handle) = *handle else { continue };
            // Planes sharing one buffer resolve to the same handle
            if self.handles[..plane].contains(&Some(handle)) {
                continue;
            }
            if let Err(err) = self.device.close_gem_handle(handle) {
                crate::wsi_warn!("wsi::display", "Failed to close GEM handle {}: {}", handle.0, err);
            }
        }
    }
}

/// Create a kernel framebuffer for an allocated swapchain image
///
/// Every plane descriptor is converted to a GEM handle first, then the format
/// is checked against the formats the display advertises. The per-plane
/// modifier path is used when the display supports it.
///
/// # Errors
///
/// Returns `InitializationFailed` if a handle conversion fails, the format is
/// not supported by the display, or the kernel rejects the framebuffer.
pub fn create_framebuffer(
    display: &DrmDisplay,
    width: u32,
    height: u32,
    format: &DrmFormat,
    memory: &ExternalMemory,
) -> Result<FramebufferId> {
    let device = display.device();
    let mut gem_handles = GemHandles::new(device);
    let mut pitches = [0u32; MAX_FB_PLANES];

    let num_planes = (memory.num_planes() as usize).min(MAX_FB_PLANES);
    for plane in 0..num_planes {
        debug_assert!(memory.strides()[plane] > 0);
        pitches[plane] = memory.strides()[plane];

        let Some(fd) = memory.buffer_fds()[plane].as_ref() else {
            crate::wsi_error!("wsi::display", "Plane {} has no buffer to convert to a GEM handle", plane);
            return Err(Error::InitializationFailed(format!("plane {} has no buffer", plane)));
        };
        match device.prime_fd_to_handle(fd.as_fd()) {
            Ok(handle) => gem_handles.handles[plane] = Some(handle),
            Err(err) => {
                crate::wsi_error!("wsi::display", "Failed to convert buffer FD to GEM handle: {}", err);
                return Err(Error::InitializationFailed(format!(
                    "failed to convert buffer FD to GEM handle: {}",
                    err
                )));
            }
        }
    }

    if !display.is_format_supported(format) {
        crate::wsi_error!("wsi::display", "Format not supported: {:?}", format);
        return Err(Error::InitializationFailed(format!(
            "format {:?} is not supported by the display",
            format
        )));
    }

    let desc = FramebufferDesc {
        width,
        height,
        fourcc: format.code,
        modifier: format.modifier,
        handles: gem_handles.handles,
        pitches,
        offsets: *memory.offsets(),
    };

    device.add_framebuffer(&desc, display.supports_fb_modifiers()).map_err(|err| {
        crate::wsi_error!("wsi::display", "Failed to create framebuffer: {}", err);
        Error::InitializationFailed(format!("failed to create framebuffer: {}", err))
    })
}

/// Remove a kernel framebuffer, leaving `framebuffer` as `None`
///
/// Does nothing when no framebuffer was ever created.
pub fn destroy_framebuffer(display: &DrmDisplay, framebuffer: &mut Option<FramebufferId>) {
    if let Some(id) = framebuffer.take() {
        if let Err(err) = display.device().remove_framebuffer(id) {
            crate::wsi_error!("wsi::display", "drmModeRmFB({}) failed: {}", id.0, err);
        }
    }
}

#[cfg(test)]
#[path = "framebuffer_tests.rs"]
mod tests;
