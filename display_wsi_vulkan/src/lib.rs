/*!
# Display WSI - Vulkan/DRM Backend

Hardware implementations of the `display_wsi` traits.

This crate drives a real DRM card node through the `drm` crate, allocates
swapchain buffers from a DMA-BUF heap and imports them into an application
Vulkan device through `ash`.

- **open_display**: discovers the connected output and builds the `DrmDisplay`
- **DrmKmsDevice**: `KmsDevice` over a DRM card (framebuffers, mode-set, page flips)
- **DmaHeapAllocator**: `BufferAllocator` over `/dev/dma_heap/<name>`
- **VulkanDeviceDispatch**: `DeviceDispatch` over `ash`
*/

mod config;
mod vulkan_format;
mod vulkan_dispatch;
mod drm_device;
mod dma_heap_allocator;

use std::sync::Arc;
use display_wsi::wsi::display::DrmDisplay;
use display_wsi::wsi::{Layer, Result};

pub use config::DisplayConfig;
pub use vulkan_dispatch::VulkanDeviceDispatch;
pub use drm_device::{open_display, DrmCard, DrmKmsDevice};
pub use dma_heap_allocator::DmaHeapAllocator;
pub use vulkan_format::{drm_to_vk_format, drm_to_vk_srgb_format, vk_to_drm_format};

/// Get the process-wide display, opening it from `config` on first use
///
/// # Example
///
/// ```no_run
/// use display_wsi_vulkan::{init_display, DisplayConfig};
///
/// let display = init_display(&DisplayConfig::default())?;
/// println!("Scanning out on CRTC {}", display.crtc_id().0);
/// # Ok::<(), display_wsi::wsi::Error>(())
/// ```
pub fn init_display(config: &DisplayConfig) -> Result<Arc<DrmDisplay>> {
    Layer::display_or_init(|| open_display(config))
}

/// Build the allocator configured in `config`
pub fn open_allocator(config: &DisplayConfig) -> Result<DmaHeapAllocator> {
    DmaHeapAllocator::new(&config.heap_name, config.protected_heap_name.as_deref())
}
