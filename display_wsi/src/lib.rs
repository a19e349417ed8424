/*!
# Display WSI

Direct-to-display presentation engine for a Vulkan window-system-integration
layer.

This crate holds the platform-agnostic core: it negotiates a buffer format and
modifier the GPU and the display controller both accept, allocates shared
DMA-BUF buffers, imports them as device images, wraps them in kernel
framebuffers and drives mode-setting and page flips. Hardware access goes
through traits so the core runs against mocks in tests; the
`display_wsi_vulkan` crate provides the `ash` and DRM implementations.

## Architecture

- **Layer**: process-wide display singleton and logger
- **DrmDisplay / KmsDevice**: the connected output and its kernel device
- **PresentScheduler**: mode-set, page flip and the flip event pump
- **BufferAllocator**: shared-buffer allocation contract
- **DeviceDispatch**: graphics device function table
- **DisplaySwapchain**: per-swapchain image creation, binding and presentation
*/

// Internal modules
mod error;
mod layer;
pub mod log;
pub mod display;
pub mod allocator;
pub mod swapchain;

#[cfg(test)]
pub(crate) mod mock_display;

// Main wsi namespace module
pub mod wsi {
    // Error types
    pub use crate::error::{Error, Result};

    // Process-wide state
    pub use crate::layer::Layer;

    // Logging sub-module (types only, macros are exported at the crate root)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger, parse_debug_level, DEBUG_LEVEL_ENV, DEFAULT_DEBUG_LEVEL};
    }

    // Display sub-module
    pub mod display {
        pub use crate::display::*;
    }

    // Allocator sub-module
    pub mod allocator {
        pub use crate::allocator::*;
    }

    // Swapchain sub-module
    pub mod swapchain {
        pub use crate::swapchain::*;
    }
}

// Re-export the fourcc types used throughout the public API
pub use drm_fourcc;
