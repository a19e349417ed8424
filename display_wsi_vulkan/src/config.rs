/// Backend configuration

use std::path::PathBuf;

/// Where and how to open the display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    /// DRM card node
    pub device_path: PathBuf,
    /// Mode to program as (width, height, refresh in Hz). `None` selects the
    /// connector's preferred mode, or its first mode if none is preferred.
    pub preferred_mode: Option<(u16, u16, Option<u32>)>,
    /// DMA-BUF heap under `/dev/dma_heap/` used for swapchain buffers
    pub heap_name: String,
    /// Heap for protected buffers, if the platform has one
    pub protected_heap_name: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/dri/card0"),
            preferred_mode: None,
            heap_name: "system".to_string(),
            protected_heap_name: None,
        }
    }
}
