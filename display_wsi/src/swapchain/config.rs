/// Swapchain configuration

use bitflags::bitflags;

bitflags! {
    /// Image compression request (values of VkImageCompressionFlagBitsEXT)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CompressionFlags: u32 {
        const DEFAULT = 0;
        const FIXED_RATE_DEFAULT = 0x1;
        const FIXED_RATE_EXPLICIT = 0x2;
        const DISABLED = 0x4;
    }
}

/// Compression control requested at swapchain creation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressionControl {
    pub flags: CompressionFlags,
    /// Per-plane fixed-rate masks, only meaningful with `FIXED_RATE_EXPLICIT`
    pub fixed_rate_flags: Vec<u32>,
}

impl CompressionControl {
    /// Whether the allocator should pick the highest fixed-rate compression
    pub fn wants_highest_fixed_rate(&self) -> bool {
        self.flags.contains(CompressionFlags::FIXED_RATE_EXPLICIT)
    }
}

/// Swapchain configuration
#[derive(Debug, Clone, Default)]
pub struct SwapchainConfig {
    /// Record the id of each completed present
    pub present_id_enabled: bool,
    /// Compression control forwarded to capability queries and allocation
    pub compression: Option<CompressionControl>,
}
