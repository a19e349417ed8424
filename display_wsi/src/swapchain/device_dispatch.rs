/// Device dispatch contract
///
/// The graphics-API calls the presentation engine needs, expressed as a
/// function table over opaque handles. The Vulkan backend implements it over
/// `ash`; tests implement it with a recording mock.

use std::os::fd::BorrowedFd;
use std::time::Duration;
use bitflags::bitflags;
use drm_fourcc::{DrmFourcc, DrmModifier};

use crate::error::Result;
use crate::swapchain::CompressionControl;

/// Graphics-API image handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u64);

/// Graphics-API device memory handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle(pub u64);

/// Graphics-API fence handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

/// Graphics-API queue handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u64);

/// Graphics-API semaphore handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub u64);

bitflags! {
    /// Image creation flags (values of VkImageCreateFlagBits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageCreateFlags: u32 {
        const MUTABLE_FORMAT = 0x8;
        const EXTENDED_USAGE = 0x100;
        const DISJOINT = 0x200;
        const PROTECTED = 0x800;
    }
}

bitflags! {
    /// External memory features (values of VkExternalMemoryFeatureFlagBits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExternalMemoryFeatures: u32 {
        const DEDICATED_ONLY = 0x1;
        const EXPORTABLE = 0x2;
        const IMPORTABLE = 0x4;
    }
}

/// External memory handle type of swapchain buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExternalMemoryHandleType {
    #[default]
    DmaBuf,
}

/// Image sharing mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SharingMode {
    #[default]
    Exclusive,
    Concurrent(Vec<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Requested swapchain image parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDesc {
    /// Graphics-API format value
    pub api_format: i32,
    /// DRM fourcc equivalent of `api_format`
    pub fourcc: DrmFourcc,
    pub extent: Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// Sample count bits
    pub samples: u32,
    pub usage: u32,
    pub flags: ImageCreateFlags,
    pub sharing_mode: SharingMode,
}

/// Format modifier advertised by the device for one format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierProperties {
    pub modifier: DrmModifier,
    /// Memory planes an image with this modifier binds
    pub plane_count: u32,
    /// Whether the DISJOINT tiling feature is reported
    pub supports_disjoint: bool,
}

/// Limits and external-memory features for a format/modifier combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExternalImageFormatProperties {
    pub max_extent: Extent3D,
    pub max_mip_levels: u32,
    pub max_array_layers: u32,
    pub sample_counts: u32,
    pub external_features: ExternalMemoryFeatures,
}

/// Placement of one plane inside its memory object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubresourceLayout {
    pub offset: u64,
    pub row_pitch: u64,
}

/// Explicit-modifier import chain of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageImportInfo {
    pub modifier: DrmModifier,
    /// One entry per format plane
    pub plane_layouts: Vec<SubresourceLayout>,
    /// Memory planes the image binds (the modifier plane count)
    pub memory_plane_count: u32,
    pub handle_type: ExternalMemoryHandleType,
}

/// Everything needed to create a swapchain image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCreateInfo {
    pub desc: ImageDesc,
    pub import: ImageImportInfo,
    pub compression: Option<CompressionControl>,
}

/// One memory binding; `plane` is set for disjoint images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBinding {
    pub memory: MemoryHandle,
    pub offset: u64,
    pub plane: Option<u32>,
}

/// Graphics device operations used by the presentation engine
pub trait DeviceDispatch: Send + Sync {
    /// Modifiers the device supports for `api_format`
    fn drm_format_modifier_properties(&self, api_format: i32) -> Result<Vec<ModifierProperties>>;

    /// Capabilities of `desc` with `modifier` when backed by external memory
    ///
    /// An error means the combination is unsupported.
    fn external_image_format_properties(
        &self,
        desc: &ImageDesc,
        modifier: DrmModifier,
        compression: Option<&CompressionControl>,
    ) -> Result<ExternalImageFormatProperties>;

    fn create_image(&self, info: &ImageCreateInfo) -> Result<ImageHandle>;

    fn destroy_image(&self, image: ImageHandle);

    /// Import a buffer descriptor as device memory
    ///
    /// `fd` stays owned by the caller.
    fn import_memory_fd(&self, fd: BorrowedFd<'_>, handle_type: ExternalMemoryHandleType) -> Result<MemoryHandle>;

    fn bind_image_memory(&self, image: ImageHandle, bindings: &[MemoryBinding]) -> Result<()>;

    fn free_memory(&self, memory: MemoryHandle);

    fn create_fence(&self) -> Result<FenceHandle>;

    fn reset_fence(&self, fence: FenceHandle) -> Result<()>;

    /// Submit an empty batch that waits on `wait_semaphores` and signals `fence`
    fn submit_fence_payload(
        &self,
        queue: QueueHandle,
        wait_semaphores: &[SemaphoreHandle],
        fence: FenceHandle,
    ) -> Result<()>;

    /// Wait for `fence`; `Error::Timeout` if it is not signaled in time
    fn wait_fence(&self, fence: FenceHandle, timeout: Duration) -> Result<()>;

    fn destroy_fence(&self, fence: FenceHandle);
}
