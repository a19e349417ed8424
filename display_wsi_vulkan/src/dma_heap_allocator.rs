/// DMA-BUF heap buffer allocator
///
/// Allocates swapchain buffers from a Linux DMA-BUF heap
/// (`/dev/dma_heap/<name>`). Only linear, single-plane formats are handled:
/// the row stride is the packed row size rounded up to 64 bytes and the
/// whole image lives in one buffer.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use display_wsi::drm_fourcc::DrmModifier;
use display_wsi::wsi::allocator::{
    AllocError, AllocFormat, AllocateFlags, AllocateInfo, AllocationResult, BufferAllocator,
    ALLOCATOR_INTERFACE_VERSION,
};
use display_wsi::wsi::display::{fourcc_plane_count, MAX_FB_PLANES};
use display_wsi::wsi::{Error, Result};
use display_wsi::{wsi_debug, wsi_error};
use nix::fcntl::OFlag;

use crate::vulkan_format::fourcc_bytes_per_pixel;

/// Row stride alignment in bytes
pub const STRIDE_ALIGNMENT: u32 = 64;

/// Largest width or height accepted
pub const MAX_IMAGE_SIZE: u32 = 128_000;

/// `struct dma_heap_allocation_data` from `linux/dma-heap.h`
#[repr(C)]
#[derive(Debug, Default)]
struct DmaHeapAllocationData {
    len: u64,
    fd: u32,
    fd_flags: u32,
    heap_flags: u64,
}

nix::ioctl_readwrite!(dma_heap_ioctl_alloc, b'H', 0x0, DmaHeapAllocationData);

/// Geometry of a single-plane linear buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub format: AllocFormat,
    pub stride: u32,
    pub size: u64,
}

fn round_up_to_alignment(size: u64) -> u64 {
    size.next_multiple_of(u64::from(STRIDE_ALIGNMENT))
}

/// Pick the first candidate this allocator can lay out
///
/// # Errors
///
/// `Invalid` for an empty candidate list or out-of-range dimensions,
/// `NotSupported` when no candidate is linear and single-plane with a known
/// pixel size.
pub fn compute_layout(formats: &[AllocFormat], width: u32, height: u32) -> std::result::Result<BufferLayout, AllocError> {
    if formats.is_empty() || !(1..=MAX_IMAGE_SIZE).contains(&width) || !(1..=MAX_IMAGE_SIZE).contains(&height) {
        return Err(AllocError::Invalid);
    }

    formats
        .iter()
        .find_map(|format| {
            if format.modifier != DrmModifier::Linear || fourcc_plane_count(format.fourcc) != 1 {
                return None;
            }
            let bytes_per_pixel = fourcc_bytes_per_pixel(format.fourcc)?;
            let stride = round_up_to_alignment(u64::from(width) * u64::from(bytes_per_pixel));
            let stride = u32::try_from(stride).ok()?;
            Some(BufferLayout { format: *format, stride, size: u64::from(stride) * u64::from(height) })
        })
        .ok_or(AllocError::NotSupported)
}

/// Reject protected requests when there is no protected heap
///
/// Checked before any layout work, layout-only requests included.
pub fn check_protected_support(protected: bool, has_protected_heap: bool) -> std::result::Result<(), AllocError> {
    if protected && !has_protected_heap {
        wsi_error!("wsi::dma_heap", "Protected allocation requested but no protected heap is configured");
        return Err(AllocError::NoResource);
    }
    Ok(())
}

fn open_heap(name: &str) -> Result<File> {
    let path = Path::new("/dev/dma_heap").join(name);
    OpenOptions::new().read(true).write(true).open(&path).map_err(|err| {
        wsi_error!("wsi::dma_heap", "Failed to open {}: {}", path.display(), err);
        Error::InitializationFailed(format!("cannot open DMA-BUF heap {}: {}", path.display(), err))
    })
}

/// Allocator over a DMA-BUF heap, with an optional protected heap
#[derive(Debug)]
pub struct DmaHeapAllocator {
    heap: File,
    protected_heap: Option<File>,
}

impl DmaHeapAllocator {
    /// Open the heap `heap_name` and, if given, the protected heap
    ///
    /// # Errors
    ///
    /// Returns `InitializationFailed` if a heap cannot be opened.
    pub fn new(heap_name: &str, protected_heap_name: Option<&str>) -> Result<Self> {
        let heap = open_heap(heap_name)?;
        let protected_heap = protected_heap_name.map(open_heap).transpose()?;
        wsi_debug!("wsi::dma_heap", "Using DMA-BUF heap {}", heap_name);
        Ok(Self { heap, protected_heap })
    }

    fn allocate_buffer(&self, protected: bool, size: u64) -> std::result::Result<OwnedFd, AllocError> {
        let heap = if protected { self.protected_heap.as_ref() } else { Some(&self.heap) };
        let heap = heap.ok_or(AllocError::NoResource)?;

        let mut data = DmaHeapAllocationData {
            len: size,
            fd_flags: (OFlag::O_RDWR | OFlag::O_CLOEXEC).bits() as u32,
            ..Default::default()
        };
        // SAFETY: `data` matches the kernel layout and outlives the call
        unsafe { dma_heap_ioctl_alloc(heap.as_raw_fd(), &mut data) }.map_err(|errno| {
            wsi_error!("wsi::dma_heap", "DMA_HEAP_IOCTL_ALLOC of {} bytes failed: {}", size, errno);
            AllocError::NoResource
        })?;

        // SAFETY: the kernel returned a new descriptor we now own
        Ok(unsafe { OwnedFd::from_raw_fd(data.fd as RawFd) })
    }
}

impl BufferAllocator for DmaHeapAllocator {
    fn interface_version(&self) -> u32 {
        ALLOCATOR_INTERFACE_VERSION
    }

    fn allocate(&self, info: &AllocateInfo<'_>) -> std::result::Result<AllocationResult, AllocError> {
        let protected = info.flags.contains(AllocateFlags::PROTECTED);
        check_protected_support(protected, self.protected_heap.is_some())?;
        let layout = compute_layout(info.formats, info.width, info.height)?;

        let mut buffer_fds: [Option<Arc<OwnedFd>>; MAX_FB_PLANES] = Default::default();
        if !info.flags.contains(AllocateFlags::NO_MEMORY) {
            let fd = self.allocate_buffer(protected, layout.size)?;
            buffer_fds[0] = Some(Arc::new(fd));
        }

        let mut average_row_strides = [0; MAX_FB_PLANES];
        average_row_strides[0] = layout.stride;

        Ok(AllocationResult {
            format: layout.format,
            average_row_strides,
            offsets: [0; MAX_FB_PLANES],
            buffer_fds,
            is_disjoint: false,
        })
    }
}

#[cfg(test)]
#[path = "dma_heap_allocator_tests.rs"]
mod tests;
