/// Buffer allocator contract and the allocation bridge
///
/// The allocator hands out shared multi-plane buffers constrained to a list of
/// candidate format/modifier pairs. The bridge on top of it maps allocator
/// errors to the layer's error classes and reconciles the disjoint layout the
/// allocator reports with the buffer descriptors it returned.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use bitflags::bitflags;
use drm_fourcc::{DrmFourcc, DrmModifier};

use crate::display::{fourcc_plane_count, MAX_FB_PLANES};
use crate::error::{Error, Result};

/// Allocator interface version this layer is built against
pub const ALLOCATOR_INTERFACE_VERSION: u32 = 1;

bitflags! {
    /// Per-format allocation constraints
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatFlags: u64 {
        /// All planes must live in one memory object
        const NON_DISJOINT = 1 << 0;
    }
}

bitflags! {
    /// Allocation request modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AllocateFlags: u64 {
        /// Allocate from protected memory
        const PROTECTED = 1 << 0;
        /// Compute the layout only, allocate nothing
        const NO_MEMORY = 1 << 1;
        /// Prefer the highest fixed-rate compression the format allows
        const HIGHEST_FIXED_RATE_COMPRESSION = 1 << 2;
    }
}

/// Candidate format for an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocFormat {
    pub fourcc: DrmFourcc,
    pub modifier: DrmModifier,
    pub flags: FormatFlags,
}

/// Allocation request
#[derive(Debug, Clone)]
pub struct AllocateInfo<'a> {
    /// Candidates in order of preference
    pub formats: &'a [AllocFormat],
    pub width: u32,
    pub height: u32,
    pub flags: AllocateFlags,
}

/// Buffers returned by an allocator
///
/// Planes backed by the same memory object share the same `Arc`, so each
/// distinct descriptor is closed once when the last plane is dropped.
#[derive(Debug, Clone)]
pub struct AllocationResult {
    /// Format chosen among the candidates
    pub format: AllocFormat,
    pub average_row_strides: [u32; MAX_FB_PLANES],
    pub offsets: [u32; MAX_FB_PLANES],
    /// `None` for unused planes and for `NO_MEMORY` requests
    pub buffer_fds: [Option<Arc<OwnedFd>>; MAX_FB_PLANES],
    pub is_disjoint: bool,
}

/// Allocator failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Malformed request
    Invalid,
    /// None of the candidate formats can be allocated
    NotSupported,
    /// Out of memory or another resource
    NoResource,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::Invalid => write!(f, "invalid allocation request"),
            AllocError::NotSupported => write!(f, "format not supported"),
            AllocError::NoResource => write!(f, "out of resources"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Shared-buffer allocator owned by one swapchain
pub trait BufferAllocator: Send {
    /// Interface version implemented by this allocator
    fn interface_version(&self) -> u32;

    /// Allocate (or, with `NO_MEMORY`, lay out) a buffer
    fn allocate(&self, info: &AllocateInfo<'_>) -> std::result::Result<AllocationResult, AllocError>;
}

/// Reject an allocator built against another interface version
///
/// # Errors
///
/// Returns `InitializationFailed` on a version mismatch.
pub fn check_allocator_version(allocator: &dyn BufferAllocator) -> Result<()> {
    let version = allocator.interface_version();
    if version != ALLOCATOR_INTERFACE_VERSION {
        crate::wsi_error!(
            "wsi::allocator",
            "Allocator interface version {} does not match expected version {}",
            version,
            ALLOCATOR_INTERFACE_VERSION
        );
        return Err(Error::InitializationFailed(format!(
            "allocator interface version {} (expected {})",
            version, ALLOCATOR_INTERFACE_VERSION
        )));
    }
    Ok(())
}

/// Count the distinct memory objects behind the given plane descriptors
///
/// A plane counts when no later plane refers to the same descriptor.
pub fn count_distinct_memories(buffer_fds: &[Option<Arc<OwnedFd>>]) -> u32 {
    let raw: Vec<Option<i32>> = buffer_fds
        .iter()
        .map(|fd| fd.as_ref().map(|fd| fd.as_raw_fd()))
        .collect();

    let mut count = 0;
    for (plane, fd) in raw.iter().enumerate() {
        if fd.is_some() && !raw[plane + 1..].contains(fd) {
            count += 1;
        }
    }
    count
}

/// Result of the allocation bridge
#[derive(Debug, Clone)]
pub struct BufferAllocation {
    pub result: AllocationResult,
    /// Planes of the allocated fourcc
    pub num_planes: u32,
    /// Distinct memory objects; `None` for layout-only requests
    pub num_memories: Option<u32>,
}

/// Allocate shared buffers among `formats`
///
/// # Errors
///
/// `FormatNotSupported` when the allocator supports none of the candidates,
/// `OutOfHostMemory` for any other allocator failure.
pub fn allocate_buffers(
    allocator: &dyn BufferAllocator,
    formats: &[AllocFormat],
    width: u32,
    height: u32,
    flags: AllocateFlags,
) -> Result<BufferAllocation> {
    let info = AllocateInfo { formats, width, height, flags };

    let result = allocator.allocate(&info).map_err(|err| {
        crate::wsi_error!("wsi::allocator", "Failed allocation of DMA buffer: {}", err);
        match err {
            AllocError::NotSupported => Error::FormatNotSupported(format!(
                "none of {} candidate formats can be allocated",
                formats.len()
            )),
            AllocError::Invalid | AllocError::NoResource => Error::OutOfHostMemory,
        }
    })?;

    let num_planes = fourcc_plane_count(result.format.fourcc);

    let num_memories = if flags.contains(AllocateFlags::NO_MEMORY) {
        None
    } else {
        let planes = (num_planes as usize).min(MAX_FB_PLANES);
        let distinct = count_distinct_memories(&result.buffer_fds[..planes]);
        if result.is_disjoint != (distinct > 1) {
            crate::wsi_warn!(
                "wsi::allocator",
                "Allocator reported disjoint={} but planes use {} memory objects",
                result.is_disjoint,
                distinct
            );
        }
        debug_assert_eq!(result.is_disjoint, distinct > 1);
        Some(distinct)
    };

    crate::wsi_trace!(
        "wsi::allocator",
        "Allocated {:?} {:?} ({} planes, {:?} memories{})",
        result.format.fourcc,
        result.format.modifier,
        num_planes,
        num_memories,
        if flags.contains(AllocateFlags::NO_MEMORY) { ", layout only" } else { "" }
    );

    Ok(BufferAllocation { result, num_planes, num_memories })
}

#[cfg(test)]
#[path = "buffer_allocator_tests.rs"]
mod tests;
