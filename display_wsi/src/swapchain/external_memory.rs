/// External memory binder
///
/// Keeps the per-plane buffer descriptors of one swapchain image and
/// translates them into the graphics API's explicit-modifier import chain,
/// imported memory objects and image bindings.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;
use drm_fourcc::DrmModifier;

use crate::allocator::BufferAllocation;
use crate::display::MAX_FB_PLANES;
use crate::error::{Error, Result};
use crate::swapchain::{
    DeviceDispatch, ExternalMemoryHandleType, ImageHandle, ImageImportInfo, MemoryBinding, MemoryHandle,
    SubresourceLayout,
};

/// Shared buffers backing one swapchain image
pub struct ExternalMemory {
    dispatch: Arc<dyn DeviceDispatch>,
    buffer_fds: [Option<Arc<OwnedFd>>; MAX_FB_PLANES],
    strides: [u32; MAX_FB_PLANES],
    offsets: [u32; MAX_FB_PLANES],
    num_planes: u32,
    num_memories: u32,
    handle_type: ExternalMemoryHandleType,
    memories: [Option<MemoryHandle>; MAX_FB_PLANES],
}

impl ExternalMemory {
    pub fn new(dispatch: Arc<dyn DeviceDispatch>) -> Self {
        Self {
            dispatch,
            buffer_fds: Default::default(),
            strides: [0; MAX_FB_PLANES],
            offsets: [0; MAX_FB_PLANES],
            num_planes: 0,
            num_memories: 0,
            handle_type: ExternalMemoryHandleType::DmaBuf,
            memories: [None; MAX_FB_PLANES],
        }
    }

    pub fn num_planes(&self) -> u32 {
        self.num_planes
    }

    pub fn num_memories(&self) -> u32 {
        self.num_memories
    }

    pub fn set_num_memories(&mut self, num_memories: u32) {
        self.num_memories = num_memories;
    }

    /// Planes live in more than one memory object
    pub fn is_disjoint(&self) -> bool {
        self.num_memories != 1
    }

    pub fn buffer_fds(&self) -> &[Option<Arc<OwnedFd>>; MAX_FB_PLANES] {
        &self.buffer_fds
    }

    pub fn strides(&self) -> &[u32; MAX_FB_PLANES] {
        &self.strides
    }

    pub fn offsets(&self) -> &[u32; MAX_FB_PLANES] {
        &self.offsets
    }

    pub fn handle_type(&self) -> ExternalMemoryHandleType {
        self.handle_type
    }

    /// Take over the buffers of an allocation
    ///
    /// Memory imported from earlier buffers is released. The memory count is
    /// only updated for real allocations.
    pub fn set_allocation(&mut self, allocation: &BufferAllocation) {
        self.release_memories();
        self.strides = allocation.result.average_row_strides;
        self.offsets = allocation.result.offsets;
        self.buffer_fds = allocation.result.buffer_fds.clone();
        self.num_planes = allocation.num_planes;
        if let Some(num_memories) = allocation.num_memories {
            self.num_memories = num_memories;
        }
        self.handle_type = ExternalMemoryHandleType::DmaBuf;
    }

    /// Per-plane layouts for the explicit-modifier image chain
    ///
    /// # Errors
    ///
    /// Returns `OutOfHostMemory` if the list cannot be allocated.
    pub fn fill_image_plane_layouts(&self) -> Result<Vec<SubresourceLayout>> {
        let count = (self.num_planes as usize).min(MAX_FB_PLANES);
        let mut layouts = Vec::new();
        layouts.try_reserve_exact(count)?;
        for plane in 0..count {
            layouts.push(SubresourceLayout {
                offset: u64::from(self.offsets[plane]),
                row_pitch: u64::from(self.strides[plane]),
            });
        }
        Ok(layouts)
    }

    /// Import chain for images created over these buffers
    pub fn image_import_info(&self, modifier: DrmModifier) -> Result<ImageImportInfo> {
        Ok(ImageImportInfo {
            modifier,
            plane_layouts: self.fill_image_plane_layouts()?,
            memory_plane_count: self.num_memories,
            handle_type: self.handle_type,
        })
    }

    /// Import every distinct plane buffer as device memory
    pub fn import_plane_memories(&mut self) -> Result<()> {
        if !self.is_disjoint() {
            let memory = self.import_plane_memory(0)?;
            self.memories[0] = Some(memory);
            return Ok(());
        }

        let raw: Vec<Option<i32>> = self
            .buffer_fds
            .iter()
            .map(|fd| fd.as_ref().map(|fd| fd.as_raw_fd()))
            .collect();

        let mut memory_plane = 0;
        let num_planes = (self.num_planes as usize).min(MAX_FB_PLANES);
        for plane in 0..num_planes {
            // Only the first plane referring to a buffer imports it
            if raw[..plane].contains(&raw[plane]) {
                continue;
            }
            let memory = self.import_plane_memory(plane)?;
            self.memories[memory_plane] = Some(memory);
            memory_plane += 1;
        }
        Ok(())
    }

    fn import_plane_memory(&self, plane: usize) -> Result<MemoryHandle> {
        let Some(fd) = self.buffer_fds[plane].as_ref() else {
            crate::wsi_error!("wsi::swapchain", "Plane {} has no buffer to import", plane);
            return Err(Error::InitializationFailed(format!("plane {} has no buffer", plane)));
        };
        self.dispatch.import_memory_fd(fd.as_fd(), self.handle_type).map_err(|err| {
            crate::wsi_error!("wsi::swapchain", "Failed to import device memory: {}", err);
            err
        })
    }

    /// Bind the imported memory to `image`
    ///
    /// Disjoint images get one binding per memory plane.
    pub fn bind_swapchain_image_memory(&self, image: ImageHandle) -> Result<()> {
        let count = if self.is_disjoint() { self.num_memories as usize } else { 1 };
        let mut bindings = Vec::new();
        bindings.try_reserve_exact(count)?;

        for plane in 0..count.min(MAX_FB_PLANES) {
            let Some(memory) = self.memories[plane] else {
                crate::wsi_error!("wsi::swapchain", "Memory plane {} was never imported", plane);
                return Err(Error::InitializationFailed(format!("memory plane {} not imported", plane)));
            };
            bindings.push(MemoryBinding {
                memory,
                offset: u64::from(self.offsets[plane]),
                plane: self.is_disjoint().then_some(plane as u32),
            });
        }

        self.dispatch.bind_image_memory(image, &bindings)
    }

    pub fn import_memory_and_bind(&mut self, image: ImageHandle) -> Result<()> {
        self.import_plane_memories()?;
        self.bind_swapchain_image_memory(image)
    }

    fn release_memories(&mut self) {
        for memory in self.memories.iter_mut() {
            if let Some(memory) = memory.take() {
                self.dispatch.free_memory(memory);
            }
        }
    }
}

impl Drop for ExternalMemory {
    fn drop(&mut self) {
        self.release_memories();
    }
}

impl std::fmt::Debug for ExternalMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalMemory")
            .field("strides", &self.strides)
            .field("offsets", &self.offsets)
            .field("num_planes", &self.num_planes)
            .field("num_memories", &self.num_memories)
            .field("memories", &self.memories)
            .finish()
    }
}

#[cfg(test)]
#[path = "external_memory_tests.rs"]
mod tests;
