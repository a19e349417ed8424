/// Image state tracker and the swapchain lifecycle-manager contract

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::swapchain::ImageHandle;

/// Lifecycle status of a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Invalid,
    Free,
    Acquired,
    Presented,
}

/// One slot of the swapchain image array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainImage {
    pub handle: Option<ImageHandle>,
    pub status: ImageStatus,
}

/// Status and handle of every image behind one lock
///
/// The lock is never held across calls into the device or the kernel.
#[derive(Debug)]
pub struct ImageStateTracker {
    images: Mutex<Vec<SwapchainImage>>,
}

impl ImageStateTracker {
    /// Create `image_count` invalid slots
    ///
    /// # Errors
    ///
    /// Returns `OutOfHostMemory` if the array cannot be allocated.
    pub fn new(image_count: usize) -> Result<Self> {
        let mut images = Vec::new();
        images.try_reserve_exact(image_count)?;
        images.resize(image_count, SwapchainImage { handle: None, status: ImageStatus::Invalid });
        Ok(Self { images: Mutex::new(images) })
    }

    /// Lock the image array
    pub fn lock(&self) -> MutexGuard<'_, Vec<SwapchainImage>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn status(&self, index: u32) -> Option<ImageStatus> {
        self.lock().get(index as usize).map(|image| image.status)
    }

    /// Set the status of an image; false if `index` is out of range
    pub fn set_status(&self, index: u32, status: ImageStatus) -> bool {
        match self.lock().get_mut(index as usize) {
            Some(image) => {
                image.status = status;
                true
            }
            None => false,
        }
    }

    pub fn image_handle(&self, index: u32) -> Option<ImageHandle> {
        self.lock().get(index as usize).and_then(|image| image.handle)
    }

    pub fn set_image_handle(&self, index: u32, handle: ImageHandle) -> bool {
        match self.lock().get_mut(index as usize) {
            Some(image) => {
                image.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Index of the image currently on screen
    pub fn presented_index(&self) -> Option<u32> {
        self.lock()
            .iter()
            .position(|image| image.status == ImageStatus::Presented)
            .map(|index| index as u32)
    }

    /// Mark `index` as on screen and return the image it replaces
    ///
    /// The previous image keeps its `Presented` status; the caller releases
    /// it through the lifecycle manager.
    pub fn mark_presented(&self, index: u32) -> Option<u32> {
        let mut images = self.lock();
        let previous = images
            .iter()
            .enumerate()
            .position(|(i, image)| i != index as usize && image.status == ImageStatus::Presented)
            .map(|i| i as u32);
        if let Some(image) = images.get_mut(index as usize) {
            image.status = ImageStatus::Presented;
        }
        previous
    }

    /// First teardown step: mark the image invalid and take its handle
    ///
    /// Returns `None` if the image was already invalid.
    pub fn mark_invalid(&self, index: u32) -> Option<Option<ImageHandle>> {
        let mut images = self.lock();
        let image = images.get_mut(index as usize)?;
        if image.status == ImageStatus::Invalid && image.handle.is_none() {
            return None;
        }
        image.status = ImageStatus::Invalid;
        Some(image.handle.take())
    }
}

/// Lifecycle manager owning the image array of a swapchain
pub trait SwapchainOwner: Send + Sync {
    /// The image array
    fn images(&self) -> &ImageStateTracker;

    /// Release an image taken off screen back toward `Free`
    fn unpresent_image(&self, index: u32);

    /// Mark the swapchain as failed; the first error sticks
    fn set_error_state(&self, error: Error);

    fn error_state(&self) -> Option<Error>;
}

/// Lifecycle manager with no acquire machinery of its own
#[derive(Debug)]
pub struct StandardSwapchainOwner {
    images: ImageStateTracker,
    error: Mutex<Option<Error>>,
}

impl StandardSwapchainOwner {
    pub fn new(image_count: usize) -> Result<Self> {
        Ok(Self { images: ImageStateTracker::new(image_count)?, error: Mutex::new(None) })
    }
}

impl SwapchainOwner for StandardSwapchainOwner {
    fn images(&self) -> &ImageStateTracker {
        &self.images
    }

    fn unpresent_image(&self, index: u32) {
        self.images.set_status(index, ImageStatus::Free);
    }

    fn set_error_state(&self, error: Error) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            crate::wsi_error!("wsi::swapchain", "Swapchain entered error state: {}", error);
            *slot = Some(error);
        }
    }

    fn error_state(&self) -> Option<Error> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
#[path = "image_state_tests.rs"]
mod tests;
