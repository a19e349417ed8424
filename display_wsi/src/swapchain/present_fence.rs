/// Presentation fence - tells when the GPU work of a present has finished

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::swapchain::{DeviceDispatch, FenceHandle, QueueHandle, SemaphoreHandle};

/// Per-image fence signaled once the semaphores of a present are
pub struct PresentFence {
    dispatch: Arc<dyn DeviceDispatch>,
    fence: FenceHandle,
    has_payload: bool,
    payload_finished: bool,
}

impl PresentFence {
    /// Create the underlying device fence
    pub fn new(dispatch: Arc<dyn DeviceDispatch>) -> Result<Self> {
        let fence = dispatch.create_fence()?;
        Ok(Self { dispatch, fence, has_payload: false, payload_finished: false })
    }

    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    pub fn has_payload(&self) -> bool {
        self.has_payload
    }

    pub fn payload_finished(&self) -> bool {
        self.payload_finished
    }

    /// Arm the fence behind `wait_semaphores`
    ///
    /// Submits an empty batch on `queue` that waits on the semaphores at the
    /// bottom of the pipe and signals the fence.
    pub fn set_payload(&mut self, queue: QueueHandle, wait_semaphores: &[SemaphoreHandle]) -> Result<()> {
        self.dispatch.reset_fence(self.fence)?;
        self.has_payload = false;

        self.dispatch.submit_fence_payload(queue, wait_semaphores, self.fence)?;
        self.has_payload = true;
        self.payload_finished = false;
        Ok(())
    }

    /// Wait for the current payload, if any is still running
    ///
    /// # Errors
    ///
    /// `Timeout` if the payload did not finish within `timeout`.
    pub fn wait_payload(&mut self, timeout: Duration) -> Result<()> {
        if self.has_payload && !self.payload_finished {
            self.dispatch.wait_fence(self.fence, timeout)?;
            self.payload_finished = true;
        }
        Ok(())
    }
}

impl Drop for PresentFence {
    fn drop(&mut self) {
        if let Err(err) = self.wait_payload(Duration::MAX) {
            crate::wsi_warn!("wsi::swapchain", "Waiting for present fence before destroy failed: {}", err);
        }
        self.dispatch.destroy_fence(self.fence);
    }
}

impl std::fmt::Debug for PresentFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentFence")
            .field("fence", &self.fence)
            .field("has_payload", &self.has_payload)
            .field("payload_finished", &self.payload_finished)
            .finish()
    }
}

#[cfg(test)]
#[path = "present_fence_tests.rs"]
mod tests;
