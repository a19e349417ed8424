/// Presentation scheduler - drives the scanout hardware for one swapchain
///
/// The first present programs the CRTC synchronously with the new image's
/// framebuffer. Every later present queues a page flip and pumps display
/// events until the kernel reports the flip done. Any kernel failure moves
/// the scheduler to a sticky error state.

use std::io;
use std::time::Duration;

use crate::display::{DrmDisplay, FramebufferId, PageFlipEvent};
use crate::error::{Error, Result};

/// Per-iteration bound on the display event wait
pub const PAGE_FLIP_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Presentation state of a swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    /// Nothing shown yet: the next present performs a mode-set
    NeverPresented,
    /// The CRTC is ours: presents are page flips
    SteadyPresenting,
    /// A kernel call failed; the surface is lost
    Error,
}

/// Outcome of one bounded wait on the display device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Interrupted by a signal or asked to retry (EINTR, EAGAIN)
    Interrupted,
    /// No event within the wait interval
    TimedOut,
    /// The device has an event to read
    EventReady,
    /// Unrecoverable wait failure
    Fatal,
}

/// What the event pump does with a wait outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAction {
    /// Wait again; the page flip is not reissued
    Retry,
    /// Read and dispatch pending events
    Dispatch,
    /// Give up and lose the surface
    Abort,
}

impl WaitOutcome {
    /// Classify the result of [`crate::display::KmsDevice::wait_for_event`]
    pub fn classify(result: &io::Result<bool>) -> Self {
        match result {
            Ok(true) => WaitOutcome::EventReady,
            Ok(false) => WaitOutcome::TimedOut,
            Err(err) => match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => WaitOutcome::Interrupted,
                _ => WaitOutcome::Fatal,
            },
        }
    }

    /// Retry policy of the event pump
    pub fn action(self) -> WaitAction {
        match self {
            WaitOutcome::Interrupted | WaitOutcome::TimedOut => WaitAction::Retry,
            WaitOutcome::EventReady => WaitAction::Dispatch,
            WaitOutcome::Fatal => WaitAction::Abort,
        }
    }
}

/// Mode-set / page-flip state machine of one swapchain
#[derive(Debug)]
pub struct PresentScheduler {
    state: PresentState,
}

impl Default for PresentScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentScheduler {
    pub fn new() -> Self {
        Self { state: PresentState::NeverPresented }
    }

    pub fn state(&self) -> PresentState {
        self.state
    }

    /// Enter the error state for a loss detected outside the scheduler
    pub fn mark_lost(&mut self) {
        self.state = PresentState::Error;
    }

    /// Put a framebuffer on screen, blocking until the hardware has it
    ///
    /// # Errors
    ///
    /// Returns `SurfaceLost` if a kernel call fails or the scheduler is
    /// already in the error state. In the error state no kernel call is made.
    pub fn present(&mut self, display: &DrmDisplay, framebuffer: FramebufferId) -> Result<()> {
        match self.state {
            PresentState::Error => Err(Error::SurfaceLost("swapchain is lost".to_string())),
            PresentState::NeverPresented => {
                let device = display.device();
                if let Err(err) = device.set_crtc(
                    display.crtc_id(),
                    framebuffer,
                    display.connector_id(),
                    &display.mode().info,
                ) {
                    return Err(self.lose("drmModeSetCrtc", &err));
                }
                crate::wsi_debug!(
                    "wsi::display",
                    "Mode {}x{} set on CRTC {} with framebuffer {}",
                    display.mode().width,
                    display.mode().height,
                    display.crtc_id().0,
                    framebuffer.0
                );
                self.state = PresentState::SteadyPresenting;
                Ok(())
            }
            PresentState::SteadyPresenting => {
                if let Err(err) = display.device().page_flip(display.crtc_id(), framebuffer) {
                    return Err(self.lose("drmModePageFlip", &err));
                }
                self.wait_for_page_flip(display)
            }
        }
    }

    /// Pump display events until the queued flip on our CRTC completes
    fn wait_for_page_flip(&mut self, display: &DrmDisplay) -> Result<()> {
        let device = display.device();
        let crtc = display.crtc_id();
        let mut page_flip_complete = false;

        while !page_flip_complete {
            let result = device.wait_for_event(PAGE_FLIP_WAIT_TIMEOUT);
            let outcome = WaitOutcome::classify(&result);
            match outcome.action() {
                WaitAction::Retry => {
                    if outcome == WaitOutcome::TimedOut {
                        crate::wsi_warn!("wsi::display", "Page flip wait timed out, carrying on with page flip");
                    } else {
                        crate::wsi_trace!("wsi::display", "Page flip wait interrupted, retrying");
                    }
                }
                WaitAction::Dispatch => {
                    let mut on_page_flip = |event: PageFlipEvent| {
                        if event.crtc == crtc {
                            page_flip_complete = true;
                        }
                    };
                    if let Err(err) = device.handle_events(&mut on_page_flip) {
                        crate::wsi_warn!("wsi::display", "drmHandleEvent failed: {}", err);
                    }
                }
                WaitAction::Abort => {
                    let err = match result {
                        Err(err) => err,
                        Ok(_) => io::Error::from(io::ErrorKind::Other),
                    };
                    return Err(self.lose("poll", &err));
                }
            }
        }

        Ok(())
    }

    /// Enter the error state and build the lost-surface error
    fn lose(&mut self, call: &str, err: &io::Error) -> Error {
        crate::wsi_error!("wsi::display", "{} failed: {}", call, err);
        self.state = PresentState::Error;
        Error::SurfaceLost(format!("{} failed: {}", call, err))
    }
}

#[cfg(test)]
#[path = "present_scheduler_tests.rs"]
mod tests;
