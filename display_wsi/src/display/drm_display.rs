/// DRM display handle and the kernel mode-setting device contract
///
/// A `DrmDisplay` describes the one connected output this process presents
/// to: the kernel device, the CRTC/connector pair, the chosen mode and the
/// formats the scanout plane accepts. It is shared process-wide through
/// [`crate::wsi::Layer::display`] and never owned by a swapchain.

use std::io;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::time::Duration;
use drm_fourcc::{DrmFormat, DrmFourcc, DrmModifier};
use rustc_hash::FxHashSet;

use crate::display::{DisplayMode, ModeInfo};

/// Maximum number of planes of a kernel framebuffer
pub const MAX_FB_PLANES: usize = 4;

/// Kernel CRTC object id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CrtcId(pub u32);

/// Kernel connector object id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectorId(pub u32);

/// Kernel framebuffer object id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// GEM buffer handle local to the DRM file descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GemHandle(pub u32);

/// Page-flip completion reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlipEvent {
    /// CRTC whose flip completed
    pub crtc: CrtcId,
    /// Vertical blank sequence number
    pub sequence: u32,
}

/// Everything the kernel needs to build a framebuffer object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub width: u32,
    pub height: u32,
    pub fourcc: DrmFourcc,
    /// Applied to every plane when the modifier-aware path is used
    pub modifier: DrmModifier,
    pub handles: [Option<GemHandle>; MAX_FB_PLANES],
    pub pitches: [u32; MAX_FB_PLANES],
    pub offsets: [u32; MAX_FB_PLANES],
}

/// Kernel display-device operations used by the presentation engine
///
/// Implemented over a real DRM card by the backend crate and by mocks in tests.
/// All calls report the kernel errno through `io::Error`.
pub trait KmsDevice: Send + Sync {
    /// Import a DMA-BUF file descriptor as a GEM handle (PRIME)
    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> io::Result<GemHandle>;

    /// Release a GEM handle obtained through `prime_fd_to_handle`
    fn close_gem_handle(&self, handle: GemHandle) -> io::Result<()>;

    /// Create a framebuffer object
    ///
    /// `with_modifiers` selects the per-plane modifier path; otherwise only
    /// strides and offsets are passed.
    fn add_framebuffer(&self, desc: &FramebufferDesc, with_modifiers: bool) -> io::Result<FramebufferId>;

    /// Remove a framebuffer object
    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()>;

    /// Synchronously program the CRTC with a mode and initial framebuffer
    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        connector: ConnectorId,
        mode: &ModeInfo,
    ) -> io::Result<()>;

    /// Queue an asynchronous page flip; completion is delivered as an event
    fn page_flip(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()>;

    /// Block until the device has an event to read or `timeout` expires
    ///
    /// Returns `Ok(true)` when an event is ready, `Ok(false)` on timeout.
    fn wait_for_event(&self, timeout: Duration) -> io::Result<bool>;

    /// Read pending events, invoking `on_page_flip` for each completed flip
    fn handle_events(&self, on_page_flip: &mut dyn FnMut(PageFlipEvent)) -> io::Result<()>;
}

/// The connected output used for direct-to-display presentation
pub struct DrmDisplay {
    device: Arc<dyn KmsDevice>,
    crtc_id: CrtcId,
    connector_id: ConnectorId,
    mode: DisplayMode,
    supported_formats: FxHashSet<DrmFormat>,
    supports_fb_modifiers: bool,
}

impl DrmDisplay {
    /// Create a display description
    ///
    /// # Arguments
    ///
    /// * `device` - Kernel mode-setting device
    /// * `crtc_id` - CRTC driving the output
    /// * `connector_id` - Connector of the physical output
    /// * `mode` - Mode programmed on the first present
    /// * `supported_formats` - Format/modifier pairs the scanout plane accepts
    /// * `supports_fb_modifiers` - Whether ADDFB2 accepts per-plane modifiers
    pub fn new(
        device: Arc<dyn KmsDevice>,
        crtc_id: CrtcId,
        connector_id: ConnectorId,
        mode: DisplayMode,
        supported_formats: impl IntoIterator<Item = DrmFormat>,
        supports_fb_modifiers: bool,
    ) -> Self {
        Self {
            device,
            crtc_id,
            connector_id,
            mode,
            supported_formats: supported_formats.into_iter().collect(),
            supports_fb_modifiers,
        }
    }

    pub fn device(&self) -> &dyn KmsDevice {
        self.device.as_ref()
    }

    pub fn crtc_id(&self) -> CrtcId {
        self.crtc_id
    }

    pub fn connector_id(&self) -> ConnectorId {
        self.connector_id
    }

    pub fn mode(&self) -> &DisplayMode {
        &self.mode
    }

    pub fn supports_fb_modifiers(&self) -> bool {
        self.supports_fb_modifiers
    }

    /// Whether the scanout plane accepts this format/modifier pair
    pub fn is_format_supported(&self, format: &DrmFormat) -> bool {
        self.supported_formats.contains(format)
    }

    /// Number of supported format/modifier pairs
    pub fn supported_format_count(&self) -> usize {
        self.supported_formats.len()
    }
}

impl std::fmt::Debug for DrmDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmDisplay")
            .field("crtc_id", &self.crtc_id)
            .field("connector_id", &self.connector_id)
            .field("mode", &self.mode)
            .field("supported_formats", &self.supported_formats.len())
            .field("supports_fb_modifiers", &self.supports_fb_modifiers)
            .finish()
    }
}

/// Number of planes described by a fourcc code, or 0 for unknown layouts
pub fn fourcc_plane_count(fourcc: DrmFourcc) -> u32 {
    match fourcc {
        DrmFourcc::Rgb332
        | DrmFourcc::Bgr233
        | DrmFourcc::Xrgb4444
        | DrmFourcc::Xbgr4444
        | DrmFourcc::Rgbx4444
        | DrmFourcc::Bgrx4444
        | DrmFourcc::Argb4444
        | DrmFourcc::Abgr4444
        | DrmFourcc::Rgba4444
        | DrmFourcc::Bgra4444
        | DrmFourcc::Xrgb1555
        | DrmFourcc::Xbgr1555
        | DrmFourcc::Rgbx5551
        | DrmFourcc::Bgrx5551
        | DrmFourcc::Argb1555
        | DrmFourcc::Abgr1555
        | DrmFourcc::Rgba5551
        | DrmFourcc::Bgra5551
        | DrmFourcc::Rgb565
        | DrmFourcc::Bgr565
        | DrmFourcc::Rgb888
        | DrmFourcc::Bgr888
        | DrmFourcc::Xrgb8888
        | DrmFourcc::Xbgr8888
        | DrmFourcc::Rgbx8888
        | DrmFourcc::Bgrx8888
        | DrmFourcc::Argb8888
        | DrmFourcc::Abgr8888
        | DrmFourcc::Rgba8888
        | DrmFourcc::Bgra8888
        | DrmFourcc::Xrgb2101010
        | DrmFourcc::Xbgr2101010
        | DrmFourcc::Argb2101010
        | DrmFourcc::Abgr2101010
        | DrmFourcc::Abgr16161616f => 1,
        DrmFourcc::Nv12 | DrmFourcc::Nv21 | DrmFourcc::Nv16 | DrmFourcc::Nv61 | DrmFourcc::P010 => 2,
        DrmFourcc::Yuv420 | DrmFourcc::Yvu420 | DrmFourcc::Yuv444 => 3,
        _ => 0,
    }
}

#[cfg(test)]
#[path = "drm_display_tests.rs"]
mod tests;
