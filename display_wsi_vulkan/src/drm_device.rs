/// DRM kernel mode-setting device
///
/// Implements [`KmsDevice`] over a DRM card node with the `drm` crate and
/// discovers the output to present on: the first connected connector, a
/// CRTC that can drive it, the mode to program and the format/modifier
/// pairs the CRTC's primary plane can scan out.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::raw::c_char;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;
use std::time::Duration;

use display_wsi::drm_fourcc::{DrmFormat, DrmFourcc, DrmModifier};
use display_wsi::wsi::display::{
    ConnectorId, CrtcId, DisplayMode, DrmDisplay, FramebufferDesc, FramebufferId, GemHandle, KmsDevice, ModeInfo,
    PageFlipEvent, MAX_FB_PLANES,
};
use display_wsi::wsi::{Error, Result};
use display_wsi::{wsi_debug, wsi_err, wsi_error, wsi_info, wsi_warn};
use drm::buffer::{self, PlanarBuffer};
use drm::control::{self, connector, crtc, Device as ControlDevice, FbCmd2Flags, PageFlipFlags};
use drm::{ClientCapability, Device, DriverCapability};
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags};
use rustc_hash::FxHashSet;

use crate::config::DisplayConfig;

/// `DRM_PLANE_TYPE_PRIMARY`
const PLANE_TYPE_PRIMARY: u64 = 1;

/// Open DRM card node
#[derive(Debug)]
pub struct DrmCard(File);

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for DrmCard {}
impl ControlDevice for DrmCard {}

impl DrmCard {
    /// Open a card node read-write
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_CLOEXEC.bits())
            .open(path)?;
        Ok(Self(file))
    }
}

fn invalid_handle(raw: u32) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid DRM handle {}", raw))
}

fn handle<T: From<drm::control::RawResourceHandle>>(raw: u32) -> io::Result<T> {
    control::from_u32(raw).ok_or_else(|| invalid_handle(raw))
}

/// Framebuffer description in the form `drmModeAddFB2` wants
struct PlanarDesc<'a> {
    desc: &'a FramebufferDesc,
    handles: [Option<buffer::Handle>; MAX_FB_PLANES],
    with_modifiers: bool,
}

impl PlanarBuffer for PlanarDesc<'_> {
    fn size(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    fn format(&self) -> DrmFourcc {
        self.desc.fourcc
    }

    fn modifier(&self) -> Option<DrmModifier> {
        self.with_modifiers.then_some(self.desc.modifier)
    }

    fn pitches(&self) -> [u32; 4] {
        self.desc.pitches
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        self.handles
    }

    fn offsets(&self) -> [u32; 4] {
        self.desc.offsets
    }
}

/// [`KmsDevice`] over a DRM card
#[derive(Debug)]
pub struct DrmKmsDevice {
    card: DrmCard,
}

impl DrmKmsDevice {
    pub fn new(card: DrmCard) -> Self {
        Self { card }
    }

    pub fn card(&self) -> &DrmCard {
        &self.card
    }
}

impl KmsDevice for DrmKmsDevice {
    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> io::Result<GemHandle> {
        let handle = self.card.prime_fd_to_buffer(fd)?;
        Ok(GemHandle(u32::from(handle)))
    }

    fn close_gem_handle(&self, gem: GemHandle) -> io::Result<()> {
        self.card.close_buffer(handle(gem.0)?)
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc, with_modifiers: bool) -> io::Result<FramebufferId> {
        let mut handles = [None; MAX_FB_PLANES];
        for (slot, gem) in handles.iter_mut().zip(desc.handles.iter()) {
            if let Some(gem) = gem {
                *slot = Some(handle(gem.0)?);
            }
        }
        let flags = if with_modifiers { FbCmd2Flags::MODIFIERS } else { FbCmd2Flags::empty() };
        let framebuffer = self
            .card
            .add_planar_framebuffer(&PlanarDesc { desc, handles, with_modifiers }, flags)?;
        Ok(FramebufferId(u32::from(framebuffer)))
    }

    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()> {
        self.card.destroy_framebuffer(handle(framebuffer.0)?)
    }

    fn set_crtc(&self, crtc: CrtcId, framebuffer: FramebufferId, connector: ConnectorId, mode: &ModeInfo) -> io::Result<()> {
        let connector: connector::Handle = handle(connector.0)?;
        self.card.set_crtc(
            handle(crtc.0)?,
            Some(handle(framebuffer.0)?),
            (0, 0),
            &[connector],
            Some(control::Mode::from(drm_mode_from_info(mode))),
        )
    }

    fn page_flip(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()> {
        self.card.page_flip(handle(crtc.0)?, handle(framebuffer.0)?, PageFlipFlags::EVENT, None)
    }

    fn wait_for_event(&self, timeout: Duration) -> io::Result<bool> {
        let mut fds = [PollFd::new(&self.card, PollFlags::POLLIN)];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let ready = poll(&mut fds, timeout_ms).map_err(io::Error::from)?;
        Ok(ready > 0)
    }

    fn handle_events(&self, on_page_flip: &mut dyn FnMut(PageFlipEvent)) -> io::Result<()> {
        for event in self.card.receive_events()? {
            if let control::Event::PageFlip(flip) = event {
                on_page_flip(PageFlipEvent { crtc: CrtcId(u32::from(flip.crtc)), sequence: flip.frame });
            }
        }
        Ok(())
    }
}

// ===== MODE CONVERSION =====

fn mode_name(name: &[c_char]) -> String {
    let bytes: Vec<u8> = name.iter().take_while(|c| **c != 0).map(|c| *c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Raw kernel timings to [`ModeInfo`]
pub fn mode_info_from_drm(mode: &drm_ffi::drm_mode_modeinfo) -> ModeInfo {
    ModeInfo {
        clock: mode.clock,
        hdisplay: mode.hdisplay,
        hsync_start: mode.hsync_start,
        hsync_end: mode.hsync_end,
        htotal: mode.htotal,
        hskew: mode.hskew,
        vdisplay: mode.vdisplay,
        vsync_start: mode.vsync_start,
        vsync_end: mode.vsync_end,
        vtotal: mode.vtotal,
        vscan: mode.vscan,
        vrefresh: mode.vrefresh,
        flags: mode.flags,
        mode_type: mode.type_,
        name: mode_name(&mode.name),
    }
}

/// [`ModeInfo`] back to raw kernel timings; the name is truncated to 31 bytes
pub fn drm_mode_from_info(info: &ModeInfo) -> drm_ffi::drm_mode_modeinfo {
    let mut name = [0 as c_char; 32];
    for (dst, src) in name.iter_mut().zip(info.name.bytes().take(31)) {
        *dst = src as c_char;
    }
    drm_ffi::drm_mode_modeinfo {
        clock: info.clock,
        hdisplay: info.hdisplay,
        hsync_start: info.hsync_start,
        hsync_end: info.hsync_end,
        htotal: info.htotal,
        hskew: info.hskew,
        vdisplay: info.vdisplay,
        vsync_start: info.vsync_start,
        vsync_end: info.vsync_end,
        vtotal: info.vtotal,
        vscan: info.vscan,
        vrefresh: info.vrefresh,
        flags: info.flags,
        type_: info.mode_type,
        name,
    }
}

/// Index of the mode to program
///
/// With a requested `(width, height, refresh)` the first matching mode is
/// chosen; without one, the preferred mode, else the first mode.
pub fn select_mode(modes: &[DisplayMode], requested: Option<(u16, u16, Option<u32>)>) -> Option<usize> {
    match requested {
        Some((width, height, refresh)) => modes.iter().position(|mode| {
            mode.width == u32::from(width)
                && mode.height == u32::from(height)
                && refresh.map_or(true, |hz| mode.info.vrefresh == hz)
        }),
        None if modes.is_empty() => None,
        None => Some(modes.iter().position(|mode| mode.preferred).unwrap_or(0)),
    }
}

// ===== PLANE FORMATS =====

fn read_u32(blob: &[u8], offset: usize) -> Option<u32> {
    let bytes = blob.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

fn read_u64(blob: &[u8], offset: usize) -> Option<u64> {
    let bytes = blob.get(offset..offset + 8)?;
    Some(u64::from_ne_bytes(bytes.try_into().ok()?))
}

/// Decode an `IN_FORMATS` property blob (`struct drm_format_modifier_blob`)
///
/// Returns every (format, modifier) pair the plane advertises. Unknown
/// fourcc codes are skipped; a truncated blob yields the pairs read so far.
pub fn parse_in_formats(blob: &[u8]) -> Vec<DrmFormat> {
    const MODIFIER_ENTRY_SIZE: usize = 24;

    let mut formats = Vec::new();
    let (Some(count_formats), Some(formats_offset), Some(count_modifiers), Some(modifiers_offset)) =
        (read_u32(blob, 8), read_u32(blob, 12), read_u32(blob, 16), read_u32(blob, 20))
    else {
        return formats;
    };

    let codes: Vec<u32> = (0..count_formats as usize)
        .map_while(|i| read_u32(blob, formats_offset as usize + i * 4))
        .collect();

    for entry in 0..count_modifiers as usize {
        let base = modifiers_offset as usize + entry * MODIFIER_ENTRY_SIZE;
        let (Some(mask), Some(first), Some(modifier)) =
            (read_u64(blob, base), read_u32(blob, base + 8), read_u64(blob, base + 16))
        else {
            break;
        };
        for bit in 0..64usize {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let Some(code) = codes.get(first as usize + bit) else {
                continue;
            };
            if let Ok(code) = DrmFourcc::try_from(*code) {
                formats.push(DrmFormat { code, modifier: DrmModifier::from(modifier) });
            }
        }
    }
    formats
}

/// Value of the property `name` on a KMS object
fn property_value<H: control::ResourceHandle>(card: &DrmCard, object: H, name: &str) -> io::Result<Option<u64>> {
    let props = card.get_properties(object)?;
    let (handles, values) = props.as_props_and_values();
    for (prop, value) in handles.iter().zip(values.iter()) {
        let info = card.get_property(*prop)?;
        if info.name().to_bytes() == name.as_bytes() {
            return Ok(Some(*value));
        }
    }
    Ok(None)
}

/// Format/modifier pairs the primary plane of `crtc` can scan out
fn primary_plane_formats(card: &DrmCard, resources: &control::ResourceHandles, crtc: crtc::Handle) -> Result<FxHashSet<DrmFormat>> {
    let planes = card.plane_handles().map_err(|err| {
        wsi_err!("wsi::drm", "drmModeGetPlaneResources failed: {}", err)
    })?;

    for plane in planes {
        let info = card
            .get_plane(plane)
            .map_err(|err| wsi_err!("wsi::drm", "drmModeGetPlane failed: {}", err))?;
        if !resources.filter_crtcs(info.possible_crtcs()).contains(&crtc) {
            continue;
        }
        let plane_type = property_value(card, plane, "type").unwrap_or(None);
        if plane_type != Some(PLANE_TYPE_PRIMARY) {
            continue;
        }

        let blob = property_value(card, plane, "IN_FORMATS")
            .unwrap_or(None)
            .and_then(|blob_id| card.get_property_blob(blob_id).ok());
        let formats: FxHashSet<DrmFormat> = match blob {
            Some(blob) => parse_in_formats(&blob).into_iter().collect(),
            // No modifier support: implicit layouts are linear for our buffers
            None => info
                .formats()
                .iter()
                .filter_map(|code| DrmFourcc::try_from(*code).ok())
                .map(|code| DrmFormat { code, modifier: DrmModifier::Linear })
                .collect(),
        };
        wsi_debug!("wsi::drm", "Primary plane {:?} supports {} formats", plane, formats.len());
        return Ok(formats);
    }

    Err(Error::InitializationFailed("no primary plane for the selected CRTC".to_string()))
}

// ===== DISCOVERY =====

/// Open the card named by `config` and describe its first connected output
///
/// # Errors
///
/// Returns `InitializationFailed` if the card cannot be opened, no connector
/// is connected, no CRTC can drive it, or it has no usable mode.
pub fn open_display(config: &DisplayConfig) -> Result<DrmDisplay> {
    let card = DrmCard::open(&config.device_path).map_err(|err| {
        wsi_error!("wsi::drm", "Failed to open {}: {}", config.device_path.display(), err);
        Error::InitializationFailed(format!("cannot open {}: {}", config.device_path.display(), err))
    })?;

    if let Err(err) = card.set_client_capability(ClientCapability::UniversalPlanes, true) {
        wsi_warn!("wsi::drm", "Universal planes not available: {}", err);
    }
    let supports_fb_modifiers = matches!(card.get_driver_capability(DriverCapability::AddFB2Modifiers), Ok(1));

    let resources = card
        .resource_handles()
        .map_err(|err| wsi_err!("wsi::drm", "drmModeGetResources failed: {}", err))?;

    let connector = resources
        .connectors()
        .iter()
        .filter_map(|handle| card.get_connector(*handle, true).ok())
        .find(|info| info.state() == connector::State::Connected && !info.modes().is_empty())
        .ok_or_else(|| Error::InitializationFailed("no connected display".to_string()))?;

    let current_crtc = connector
        .current_encoder()
        .and_then(|encoder| card.get_encoder(encoder).ok())
        .and_then(|encoder| encoder.crtc());
    let crtc = match current_crtc {
        Some(crtc) => crtc,
        None => connector
            .encoders()
            .iter()
            .filter_map(|encoder| card.get_encoder(*encoder).ok())
            .find_map(|encoder| resources.filter_crtcs(encoder.possible_crtcs()).first().copied())
            .ok_or_else(|| Error::InitializationFailed("no CRTC can drive the connector".to_string()))?,
    };

    let modes: Vec<DisplayMode> = connector
        .modes()
        .iter()
        .map(|mode| DisplayMode::from_mode_info(mode_info_from_drm(&drm_ffi::drm_mode_modeinfo::from(*mode))))
        .collect();
    let index = select_mode(&modes, config.preferred_mode)
        .or_else(|| {
            wsi_warn!(
                "wsi::drm",
                "Requested mode {:?} not available, using the default mode",
                config.preferred_mode
            );
            select_mode(&modes, None)
        })
        .ok_or_else(|| Error::InitializationFailed("connector has no modes".to_string()))?;
    let mode = modes[index].clone();

    let formats = primary_plane_formats(&card, &resources, crtc)?;

    wsi_info!(
        "wsi::drm",
        "Display {}x{} @ {}.{:03} Hz on {}, modifiers {}",
        mode.width,
        mode.height,
        mode.refresh_rate_mhz / 1000,
        mode.refresh_rate_mhz % 1000,
        config.device_path.display(),
        if supports_fb_modifiers { "supported" } else { "unsupported" }
    );

    Ok(DrmDisplay::new(
        Arc::new(DrmKmsDevice::new(card)),
        CrtcId(u32::from(crtc)),
        ConnectorId(u32::from(connector.handle())),
        mode,
        formats,
        supports_fb_modifiers,
    ))
}

#[cfg(test)]
#[path = "drm_device_tests.rs"]
mod tests;
