/// Display mode - resolution, refresh timing and raw kernel timings

/// Raw kernel mode timings (mirror of `drm_mode_modeinfo`)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeInfo {
    /// Pixel clock in kHz
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    /// Nominal refresh rate in Hz as reported by the kernel
    pub vrefresh: u32,
    pub flags: u32,
    pub mode_type: u32,
    pub name: String,
}

/// Kernel mode flag: interlaced scanout
pub const MODE_FLAG_INTERLACE: u32 = 1 << 4;
/// Kernel mode flag: each line is scanned twice
pub const MODE_FLAG_DBLSCAN: u32 = 1 << 5;
/// Kernel mode type: preferred by the connector
pub const MODE_TYPE_PREFERRED: u32 = 1 << 3;

/// A display mode chosen at surface-creation time
///
/// Immutable for the lifetime of any swapchain presenting with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    /// Refresh rate in millihertz
    pub refresh_rate_mhz: u32,
    /// Whether the connector advertises this mode as preferred
    pub preferred: bool,
    /// Timings passed to the kernel when the mode is set
    pub info: ModeInfo,
}

impl DisplayMode {
    /// Build a display mode from raw kernel timings
    pub fn from_mode_info(info: ModeInfo) -> Self {
        Self {
            width: u32::from(info.hdisplay),
            height: u32::from(info.vdisplay),
            refresh_rate_mhz: refresh_rate_mhz(&info),
            preferred: info.mode_type & MODE_TYPE_PREFERRED != 0,
            info,
        }
    }
}

/// Compute the exact refresh rate of a mode in millihertz
///
/// Falls back to `vrefresh * 1000` when the totals are zero.
pub fn refresh_rate_mhz(info: &ModeInfo) -> u32 {
    let htotal = u64::from(info.htotal);
    let mut vtotal = u64::from(info.vtotal);
    if htotal == 0 || vtotal == 0 {
        return info.vrefresh.saturating_mul(1000);
    }

    if info.flags & MODE_FLAG_DBLSCAN != 0 {
        vtotal *= 2;
    }
    if info.vscan > 1 {
        vtotal *= u64::from(info.vscan);
    }

    // clock is in kHz: Hz = clock * 1000 / (htotal * vtotal), then * 1000 for mHz
    let mut refresh = (u64::from(info.clock) * 1_000_000 + (htotal * vtotal) / 2) / (htotal * vtotal);
    if info.flags & MODE_FLAG_INTERLACE != 0 {
        refresh *= 2;
    }
    refresh.min(u64::from(u32::MAX)) as u32
}

#[cfg(test)]
#[path = "display_mode_tests.rs"]
mod tests;
