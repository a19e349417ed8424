use super::*;

fn mode_1080p60() -> ModeInfo {
    ModeInfo {
        clock: 148_500,
        hdisplay: 1920,
        hsync_start: 2008,
        hsync_end: 2052,
        htotal: 2200,
        hskew: 0,
        vdisplay: 1080,
        vsync_start: 1084,
        vsync_end: 1089,
        vtotal: 1125,
        vscan: 0,
        vrefresh: 60,
        flags: 0,
        mode_type: MODE_TYPE_PREFERRED,
        name: "1920x1080".to_string(),
    }
}

#[test]
fn test_from_mode_info_extracts_geometry() {
    let mode = DisplayMode::from_mode_info(mode_1080p60());
    assert_eq!(mode.width, 1920);
    assert_eq!(mode.height, 1080);
    assert!(mode.preferred);
    assert_eq!(mode.info.name, "1920x1080");
}

#[test]
fn test_refresh_rate_exact() {
    // 148.5 MHz / (2200 * 1125) = 60 Hz exactly
    assert_eq!(refresh_rate_mhz(&mode_1080p60()), 60_000);
}

#[test]
fn test_refresh_rate_fractional() {
    let mut info = mode_1080p60();
    info.clock = 148_352;
    // 59.94 Hz
    assert_eq!(refresh_rate_mhz(&info), 59_940);
}

#[test]
fn test_refresh_rate_interlace_doubles() {
    let mut info = mode_1080p60();
    info.flags = MODE_FLAG_INTERLACE;
    assert_eq!(refresh_rate_mhz(&info), 120_000);
}

#[test]
fn test_refresh_rate_doublescan_halves() {
    let mut info = mode_1080p60();
    info.flags = MODE_FLAG_DBLSCAN;
    assert_eq!(refresh_rate_mhz(&info), 30_000);
}

#[test]
fn test_refresh_rate_zero_totals_falls_back_to_vrefresh() {
    let mut info = mode_1080p60();
    info.htotal = 0;
    info.vrefresh = 75;
    assert_eq!(refresh_rate_mhz(&info), 75_000);
}

#[test]
fn test_non_preferred_mode() {
    let mut info = mode_1080p60();
    info.mode_type = 0;
    assert!(!DisplayMode::from_mode_info(info).preferred);
}
