//! Unit tests for dma_heap_allocator.rs
//!
//! Geometry only: no DMA-BUF heap is opened.

use super::*;
use display_wsi::drm_fourcc::DrmFourcc;
use display_wsi::wsi::allocator::FormatFlags;

fn format(fourcc: DrmFourcc, modifier: DrmModifier) -> AllocFormat {
    AllocFormat { fourcc, modifier, flags: FormatFlags::empty() }
}

// ============================================================================
// VALIDATION
// ============================================================================

#[test]
fn test_empty_candidates_are_invalid() {
    assert_eq!(compute_layout(&[], 64, 64), Err(AllocError::Invalid));
}

#[test]
fn test_dimension_limits() {
    let formats = [format(DrmFourcc::Xrgb8888, DrmModifier::Linear)];
    assert_eq!(compute_layout(&formats, 0, 64), Err(AllocError::Invalid));
    assert_eq!(compute_layout(&formats, 64, 0), Err(AllocError::Invalid));
    assert_eq!(compute_layout(&formats, MAX_IMAGE_SIZE + 1, 1), Err(AllocError::Invalid));
    assert!(compute_layout(&formats, MAX_IMAGE_SIZE, 1).is_ok());
}

#[test]
fn test_tiled_and_multi_plane_not_supported() {
    let formats = [
        format(DrmFourcc::Xrgb8888, DrmModifier::I915_x_tiled),
        format(DrmFourcc::Nv12, DrmModifier::Linear),
    ];
    assert_eq!(compute_layout(&formats, 64, 64), Err(AllocError::NotSupported));
}

#[test]
fn test_protected_request_needs_protected_heap() {
    assert_eq!(check_protected_support(true, false), Err(AllocError::NoResource));
    assert_eq!(check_protected_support(true, true), Ok(()));
    assert_eq!(check_protected_support(false, false), Ok(()));
}

// ============================================================================
// GEOMETRY
// ============================================================================

#[test]
fn test_first_usable_candidate_wins() {
    let formats = [
        format(DrmFourcc::Xrgb8888, DrmModifier::I915_y_tiled),
        format(DrmFourcc::Rgb565, DrmModifier::Linear),
        format(DrmFourcc::Xrgb8888, DrmModifier::Linear),
    ];

    let layout = compute_layout(&formats, 100, 10).unwrap();

    assert_eq!(layout.format.fourcc, DrmFourcc::Rgb565);
}

#[test]
fn test_stride_aligned_to_64_bytes() {
    let formats = [format(DrmFourcc::Xrgb8888, DrmModifier::Linear)];

    let layout = compute_layout(&formats, 100, 10).unwrap();

    // 400 bytes of pixels rounded up to 448
    assert_eq!(layout.stride, 448);
    assert_eq!(layout.size, 448 * 10);
}

#[test]
fn test_aligned_width_keeps_packed_stride() {
    let formats = [format(DrmFourcc::Argb8888, DrmModifier::Linear)];

    let layout = compute_layout(&formats, 1920, 1080).unwrap();

    assert_eq!(layout.stride, 1920 * 4);
    assert_eq!(layout.size, 1920 * 4 * 1080);
}

#[test]
fn test_three_byte_pixels() {
    let formats = [format(DrmFourcc::Bgr888, DrmModifier::Linear)];

    let layout = compute_layout(&formats, 10, 2).unwrap();

    assert_eq!(layout.stride, 64);
    assert_eq!(layout.size, 128);
}
