//! Unit tests for format_negotiation.rs
//!
//! Tests display filtering, limit checks and importable/exportable
//! classification.

use super::*;
use std::sync::Arc;
use crate::mock_display::{mock_display, xrgb, xrgb_desc, MockDeviceDispatch, MockKmsDevice};
use crate::swapchain::Extent3D;

const X_TILED: DrmModifier = DrmModifier::I915_x_tiled;
const Y_TILED: DrmModifier = DrmModifier::I915_y_tiled;

fn modifier(modifier: DrmModifier, supports_disjoint: bool) -> ModifierProperties {
    ModifierProperties { modifier, plane_count: 1, supports_disjoint }
}

fn display_with(formats: &[DrmFormat]) -> DrmDisplay {
    mock_display(Arc::new(MockKmsDevice::new()), formats.iter().copied(), true)
}

// ============================================================================
// FILTERING TESTS
// ============================================================================

#[test]
fn test_only_display_supported_modifiers_kept() {
    let dispatch = MockDeviceDispatch::with_modifiers(vec![
        modifier(DrmModifier::Linear, false),
        modifier(X_TILED, false),
        modifier(Y_TILED, false),
    ]);
    let display = display_with(&[xrgb(DrmModifier::Linear), xrgb(Y_TILED)]);

    let formats = surface_compatible_formats(&dispatch, &display, &xrgb_desc(1920, 1080), None).unwrap();

    let importable: Vec<_> = formats.importable.iter().map(|f| f.modifier).collect();
    assert_eq!(importable, vec![DrmModifier::Linear, Y_TILED]);
    assert_eq!(formats.exportable_modifiers, vec![DrmModifier::Linear, Y_TILED]);
    assert_eq!(formats.modifier_properties.len(), 3);
}

#[test]
fn test_no_common_modifier_returns_empty_lists() {
    let dispatch = MockDeviceDispatch::with_modifiers(vec![modifier(X_TILED, false)]);
    let display = display_with(&[xrgb(DrmModifier::Linear)]);

    let formats = surface_compatible_formats(&dispatch, &display, &xrgb_desc(1920, 1080), None).unwrap();

    assert!(formats.importable.is_empty());
    assert!(formats.exportable_modifiers.is_empty());
}

#[test]
fn test_failed_capability_query_skips_modifier() {
    let dispatch = MockDeviceDispatch::with_modifiers(vec![
        modifier(DrmModifier::Linear, false),
        modifier(X_TILED, false),
    ]);
    dispatch.override_external(DrmModifier::Linear, None);
    let display = display_with(&[xrgb(DrmModifier::Linear), xrgb(X_TILED)]);

    let formats = surface_compatible_formats(&dispatch, &display, &xrgb_desc(64, 64), None).unwrap();

    assert_eq!(formats.importable.len(), 1);
    assert_eq!(formats.importable[0].modifier, X_TILED);
}

// ============================================================================
// LIMIT TESTS
// ============================================================================

fn limited(f: impl FnOnce(&mut ExternalImageFormatProperties)) -> usize {
    let dispatch = MockDeviceDispatch::new();
    f(&mut dispatch.external.lock().unwrap());
    let display = display_with(&[xrgb(DrmModifier::Linear)]);
    let mut desc = xrgb_desc(1920, 1080);
    desc.mip_levels = 1;
    desc.array_layers = 1;
    surface_compatible_formats(&dispatch, &display, &desc, None).unwrap().importable.len()
}

#[test]
fn test_extent_limits() {
    assert_eq!(limited(|p| p.max_extent = Extent3D { width: 1024, height: 4096, depth: 1 }), 0);
    assert_eq!(limited(|p| p.max_extent = Extent3D { width: 4096, height: 1024, depth: 1 }), 0);
    assert_eq!(limited(|p| p.max_extent = Extent3D { width: 1920, height: 1080, depth: 1 }), 1);
}

#[test]
fn test_mip_and_array_limits() {
    assert_eq!(limited(|p| p.max_mip_levels = 0), 0);
    assert_eq!(limited(|p| p.max_array_layers = 0), 0);
}

#[test]
fn test_sample_count_limits() {
    assert_eq!(limited(|p| p.sample_counts = 0x4), 0);
    assert_eq!(limited(|p| p.sample_counts = 0x1 | 0x4), 1);
}

// ============================================================================
// CLASSIFICATION TESTS
// ============================================================================

#[test]
fn test_import_only_and_export_only() {
    let dispatch = MockDeviceDispatch::with_modifiers(vec![
        modifier(DrmModifier::Linear, false),
        modifier(X_TILED, false),
    ]);
    let base = *dispatch.external.lock().unwrap();
    dispatch.override_external(
        DrmModifier::Linear,
        Some(ExternalImageFormatProperties { external_features: ExternalMemoryFeatures::IMPORTABLE, ..base }),
    );
    dispatch.override_external(
        X_TILED,
        Some(ExternalImageFormatProperties { external_features: ExternalMemoryFeatures::EXPORTABLE, ..base }),
    );
    let display = display_with(&[xrgb(DrmModifier::Linear), xrgb(X_TILED)]);

    let formats = surface_compatible_formats(&dispatch, &display, &xrgb_desc(64, 64), None).unwrap();

    assert_eq!(formats.importable.len(), 1);
    assert_eq!(formats.importable[0].modifier, DrmModifier::Linear);
    assert_eq!(formats.exportable_modifiers, vec![X_TILED]);
}

#[test]
fn test_non_disjoint_flag_follows_tiling_feature() {
    let dispatch = MockDeviceDispatch::with_modifiers(vec![
        modifier(DrmModifier::Linear, true),
        modifier(X_TILED, false),
    ]);
    let display = display_with(&[xrgb(DrmModifier::Linear), xrgb(X_TILED)]);

    let formats = surface_compatible_formats(&dispatch, &display, &xrgb_desc(64, 64), None).unwrap();

    assert_eq!(formats.importable[0].flags, FormatFlags::empty());
    assert_eq!(formats.importable[1].flags, FormatFlags::NON_DISJOINT);
    assert!(formats.importable.iter().all(|f| f.fourcc == drm_fourcc::DrmFourcc::Xrgb8888));
}
