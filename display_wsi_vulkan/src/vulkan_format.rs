/// Vulkan format <-> DRM fourcc conversion
///
/// DRM fourcc names describe the packed pixel in little-endian order, so the
/// component order is reversed with respect to the Vulkan name:
/// `VK_FORMAT_B8G8R8A8_UNORM` is `DRM_FORMAT_ARGB8888`.

use ash::vk;
use display_wsi::drm_fourcc::DrmFourcc;

/// Linear formats, searched first in both directions
const FOURCC_FORMAT_TABLE: &[(vk::Format, DrmFourcc)] = &[
    (vk::Format::R4G4B4A4_UNORM_PACK16, DrmFourcc::Rgba4444),
    (vk::Format::B4G4R4A4_UNORM_PACK16, DrmFourcc::Bgra4444),
    (vk::Format::R5G6B5_UNORM_PACK16, DrmFourcc::Rgb565),
    (vk::Format::B5G6R5_UNORM_PACK16, DrmFourcc::Bgr565),
    (vk::Format::R5G5B5A1_UNORM_PACK16, DrmFourcc::Rgba5551),
    (vk::Format::B5G5R5A1_UNORM_PACK16, DrmFourcc::Bgra5551),
    (vk::Format::A1R5G5B5_UNORM_PACK16, DrmFourcc::Argb1555),
    (vk::Format::R8G8B8_UNORM, DrmFourcc::Bgr888),
    (vk::Format::B8G8R8_UNORM, DrmFourcc::Rgb888),
    (vk::Format::R8G8B8A8_UNORM, DrmFourcc::Abgr8888),
    (vk::Format::B8G8R8A8_UNORM, DrmFourcc::Argb8888),
    (vk::Format::A8B8G8R8_UNORM_PACK32, DrmFourcc::Abgr8888),
    (vk::Format::A2R10G10B10_UNORM_PACK32, DrmFourcc::Argb2101010),
    (vk::Format::A2B10G10R10_UNORM_PACK32, DrmFourcc::Abgr2101010),
    (vk::Format::R16G16B16A16_SFLOAT, DrmFourcc::Abgr16161616f),
];

/// sRGB views of the same memory layouts
const SRGB_FOURCC_FORMAT_TABLE: &[(vk::Format, DrmFourcc)] = &[
    (vk::Format::R8G8B8_SRGB, DrmFourcc::Bgr888),
    (vk::Format::B8G8R8_SRGB, DrmFourcc::Rgb888),
    (vk::Format::R8G8B8A8_SRGB, DrmFourcc::Abgr8888),
    (vk::Format::B8G8R8A8_SRGB, DrmFourcc::Argb8888),
    (vk::Format::A8B8G8R8_SRGB_PACK32, DrmFourcc::Abgr8888),
];

/// DRM fourcc holding the pixels of a Vulkan format, if there is one
pub fn vk_to_drm_format(format: vk::Format) -> Option<DrmFourcc> {
    FOURCC_FORMAT_TABLE
        .iter()
        .chain(SRGB_FOURCC_FORMAT_TABLE)
        .find(|(vk_format, _)| *vk_format == format)
        .map(|(_, fourcc)| *fourcc)
}

/// Linear Vulkan format for a DRM fourcc
pub fn drm_to_vk_format(fourcc: DrmFourcc) -> Option<vk::Format> {
    FOURCC_FORMAT_TABLE
        .iter()
        .find(|(_, drm_format)| *drm_format == fourcc)
        .map(|(vk_format, _)| *vk_format)
}

/// sRGB Vulkan format for a DRM fourcc
pub fn drm_to_vk_srgb_format(fourcc: DrmFourcc) -> Option<vk::Format> {
    SRGB_FOURCC_FORMAT_TABLE
        .iter()
        .find(|(_, drm_format)| *drm_format == fourcc)
        .map(|(vk_format, _)| *vk_format)
}

/// Bytes per pixel of the single-plane formats the layer can allocate
pub fn fourcc_bytes_per_pixel(fourcc: DrmFourcc) -> Option<u32> {
    match fourcc {
        DrmFourcc::Rgb332 | DrmFourcc::Bgr233 => Some(1),
        DrmFourcc::Xrgb4444
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
        | DrmFourcc::Bgr565 => Some(2),
        DrmFourcc::Rgb888 | DrmFourcc::Bgr888 => Some(3),
        DrmFourcc::Xrgb8888
        | DrmFourcc::Xbgr8888
        | DrmFourcc::Rgbx8888
        | DrmFourcc::Bgrx8888
        | DrmFourcc::Argb8888
        | DrmFourcc::Abgr8888
        | DrmFourcc::Rgba8888
        | DrmFourcc::Bgra8888
        | DrmFourcc::Argb2101010
        | DrmFourcc::Abgr2101010 => Some(4),
        DrmFourcc::Abgr16161616f => Some(8),
        _ => None,
    }
}

#[cfg(test)]
#[path = "vulkan_format_tests.rs"]
mod tests;
