/// Format negotiation between the device, the display and the allocator
///
/// Walks every modifier the device reports for the requested format, keeps
/// the ones the display can scan out and whose limits fit the request, and
/// sorts them into importable and exportable sets.

use drm_fourcc::{DrmFormat, DrmModifier};

use crate::allocator::{AllocFormat, FormatFlags};
use crate::display::DrmDisplay;
use crate::error::Result;
use crate::swapchain::{
    CompressionControl, DeviceDispatch, ExternalImageFormatProperties, ExternalMemoryFeatures, ImageDesc,
    ModifierProperties,
};

/// Formats usable for a swapchain on this display
#[derive(Debug, Clone, Default)]
pub struct CompatibleFormats {
    /// Candidates the device can import from the allocator, in device order
    pub importable: Vec<AllocFormat>,
    /// Modifiers the device could allocate and export itself
    pub exportable_modifiers: Vec<DrmModifier>,
    /// Every modifier the device reported for the format
    pub modifier_properties: Vec<ModifierProperties>,
}

/// Whether the limits of a format/modifier combination cover the request
fn fits_limits(props: &ExternalImageFormatProperties, desc: &ImageDesc) -> bool {
    if props.max_extent.width < desc.extent.width
        || props.max_extent.height < desc.extent.height
        || props.max_extent.depth < desc.extent.depth
    {
        return false;
    }
    if props.max_mip_levels < desc.mip_levels || props.max_array_layers < desc.array_layers {
        return false;
    }
    props.sample_counts & desc.samples == desc.samples
}

/// Negotiate the formats usable for `desc`
///
/// An empty importable list is not an error here; the caller decides.
///
/// # Errors
///
/// Propagates a failing modifier query. Returns `OutOfHostMemory` if a
/// result list cannot grow.
pub fn surface_compatible_formats(
    dispatch: &dyn DeviceDispatch,
    display: &DrmDisplay,
    desc: &ImageDesc,
    compression: Option<&CompressionControl>,
) -> Result<CompatibleFormats> {
    let modifier_properties = dispatch.drm_format_modifier_properties(desc.api_format).map_err(|err| {
        crate::wsi_error!("wsi::swapchain", "Failed to get format properties: {}", err);
        err
    })?;

    let mut importable = Vec::new();
    let mut exportable_modifiers = Vec::new();

    for prop in &modifier_properties {
        let drm_format = DrmFormat { code: desc.fourcc, modifier: prop.modifier };
        if !display.is_format_supported(&drm_format) {
            continue;
        }

        let external = match dispatch.external_image_format_properties(desc, prop.modifier, compression) {
            Ok(external) => external,
            Err(err) => {
                crate::wsi_trace!("wsi::swapchain", "Skipping modifier {:?}: {}", prop.modifier, err);
                continue;
            }
        };
        if !fits_limits(&external, desc) {
            continue;
        }

        if external.external_features.contains(ExternalMemoryFeatures::EXPORTABLE) {
            exportable_modifiers.try_reserve(1)?;
            exportable_modifiers.push(prop.modifier);
        }

        if external.external_features.contains(ExternalMemoryFeatures::IMPORTABLE) {
            let flags = if prop.supports_disjoint { FormatFlags::empty() } else { FormatFlags::NON_DISJOINT };
            importable.try_reserve(1)?;
            importable.push(AllocFormat { fourcc: desc.fourcc, modifier: prop.modifier, flags });
        }
    }

    crate::wsi_debug!(
        "wsi::swapchain",
        "{:?}: {} modifiers reported, {} importable, {} exportable",
        desc.fourcc,
        modifier_properties.len(),
        importable.len(),
        exportable_modifiers.len()
    );

    Ok(CompatibleFormats { importable, exportable_modifiers, modifier_properties })
}

#[cfg(test)]
#[path = "format_negotiation_tests.rs"]
mod tests;
