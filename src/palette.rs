//! Palette construction and the per-channel quantization used when a
//! [`crate::image::PepImage`] is serialized.

use crate::format::{reformat, PepFormat};

/// The maximum number of distinct colors a PEP palette may hold.
///
/// The builder deliberately stops one short of 256 so index 255 stays free
/// for use as a reserved value in some container configurations.
pub const PALETTE_SIZE_CAP: usize = 255;

/// Palette-quantization mode, chosen at serialization time. Only affects how
/// many bytes each palette entry costs in the container; the in-memory
/// palette built by [`build_palette`] is always full 32-bit color.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ColorBits {
    One = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
}

impl ColorBits {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag & 0x03 {
            0 => Some(ColorBits::One),
            1 => Some(ColorBits::Two),
            2 => Some(ColorBits::Four),
            3 => Some(ColorBits::Eight),
            _ => unreachable!(),
        }
    }
}

/// Scans `pixels` (in `in_format`) left-to-right, top-to-bottom and builds an
/// ordered list of up to [`PALETTE_SIZE_CAP`] distinct colors, reformatted
/// into `out_format`. Consecutive identical raw pixels are coalesced before
/// the reformat/search step, matching the source's `last_p` skip.
pub fn build_palette(pixels: &[u32], in_format: PepFormat, out_format: PepFormat) -> Vec<u32> {
    let mut palette: Vec<u32> = Vec::new();
    let mut last_pixel: Option<u32> = None;

    for (i, &raw) in pixels.iter().enumerate() {
        if i > 0 && Some(raw) == last_pixel {
            continue;
        }
        last_pixel = Some(raw);

        let formatted = reformat(raw, in_format, out_format);
        if !palette.contains(&formatted) {
            if palette.len() + 1 < 256 {
                palette.push(formatted);
            } else {
                log::trace!(
                    "palette overflow: color {formatted:#010x} dropped, cap of {PALETTE_SIZE_CAP} colors reached"
                );
            }
        }
    }

    palette
}

/// Finds `color`'s index in `palette`, coercing to index 0 when absent (a
/// color can fall out of the palette only via the 255-entry cap, per
/// spec.md §4.3).
#[must_use]
pub fn palette_index(palette: &[u32], color: u32) -> u8 {
    palette
        .iter()
        .position(|&c| c == color)
        .map(|i| i as u8)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_first_seen_order() {
        let pixels = [0xAAu32, 0xBB, 0xAA, 0xCC, 0xBB, 0xDD];
        let palette = build_palette(&pixels, PepFormat::Rgba, PepFormat::Rgba);
        assert_eq!(palette, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn skips_consecutive_duplicates_without_extra_scan() {
        // A run of the same raw pixel is coalesced before the palette
        // lookup; this changes nothing observable for a palette with no
        // repeated *colors*, but the single-color case depends on it.
        let pixels = vec![0x42u32; 16];
        let palette = build_palette(&pixels, PepFormat::Rgba, PepFormat::Rgba);
        assert_eq!(palette, vec![0x42]);
    }

    #[test]
    fn caps_at_255_entries() {
        let pixels: Vec<u32> = (0..300u32).collect();
        let palette = build_palette(&pixels, PepFormat::Rgba, PepFormat::Rgba);
        assert_eq!(palette.len(), 255);
        assert_eq!(palette[0], 0);
        assert_eq!(palette[254], 254);
    }

    #[test]
    fn reformats_into_output_order() {
        let pixels = [0x1122_3344u32];
        let palette = build_palette(&pixels, PepFormat::Rgba, PepFormat::Bgra);
        assert_eq!(palette, vec![reformat(0x1122_3344, PepFormat::Rgba, PepFormat::Bgra)]);
    }

    #[test]
    fn missing_color_coerces_to_index_zero() {
        let palette = vec![0xAAu32, 0xBB, 0xCC];
        assert_eq!(palette_index(&palette, 0xBB), 1);
        assert_eq!(palette_index(&palette, 0xFF), 0);
    }
}
