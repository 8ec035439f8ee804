//! The container type and the four core operations that move between raw
//! pixels, an in-memory [`PepImage`], and its serialized byte form.

use std::path::Path;

use crate::coder::{Decoder, Encoder};
use crate::error::{PepError, Result};
use crate::format::{reformat, PepFormat};
use crate::model::{Coding, PpmModel, FREQ_END};
use crate::pack::{bits_per_index, indices_per_byte, unpack_symbol};
use crate::palette::{build_palette, palette_index, ColorBits};

/// The in-memory descriptor for a compressed PEP image: geometry, palette,
/// and the arithmetic-coded payload. See spec.md §3 for the full invariant
/// list; the short version is that `palette.len() < 256` always, and an
/// image with an empty `payload` must never be serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct PepImage {
    pub width: u16,
    pub height: u16,
    pub format: PepFormat,
    pub palette: Vec<u32>,
    /// The largest packed-symbol byte seen during compression; bounds the
    /// decoder's PPM table scan (see spec.md §9's "Open question" note).
    pub max_symbols: u8,
    /// Palette quantization to use at serialization time. Only chosen by
    /// the caller after `compress`, before `serialize`/`save`.
    pub color_bits: ColorBits,
    pub payload: Vec<u8>,
}

impl PepImage {
    /// Drops the payload early, for API parity with the reference's explicit
    /// `pep_free`. Rust's ownership already does this when the value is
    /// dropped; this exists so ports of callers that expect an explicit
    /// `free` step have something to call.
    pub fn free(self) {
        drop(self);
    }
}

/// Compresses a rectangular raster of 32-bit colors into a [`PepImage`].
///
/// `pixels` must be in `in_format`; the constructed palette (and the stored
/// `format`) will be in `out_format`. Returns [`PepError::InvalidInput`] if
/// `pixels` is empty or its length doesn't match `width * height`.
pub fn compress(
    pixels: &[u32],
    width: u16,
    height: u16,
    in_format: PepFormat,
    out_format: PepFormat,
) -> Result<PepImage> {
    let area = width as usize * height as usize;
    if area == 0 {
        return Err(PepError::InvalidInput("width and height must both be >= 1"));
    }
    if pixels.is_empty() {
        return Err(PepError::InvalidInput("pixel buffer must not be empty"));
    }
    if pixels.len() != area {
        return Err(PepError::InvalidInput(
            "pixel buffer length does not match width * height",
        ));
    }

    let palette = build_palette(pixels, in_format, out_format);
    let bpi = bits_per_index(palette.len().max(1));
    let per_byte = indices_per_byte(bpi);

    let mut model = PpmModel::new();
    let mut encoder = Encoder::new();
    let mut max_symbols: u8 = 0;

    let mut symbol: u8 = 0;
    let mut indices_in_byte: u8 = 0;

    let flush_symbol = |symbol: u8,
                        model: &mut PpmModel,
                        encoder: &mut Encoder,
                        max_symbols: &mut u8| {
        if symbol > *max_symbols {
            *max_symbols = symbol;
        }
        match model.code_symbol(symbol) {
            Coding::Direct { low, high, scale } => {
                encoder.encode((low, high, scale));
            }
            Coding::Fallback {
                escape,
                low,
                high,
                scale,
            } => {
                if let Some((elo, ehi, escale)) = escape {
                    encoder.encode((elo, ehi, escale));
                }
                encoder.encode((low, high, scale));
            }
        }
    };

    for &raw in pixels {
        let formatted = reformat(raw, in_format, out_format);
        let index = palette_index(&palette, formatted);
        symbol |= index << (indices_in_byte * bpi);
        indices_in_byte += 1;

        if indices_in_byte >= per_byte {
            flush_symbol(symbol, &mut model, &mut encoder, &mut max_symbols);
            symbol = 0;
            indices_in_byte = 0;
        }
    }
    if indices_in_byte > 0 {
        flush_symbol(symbol, &mut model, &mut encoder, &mut max_symbols);
    }

    Ok(PepImage {
        width,
        height,
        format: out_format,
        palette,
        max_symbols,
        color_bits: ColorBits::Eight,
        payload: encoder.finish(),
    })
}

/// Decompresses `image` into a pixel buffer in `out_format`.
///
/// When `transparent_first_color` is set, the alpha byte of `palette[0]` is
/// cleared before expansion (the alpha byte's position depends on
/// `image.format`: byte 0 for RGBA/BGRA, byte 3 for ABGR/ARGB).
pub fn decompress(image: &PepImage, out_format: PepFormat, transparent_first_color: bool) -> Result<Vec<u32>> {
    if image.payload.is_empty() || image.width == 0 || image.height == 0 {
        return Err(PepError::InvalidInput(
            "cannot decompress an image with an empty payload or zero geometry",
        ));
    }

    let area = image.width as usize * image.height as usize;
    let bpi = bits_per_index(image.palette.len().max(1));
    let per_byte = indices_per_byte(bpi);
    // Ceiling, not floor: the encoder emits a final partial packed symbol
    // whenever indices_per_byte doesn't evenly divide the pixel count, and
    // this bound has to visit it too or the tail of the raster is lost.
    let packed_count = area.div_ceil(per_byte as usize);

    let mut palette = image.palette.clone();
    if transparent_first_color {
        if let Some(first) = palette.first_mut() {
            *first = if image.format <= PepFormat::Bgra {
                *first & 0xffff_ff00
            } else {
                *first & 0x00ff_ffff
            };
        }
    }

    let mut model = PpmModel::new();
    let mut decoder = Decoder::new(&image.payload);
    let max_symbol = image.max_symbols as usize + 1;

    let mut out = Vec::with_capacity(area);

    for b in 0..packed_count {
        let context_live = model.context_is_live();
        let scale = model.current_scale();
        let target = decoder.target(scale);

        let symbol = if context_live {
            let (s, low, high) = model.find_in_context(target, max_symbol);
            decoder.consume((low, high, scale));

            if s != FREQ_END {
                model.apply_direct(s);
                s
            } else {
                model.apply_escape();
                let scale0 = model.current_scale();
                let target0 = decoder.target(scale0);
                let (s0, low0, high0) = model.find_in_order0(target0, max_symbol);
                decoder.consume((low0, high0, scale0));
                model.apply_fallback(s0);
                s0
            }
        } else {
            let (s0, low0, high0) = model.find_in_order0(target, max_symbol);
            decoder.consume((low0, high0, scale));
            model.apply_fallback(s0);
            s0
        };

        let remaining = area - b * per_byte as usize;
        let mut indices = Vec::with_capacity(per_byte as usize);
        unpack_symbol(symbol as u8, bpi, remaining, &mut indices);
        for index in indices {
            let color = palette.get(index as usize).copied().unwrap_or(0);
            out.push(reformat(color, image.format, out_format));
        }
    }

    Ok(out)
}

/// Serializes `image` into the container byte layout described in spec.md
/// §4.6: a header, the quantized palette, and the raw payload.
pub fn serialize(image: &PepImage) -> Result<Vec<u8>> {
    if image.payload.is_empty() || image.width == 0 || image.height == 0 {
        return Err(PepError::InvalidInput(
            "cannot serialize an image with an empty payload or zero geometry",
        ));
    }
    let palette_count = image.palette.len();
    if palette_count == 0 || palette_count > 255 {
        return Err(PepError::InvalidInput("palette must hold 1..=255 colors"));
    }

    let mut out = Vec::new();

    out.push((image.format as u8 & 0x07) | ((image.color_bits as u8 & 0x03) << 3));
    out.push(palette_count as u8);

    let packed_dims = ((image.width as u32 & 0xFFF) << 12) | (image.height as u32 & 0xFFF);
    out.push((packed_dims >> 16) as u8);
    out.push((packed_dims >> 8) as u8);
    out.push(packed_dims as u8);

    let mut len = image.payload.len() as u32;
    loop {
        if len >= 0x80 {
            out.push(((len & 0x7F) as u8) | 0x80);
            len >>= 7;
        } else {
            out.push(len as u8);
            break;
        }
    }

    out.push(image.max_symbols);

    write_palette(&mut out, &image.palette, image.color_bits);
    out.extend_from_slice(&image.payload);

    Ok(out)
}

fn write_palette(out: &mut Vec<u8>, palette: &[u32], color_bits: ColorBits) {
    match color_bits {
        ColorBits::Eight => {
            for &c in palette {
                out.extend_from_slice(&c.to_be_bytes());
            }
        }
        ColorBits::Four => {
            for &c in palette {
                let ch0 = (c >> 24) as u8;
                let ch1 = (c >> 16) as u8;
                let ch2 = (c >> 8) as u8;
                let ch3 = c as u8;
                out.push((ch1 & 0xF0) | (ch0 >> 4));
                out.push((ch3 & 0xF0) | (ch2 >> 4));
            }
        }
        ColorBits::Two => {
            for &c in palette {
                let ch0 = (c >> 24) as u8;
                let ch1 = (c >> 16) as u8;
                let ch2 = (c >> 8) as u8;
                let ch3 = c as u8;
                out.push((ch0 & 0xC0) | ((ch1 & 0xC0) >> 2) | ((ch2 & 0xC0) >> 4) | ((ch3 & 0xC0) >> 6));
            }
        }
        ColorBits::One => {
            for pair in palette.chunks(2) {
                let c1 = pair[0];
                let c2 = pair.get(1).copied().unwrap_or(0);
                let bit = |c: u32, shift: u32| -> u8 { if (c >> shift) & 0x80 != 0 { 1 } else { 0 } };
                let mut byte = 0u8;
                byte |= bit(c1, 24) << 7;
                byte |= bit(c1, 16) << 6;
                byte |= bit(c1, 8) << 5;
                byte |= bit(c1, 0) << 4;
                byte |= bit(c2, 24) << 3;
                byte |= bit(c2, 16) << 2;
                byte |= bit(c2, 8) << 1;
                byte |= bit(c2, 0);
                out.push(byte);
            }
        }
    }
}

fn read_palette(bytes: &[u8], count: usize, color_bits: ColorBits) -> Result<(Vec<u32>, usize)> {
    let mut palette = Vec::with_capacity(count);
    let mut pos = 0usize;

    let need = |pos: usize, n: usize| -> Result<()> {
        if pos + n > bytes.len() {
            Err(PepError::MalformedContainer("truncated palette"))
        } else {
            Ok(())
        }
    };

    match color_bits {
        ColorBits::Eight => {
            for _ in 0..count {
                need(pos, 4)?;
                let c = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap());
                palette.push(c);
                pos += 4;
            }
        }
        ColorBits::Four => {
            for _ in 0..count {
                need(pos, 2)?;
                let b1 = bytes[pos];
                let b2 = bytes[pos + 1];
                pos += 2;
                let nib = |x: u8| (x & 0x0F) | ((x & 0x0F) << 4);
                let hi = |x: u8| (x & 0xF0) | ((x & 0xF0) >> 4);
                let ch0 = nib(b1);
                let ch1 = hi(b1);
                let ch2 = nib(b2);
                let ch3 = hi(b2);
                palette.push(u32::from_be_bytes([ch0, ch1, ch2, ch3]));
            }
        }
        ColorBits::Two => {
            for _ in 0..count {
                need(pos, 1)?;
                let b = bytes[pos];
                pos += 1;
                let expand = |bits: u8| bits.wrapping_mul(0x55);
                let ch0 = expand((b >> 6) & 0x03);
                let ch1 = expand((b >> 4) & 0x03);
                let ch2 = expand((b >> 2) & 0x03);
                let ch3 = expand(b & 0x03);
                palette.push(u32::from_be_bytes([ch0, ch1, ch2, ch3]));
            }
        }
        ColorBits::One => {
            let mut i = 0;
            while i < count {
                need(pos, 1)?;
                let b = bytes[pos];
                pos += 1;
                let flag = |set: bool| -> u8 { if set { 0xFF } else { 0x00 } };
                palette.push(u32::from_be_bytes([
                    flag(b & 0x80 != 0),
                    flag(b & 0x40 != 0),
                    flag(b & 0x20 != 0),
                    flag(b & 0x10 != 0),
                ]));
                i += 1;
                if i < count {
                    palette.push(u32::from_be_bytes([
                        flag(b & 0x08 != 0),
                        flag(b & 0x04 != 0),
                        flag(b & 0x02 != 0),
                        flag(b & 0x01 != 0),
                    ]));
                    i += 1;
                }
            }
        }
    }

    Ok((palette, pos))
}

/// Parses a container byte sequence back into a [`PepImage`]. Rejects
/// truncated headers, zero geometry, and zero payload length, matching
/// spec.md §7's "malformed container" failure kind.
pub fn deserialize(bytes: &[u8]) -> Result<PepImage> {
    if bytes.len() < 6 {
        return Err(PepError::MalformedContainer("header is shorter than the minimum 6 bytes"));
    }

    let mut pos = 0usize;
    let packed_flags = bytes[pos];
    pos += 1;
    let format = PepFormat::from_tag(packed_flags & 0x07)
        .ok_or(PepError::MalformedContainer("unrecognized channel format tag"))?;
    let color_bits = ColorBits::from_tag((packed_flags >> 3) & 0x03)
        .ok_or(PepError::MalformedContainer("unrecognized color-bits tag"))?;

    let palette_size = bytes[pos];
    pos += 1;
    if palette_size == 0 {
        return Err(PepError::MalformedContainer("palette_size of 0 is not a supported encoding"));
    }

    let packed_dims = ((bytes[pos] as u32) << 16) | ((bytes[pos + 1] as u32) << 8) | bytes[pos + 2] as u32;
    pos += 3;
    let width = (packed_dims >> 12) as u16;
    let height = (packed_dims & 0xFFF) as u16;
    if width == 0 || height == 0 {
        return Err(PepError::MalformedContainer("geometry of zero is not a valid image"));
    }

    let mut payload_len: u32 = 0;
    let mut shift = 0u32;
    let mut leb_consumed = 0usize;
    loop {
        if pos >= bytes.len() {
            return Err(PepError::MalformedContainer("payload length runs past end of header"));
        }
        if leb_consumed >= 5 {
            return Err(PepError::MalformedContainer("payload length LEB128 exceeds its 5-byte bound"));
        }
        let byte = bytes[pos];
        pos += 1;
        leb_consumed += 1;
        payload_len |= ((byte & 0x7F) as u32) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if payload_len == 0 {
        return Err(PepError::MalformedContainer("payload length of zero is invalid"));
    }

    if pos >= bytes.len() {
        return Err(PepError::MalformedContainer("header truncated before max_symbols"));
    }
    let max_symbols = bytes[pos];
    pos += 1;

    let (palette, consumed) = read_palette(&bytes[pos..], palette_size as usize, color_bits)?;
    pos += consumed;

    let payload_len = payload_len as usize;
    if pos + payload_len > bytes.len() {
        return Err(PepError::MalformedContainer("payload shorter than declared length"));
    }
    let payload = bytes[pos..pos + payload_len].to_vec();

    Ok(PepImage {
        width,
        height,
        format,
        palette,
        max_symbols,
        color_bits,
        payload,
    })
}

/// Serializes and writes `image` to `path`.
pub fn save(image: &PepImage, path: impl AsRef<Path>) -> Result<()> {
    let bytes = serialize(image)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Reads and deserializes a `.pep` file from `path`.
pub fn load(path: impl AsRef<Path>) -> Result<PepImage> {
    let bytes = std::fs::read(path)?;
    deserialize(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn round_trip(pixels: &[u32], width: u16, height: u16) {
        let image = compress(pixels, width, height, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        let decoded = decompress(&image, PepFormat::Rgba, false).unwrap();
        assert_eq!(decoded, pixels, "round trip mismatch for {width}x{height}");
    }

    #[test]
    fn single_pixel_round_trips() {
        let pixels = [0xFF0000FFu32];
        let image = compress(&pixels, 1, 1, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        assert_eq!(image.palette.len(), 1);
        assert_eq!(bits_per_index(image.palette.len()), 1);
        round_trip(&pixels, 1, 1);
    }

    #[test]
    fn checkerboard_round_trips() {
        let pixels = [0x000000FFu32, 0xFFFFFFFFu32, 0xFFFFFFFFu32, 0x000000FFu32];
        let image = compress(&pixels, 2, 2, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        assert_eq!(image.palette.len(), 2);
        round_trip(&pixels, 2, 2);
    }

    #[test]
    fn single_color_raster_round_trips() {
        let pixels = vec![0x1234_5678u32; 16 * 16];
        let image = compress(&pixels, 16, 16, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        assert_eq!(image.palette.len(), 1);
        round_trip(&pixels, 16, 16);
    }

    fn gradient(w: u16, h: u16) -> Vec<u32> {
        let mut pixels = Vec::with_capacity(w as usize * h as usize);
        for y in 0..h {
            for x in 0..w {
                let r = (x as u32 * 8) & 0xFF;
                let g = (y as u32 * 8) & 0xFF;
                let b = if ((x >> 3) ^ (y >> 3)) & 1 != 0 { 32 } else { 200 };
                pixels.push((r << 24) | (g << 16) | (b << 8) | 255);
            }
        }
        pixels
    }

    #[test]
    fn gradient_round_trips_and_is_deterministic() {
        let pixels = gradient(32, 32);
        let image_a = compress(&pixels, 32, 32, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        let image_b = compress(&pixels, 32, 32, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        assert_eq!(image_a.payload, image_b.payload, "encoding must be deterministic");
        assert!(!image_a.payload.is_empty());
        round_trip(&pixels, 32, 32);
    }

    #[test]
    fn cross_format_decode_matches_permutation() {
        let pixels = gradient(8, 8);
        let image = compress(&pixels, 8, 8, PepFormat::Rgba, PepFormat::Bgra).unwrap();
        let decoded = decompress(&image, PepFormat::Argb, false).unwrap();
        let expected: Vec<u32> = pixels
            .iter()
            .map(|&p| reformat(p, PepFormat::Rgba, PepFormat::Argb))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn transparent_first_color_only_touches_first_palette_entry() {
        let pixels = [0x11223344u32, 0x55667788, 0x11223344, 0x99AABBCC];
        let image = compress(&pixels, 2, 2, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        let plain = decompress(&image, PepFormat::Rgba, false).unwrap();
        let transparent = decompress(&image, PepFormat::Rgba, true).unwrap();

        for (i, (&p, &t)) in plain.iter().zip(transparent.iter()).enumerate() {
            if p == 0x11223344 {
                assert_eq!(t, 0x11223300, "pixel {i} should have alpha cleared");
            } else {
                assert_eq!(t, p, "pixel {i} should be untouched");
            }
        }
    }

    #[test]
    fn serialize_deserialize_round_trips() {
        let pixels = gradient(16, 16);
        let image = compress(&pixels, 16, 16, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        let bytes = serialize(&image).unwrap();
        let back = deserialize(&bytes).unwrap();
        assert_eq!(back, image);
    }

    #[test]
    fn color_bits_four_round_trips_for_4bit_palette() {
        // Channels whose low nibble is already zero survive 4-bit quantization
        // exactly (nibble-doubling reproduces them).
        let pixels = [0x10203000u32, 0x40506000, 0x70809000];
        let mut image = compress(&pixels, 3, 1, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        image.color_bits = ColorBits::Four;
        let bytes = serialize(&image).unwrap();
        let back = deserialize(&bytes).unwrap();
        assert_eq!(back.palette, image.palette);
        let decoded = decompress(&back, PepFormat::Rgba, false).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn invalid_input_rejected() {
        assert!(compress(&[], 0, 0, PepFormat::Rgba, PepFormat::Rgba).is_err());
        assert!(compress(&[1, 2, 3], 2, 2, PepFormat::Rgba, PepFormat::Rgba).is_err());
    }

    #[test]
    fn deserialize_rejects_truncated_header() {
        assert!(deserialize(&[1, 2, 3]).is_err());
    }

    #[test]
    fn deserialize_rejects_zero_geometry() {
        // format/color_bits byte, palette_size=1, width=0 height=0 dims.
        let bytes = [0u8, 1, 0, 0, 0, 1, 0, 0xAA, 0xBB, 0xCC, 0xDD];
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn randomized_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..30 {
            let w: u16 = rng.gen_range(1..12);
            let h: u16 = rng.gen_range(1..12);
            let palette_size: usize = rng.gen_range(1..40);
            let palette: Vec<u32> = (0..palette_size).map(|_| rng.gen()).collect();
            let pixels: Vec<u32> = (0..(w as usize * h as usize))
                .map(|_| palette[rng.gen_range(0..palette_size)])
                .collect();
            round_trip(&pixels, w, h);
        }
    }

    #[test]
    fn trailing_partial_packed_symbol_round_trips() {
        // 10 pixels at bits_per_index=1 (indices_per_byte=8) packs into two
        // symbols, the second holding only 2 real indices plus padding.
        let pixels = [
            0x11111111u32, 0x22222222, 0x11111111, 0x22222222, 0x11111111, 0x22222222, 0x11111111,
            0x22222222, 0x11111111, 0x22222222,
        ];
        let image = compress(&pixels, 10, 1, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        assert_eq!(bits_per_index(image.palette.len()), 1);
        round_trip(&pixels, 10, 1);
    }

    #[test]
    fn max_symbols_boundary_when_symbol_255_occurs() {
        // Force bits_per_index = 8 (indices_per_byte = 1) with a palette
        // large enough that a packed symbol of 255 can occur, exercising
        // max_symbols + 1 == 256 in the decoder's scan bound.
        let palette_colors: Vec<u32> = (0..256u32).collect();
        let mut pixels = vec![0u32; 256];
        for (i, slot) in pixels.iter_mut().enumerate() {
            *slot = palette_colors[i];
        }
        let image = compress(&pixels, 256, 1, PepFormat::Rgba, PepFormat::Rgba).unwrap();
        assert_eq!(image.max_symbols, 255);
        round_trip(&pixels, 256, 1);
    }
}
