//! BMP / RLE8-BMP writers used by the `to-bmp` and `to-rle-bmp` CLI
//! subcommands. Hand-rolled: no pack example ships a BMP *encoder*, and the
//! format is a pair of fixed-size headers plus either raw 32bpp pixel data
//! or an RLE8 byte stream, so a crate dependency would buy little here.

use crate::format::PepFormat;

const FILE_HEADER_SIZE: u32 = 14;
const INFO_HEADER_SIZE: u32 = 40;
const PIXELS_PER_METER: u32 = 2835; // 72 DPI

fn file_header(data_offset: u32, file_size: u32) -> [u8; 14] {
    let mut bf = [0u8; 14];
    bf[0] = b'B';
    bf[1] = b'M';
    bf[2..6].copy_from_slice(&file_size.to_le_bytes());
    bf[10..14].copy_from_slice(&data_offset.to_le_bytes());
    bf
}

fn info_header(width: u32, height: u32, bit_count: u16, compression: u32, image_size: u32, colors_used: u32) -> [u8; 40] {
    let mut bi = [0u8; 40];
    bi[0..4].copy_from_slice(&INFO_HEADER_SIZE.to_le_bytes());
    bi[4..8].copy_from_slice(&width.to_le_bytes());
    bi[8..12].copy_from_slice(&height.to_le_bytes()); // positive => bottom-up
    bi[12..14].copy_from_slice(&1u16.to_le_bytes()); // planes
    bi[14..16].copy_from_slice(&bit_count.to_le_bytes());
    bi[16..20].copy_from_slice(&compression.to_le_bytes());
    bi[20..24].copy_from_slice(&image_size.to_le_bytes());
    bi[24..28].copy_from_slice(&PIXELS_PER_METER.to_le_bytes());
    bi[28..32].copy_from_slice(&PIXELS_PER_METER.to_le_bytes());
    bi[32..36].copy_from_slice(&colors_used.to_le_bytes());
    bi
}

/// Writes an uncompressed 32-bit BMP from RGBA pixels (row-major, top-down).
/// BMP rows are bottom-up and BGRA-ordered, so both are flipped here.
pub fn write_bmp32(pixels: &[u32], width: u32, height: u32) -> Vec<u8> {
    let row_bytes = width * 4;
    let pixel_bytes = row_bytes * height;
    let data_offset = FILE_HEADER_SIZE + INFO_HEADER_SIZE;
    let file_size = data_offset + pixel_bytes;

    let mut out = Vec::with_capacity(file_size as usize);
    out.extend_from_slice(&file_header(data_offset, file_size));
    out.extend_from_slice(&info_header(width, height, 32, 0, pixel_bytes, 0));

    for y in (0..height).rev() {
        for x in 0..width {
            let v = pixels[(y * width + x) as usize];
            let r = (v >> 24) as u8;
            let g = (v >> 16) as u8;
            let b = (v >> 8) as u8;
            let a = v as u8;
            out.extend_from_slice(&[b, g, r, a]);
        }
    }
    out
}

fn palette_to_bgr(palette: &[u32], format: PepFormat) -> Vec<[u8; 4]> {
    palette
        .iter()
        .map(|&c| {
            let (r, g, b) = match format {
                PepFormat::Rgba => ((c >> 24) as u8, (c >> 16) as u8, (c >> 8) as u8),
                PepFormat::Bgra => ((c >> 8) as u8, (c >> 16) as u8, (c >> 24) as u8),
                PepFormat::Abgr => (c as u8, (c >> 8) as u8, (c >> 16) as u8),
                PepFormat::Argb => ((c >> 16) as u8, (c >> 8) as u8, c as u8),
            };
            [b, g, r, 0]
        })
        .collect()
}

/// RLE8-encodes one bottom-up row of palette indices (Microsoft RLE8: pairs
/// of `(count, value)` for runs of 3+, `(0, count)` + literal bytes for
/// shorter stretches, `(0, 0)` end-of-line, `(0, 1)` end-of-bitmap).
fn rle8_encode_row(row: &[u8], out: &mut Vec<u8>) {
    let w = row.len();
    let mut x = 0usize;
    while x < w {
        let val = row[x];
        let mut run = 1usize;
        while x + run < w && row[x + run] == val && run < 255 {
            run += 1;
        }
        if run >= 3 {
            let mut rem = run;
            while rem > 0 {
                let chunk = rem.min(255) as u8;
                out.push(chunk);
                out.push(val);
                rem -= chunk as usize;
            }
            x += run;
        } else {
            let start = x;
            let mut count = 0usize;
            while x < w && count < 255 {
                if x + 2 < w && row[x] == row[x + 1] && row[x] == row[x + 2] {
                    break;
                }
                x += 1;
                count += 1;
            }
            out.push(0);
            out.push(count as u8);
            out.extend_from_slice(&row[start..start + count]);
            if count % 2 == 1 {
                out.push(0);
            }
        }
    }
    out.push(0);
    out.push(0); // end of line
}

/// Writes an 8-bit RLE-compressed BMP. `pixels` must already be in `format`'s
/// channel order (the same order `palette` is indexed in) — the caller is
/// expected to have decompressed with that format, not a converted one, so
/// palette lookups hit exactly.
pub fn write_rle8_bmp(pixels: &[u32], palette: &[u32], format: PepFormat, width: u32, height: u32) -> Vec<u8> {
    let palette_size = palette.len().max(1);

    let mut indices = vec![0u8; (width * height) as usize];
    for (i, &px) in pixels.iter().enumerate() {
        indices[i] = palette
            .iter()
            .position(|&c| c == px)
            .map(|idx| idx as u8)
            .unwrap_or(0);
    }

    let mut rle = Vec::new();
    for y in (0..height).rev() {
        let row = &indices[(y * width) as usize..((y + 1) * width) as usize];
        rle8_encode_row(row, &mut rle);
    }
    rle.push(0);
    rle.push(1); // end of bitmap

    let bgr_palette = palette_to_bgr(palette, format);
    let palette_bytes = (palette_size as u32) * 4;
    let data_offset = FILE_HEADER_SIZE + INFO_HEADER_SIZE + palette_bytes;
    let file_size = data_offset + rle.len() as u32;

    let mut out = Vec::with_capacity(file_size as usize);
    out.extend_from_slice(&file_header(data_offset, file_size));
    out.extend_from_slice(&info_header(width, height, 8, 1, rle.len() as u32, palette_size as u32));
    for entry in &bgr_palette {
        out.extend_from_slice(entry);
    }
    out.extend_from_slice(&rle);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bmp32_header_reports_correct_sizes() {
        let pixels = vec![0xFF0000FFu32; 4];
        let bytes = write_bmp32(&pixels, 2, 2);
        assert_eq!(&bytes[0..2], b"BM");
        let file_size = u32::from_le_bytes(bytes[2..6].try_into().unwrap());
        assert_eq!(file_size as usize, bytes.len());
        let data_offset = u32::from_le_bytes(bytes[10..14].try_into().unwrap());
        assert_eq!(data_offset, 54);
        assert_eq!(bytes.len(), 54 + 2 * 2 * 4);
    }

    #[test]
    fn bmp32_emits_bgra_bytes_from_rgba_pixel() {
        let pixels = [0x11223344u32];
        let bytes = write_bmp32(&pixels, 1, 1);
        let px = &bytes[54..58];
        assert_eq!(px, &[0x33, 0x22, 0x11, 0x44]);
    }

    #[test]
    fn rle8_row_encodes_run_and_literal_mix() {
        let row = [1u8, 1, 1, 1, 2, 3, 4];
        let mut out = Vec::new();
        rle8_encode_row(&row, &mut out);
        assert_eq!(out[0], 4);
        assert_eq!(out[1], 1);
        assert_eq!(&out[out.len() - 2..], &[0, 0]);
    }

    #[test]
    fn rle8_bmp_palette_respects_format() {
        let palette = [0x11223344u32];
        let pixels = [0x11223344u32];
        let bytes = write_rle8_bmp(&pixels, &palette, PepFormat::Rgba, 1, 1);
        let data_offset = u32::from_le_bytes(bytes[10..14].try_into().unwrap()) as usize;
        let pal_entry = &bytes[data_offset - 4..data_offset];
        assert_eq!(pal_entry, &[0x33, 0x22, 0x11, 0x00]);
    }
}
