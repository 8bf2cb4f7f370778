use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};

const GLYPH: u32 = 8;
const LINE_GAP: u32 = 2;

/// Draws `text` centered on `image` with the 8×8 bitmap font, one word per
/// line. Glyphs scale up with the image and are clipped at its edges.
pub fn draw_caption(image: &mut RgbImage, text: &str, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let scale = (width.min(height) / 100).max(1);
    let glyph = GLYPH * scale;
    let line_height = glyph + LINE_GAP * scale;

    let lines: Vec<&str> = text.split_whitespace().collect();
    let block_height = (lines.len() as u32 * line_height).saturating_sub(LINE_GAP * scale);
    let mut top = height.saturating_sub(block_height) / 2;

    for line in lines {
        let line_width = line.chars().count() as u32 * glyph;
        let mut left = width.saturating_sub(line_width) / 2;
        for ch in line.chars() {
            if let Some(rows) = BASIC_FONTS.get(ch) {
                draw_glyph(image, &rows, left, top, scale, color);
            }
            left += glyph;
        }
        top += line_height;
    }
}

fn draw_glyph(
    image: &mut RgbImage,
    rows: &[u8; 8],
    left: u32,
    top: u32,
    scale: u32,
    color: Rgb<u8>,
) {
    let (width, height) = image.dimensions();
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH {
            // Bit 0 is the leftmost pixel.
            if bits & (1 << col) == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let x = left + col * scale + dx;
                    let y = top + row as u32 * scale + dy;
                    if x < width && y < height {
                        image.put_pixel(x, y, color);
                    }
                }
            }
        }
    }
}
