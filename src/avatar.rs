//! Image-to-ASCII avatar rendering.

use std::path::Path;

use image::imageops::FilterType;

/// Luminance ramp, darkest to lightest.
const GLYPHS: &[u8] = b"@%#*+=-:. ";

/// Avatar thumbnail bound, in glyphs.
const AVATAR_SIZE: u32 = 8;

/// Render an image file into a small glyph block, one row per line.
/// Any decode failure yields `None`; callers never see the reason.
pub fn from_image<P: AsRef<Path>>(path: P) -> Option<String> {
    let img = image::open(path).ok()?;
    let img = img
        .resize(AVATAR_SIZE, AVATAR_SIZE, FilterType::Triangle)
        .to_luma8();
    let mut out = String::new();
    for y in 0..img.height() {
        for x in 0..img.width() {
            let lum = img.get_pixel(x, y).0[0] as usize;
            out.push(GLYPHS[lum * GLYPHS.len() / 256] as char);
        }
        out.push('\n');
    }
    Some(out)
}
