//! Raster helpers: decoding, canvas padding and PNG delivery

use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

use crate::error::Result;

/// Fill used when a page is padded onto a larger canvas
pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Decode an in-memory raster file into RGB8
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Copy `img` onto a `width` x `height` canvas filled with [`BACKGROUND`].
///
/// The image is anchored at the top-left corner. Returns a plain clone when
/// the dimensions already match.
pub fn pad_to(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.width() == width && img.height() == height {
        return img.clone();
    }

    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    for (x, y, px) in img.enumerate_pixels() {
        if x < width && y < height {
            canvas.put_pixel(x, y, *px);
        }
    }
    canvas
}

/// Encode as PNG bytes
pub fn to_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Encode as an inline `data:image/png;base64,...` reference
pub fn to_data_uri(img: &RgbImage) -> Result<String> {
    let png = to_png(img)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

/// Write as a PNG file
pub fn save_png(img: &RgbImage, path: &Path) -> Result<()> {
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
