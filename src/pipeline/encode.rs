//! Image encoding: PNG raster on disk → base64 PNG wrapped in `ImageData`.
//!
//! VLM APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. PNG is kept because it is lossless:
//! text crispness matters far more than file size for OCR accuracy.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Longest edge sent to the vision model.
///
/// A 300 DPI Letter page is 2550 × 3300 px. Providers downscale anything
/// past ~2048 px anyway, so shrinking here only saves upload bytes.
pub const MAX_VISION_EDGE: u32 = 2048;

/// Load a page raster and encode it for a vision request.
///
/// ## Why `detail: "high"`?
/// OpenAI's tiling algorithm divides images into 512 px tiles. `detail: "high"`
/// enables up to 10 tiles, allowing fine print, small tables and math
/// notation to be seen. `detail: "low"` forces a single 512 px overview tile
/// and loses all fine structure.
pub fn encode_raster(path: &Path, max_edge: u32) -> Result<ImageData, image::ImageError> {
    let mut img = image::open(path)?;
    if img.width().max(img.height()) > max_edge {
        img = img.resize(max_edge, max_edge, FilterType::Lanczos3);
    }

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} raster → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn write_png(dir: &Path, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.join("page.png");
        RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255]))
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();
        path
    }

    #[test]
    fn encode_small_raster() {
        let dir = tempfile::tempdir().unwrap();
        let data = encode_raster(&write_png(dir.path(), 10, 10), MAX_VISION_EDGE).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        let img = image::load_from_memory(&decoded).unwrap();
        assert_eq!((img.width(), img.height()), (10, 10));
    }

    #[test]
    fn large_raster_is_downscaled() {
        let dir = tempfile::tempdir().unwrap();
        let data = encode_raster(&write_png(dir.path(), 400, 100), 200).unwrap();
        let img = image::load_from_memory(&STANDARD.decode(&data.data).unwrap()).unwrap();
        assert_eq!(img.width(), 200);
        assert_eq!(img.height(), 50);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(encode_raster(Path::new("/nonexistent/page.png"), MAX_VISION_EDGE).is_err());
    }
}
