//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG keeps rendered text crisp; JPEG artefacts around glyphs hurt
//! recognition of small table cells. Images larger than the configured edge
//! limit are downscaled first so requests stay within provider upload limits.

use crate::error::ServiceError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Encode a raster for the vision API, downscaling to `max_edge` pixels.
pub fn encode_image(img: &DynamicImage, max_edge: u32) -> Result<ImageData, ServiceError> {
    let resized;
    let img = if img.width() > max_edge || img.height() > max_edge {
        resized = img.resize(max_edge, max_edge, FilterType::Lanczos3);
        debug!(
            "Downscaled {}x{} → {}x{} px",
            img.width(),
            img.height(),
            resized.width(),
            resized.height()
        );
        &resized
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| ServiceError::Encode {
            detail: e.to_string(),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Load a raster from disk and encode it.
pub fn encode_file(path: &Path, max_edge: u32) -> Result<ImageData, ServiceError> {
    let img = image::open(path).map_err(|e| ServiceError::Encode {
        detail: format!("{}: {}", path.display(), e),
    })?;
    encode_image(&img, max_edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_image(&img, 2000).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn downscales_large_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 100, Rgba([0, 0, 0, 255])));
        let data = encode_image(&img, 200).unwrap();
        let decoded = STANDARD.decode(&data.data).unwrap();
        let back = image::load_from_memory(&decoded).unwrap();
        assert_eq!((back.width(), back.height()), (200, 50));
    }

    #[test]
    fn missing_file_is_encode_error() {
        let err = encode_file(Path::new("/no/such/raster.png"), 2000).unwrap_err();
        assert!(matches!(err, ServiceError::Encode { .. }));
    }
}
