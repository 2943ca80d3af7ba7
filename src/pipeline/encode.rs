//! Image encoding for page rasters.
//!
//! Every rendered page is PNG-encoded once. The bytes go two ways: wrapped
//! as base64 `ImageData` for the vision model, and stored verbatim as a
//! figure asset in the raw artifact namespace.
//!
//! PNG is lossless; JPEG artefacts on rendered text hurt transcription.
//! `detail: "high"` asks GPT-4-class models to tile the image at full
//! resolution so fine print and small tables survive.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// PNG-encode a rasterised page.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Wrap PNG bytes for a multimodal chat request.
pub fn to_image_data(png: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(png), "image/png").with_detail("high")
}
