//! Image encoding: pdfium `DynamicImage` → PNG bytes, and PNG bytes →
//! base64 `ImageData` for chat-model vision requests.
//!
//! Embedded PDF images arrive in whatever pixel format the document stored
//! (JPEG, JBIG2, raw RGB, ...). Re-encoding everything as PNG gives every
//! vision backend one lossless, universally accepted format.

use crate::output::ExtractedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an extracted image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Wrap an extracted image as a base64 attachment.
///
/// ## Why `detail: "high"`?
/// Descriptions must reproduce small table cells and prices exactly. With
/// `detail: "low"` OpenAI-class models see a single 512 px overview tile and
/// lose fine print.
pub fn to_image_data(image: &ExtractedImage) -> ImageData {
    let b64 = STANDARD.encode(&image.bytes);
    ImageData::new(b64, image.mime_type.as_str()).with_detail("high")
}
