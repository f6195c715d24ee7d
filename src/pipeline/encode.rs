//! Image encoding: rendered page → base64 PNG wrapped in `ImageData`.
//!
//! Scanned clinic notes are often faint photocopies with handwriting in the
//! margins. PNG keeps them lossless; JPEG artefacts around small print make
//! dates and dosages harder for the vision model to read.
//!
//! pdfium hands back opaque RGBA bitmaps. The alpha channel carries nothing
//! for a scan, so it is dropped, and the PNG is written at the highest
//! compression level: a full-page scan is sent once per page and dominates
//! the request body.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::DynamicImage;
use tracing::debug;

/// Encode page `page_number` as a base64 PNG ready for the vision call.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget so
/// small print survives.
pub fn encode_page(page_number: usize, img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let flat;
    let img = if img.color().has_alpha() {
        flat = DynamicImage::ImageRgb8(img.to_rgb8());
        &flat
    } else {
        img
    };

    let mut png = Vec::new();
    img.write_with_encoder(PngEncoder::new_with_quality(
        &mut png,
        CompressionType::Best,
        FilterType::Adaptive,
    ))?;

    let b64 = STANDARD.encode(&png);
    debug!(
        "Page {}: {}x{} scan → {} bytes base64",
        page_number,
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
