use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::error::PipelineError;

/// Longest-edge target for the copy sent to the analysis service.
pub const ANALYSIS_MAX_DIM: u32 = 1024;
/// Longest-edge target for persisted history thumbnails.
pub const THUMBNAIL_MAX_DIM: u32 = 200;

const ANALYSIS_JPEG_QUALITY: u8 = 90;
const THUMBNAIL_JPEG_QUALITY: u8 = 70;

pub const JPEG_MIME: &str = "image/jpeg";

/// Re-encoded image plus the byte accounting the caller reports.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub original_len: usize,
    pub encoded_len: usize,
}

/// High-quality downsample for analysis fidelity.
pub fn normalize_for_analysis(bytes: &[u8]) -> Result<NormalizedImage, PipelineError> {
    reencode(bytes, ANALYSIS_MAX_DIM, ANALYSIS_JPEG_QUALITY)
}

/// Low-quality downsample for storage economy.
pub fn render_thumbnail(bytes: &[u8]) -> Result<NormalizedImage, PipelineError> {
    reencode(bytes, THUMBNAIL_MAX_DIM, THUMBNAIL_JPEG_QUALITY)
}

/// Thumbnail as a `data:image/jpeg;base64,` URL, the form history entries
/// persist.
pub fn thumbnail_data_url(bytes: &[u8]) -> Result<String, PipelineError> {
    let thumb = render_thumbnail(bytes)?;
    Ok(format!(
        "data:{};base64,{}",
        thumb.mime_type,
        BASE64.encode(&thumb.bytes)
    ))
}

fn reencode(bytes: &[u8], max_dim: u32, quality: u8) -> Result<NormalizedImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::Decode("empty image buffer".to_string()));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| PipelineError::Decode(err.to_string()))?;

    let flattened = flatten_alpha(&decoded);
    let (width, height) = fit_within(flattened.width(), flattened.height(), max_dim);
    let resized = DynamicImage::ImageRgba8(flattened)
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();

    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(resized))
        .map_err(|err| PipelineError::Decode(format!("jpeg encode failed: {err}")))?;

    let encoded_len = encoded.len();
    Ok(NormalizedImage {
        bytes: encoded,
        mime_type: JPEG_MIME,
        width,
        height,
        original_len: bytes.len(),
        encoded_len,
    })
}

/// Blends any alpha channel onto white so transparent sources re-encode to
/// JPEG without black halos.
fn flatten_alpha(decoded: &DynamicImage) -> RgbaImage {
    let rgba = decoded.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    flattened
}

/// Proportional fit: the longer side lands exactly on `max_dim`, the shorter
/// side scales to the nearest integer. Sources already inside the bound keep
/// their native size; there is no upscaling.
fn fit_within(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    if width > height {
        if width > max_dim {
            let scaled = (f64::from(height) * (f64::from(max_dim) / f64::from(width))).round();
            (max_dim, (scaled as u32).max(1))
        } else {
            (width, height)
        }
    } else if height > max_dim {
        let scaled = (f64::from(width) * (f64::from(max_dim) / f64::from(height))).round();
        ((scaled as u32).max(1), max_dim)
    } else {
        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use crate::error::PipelineError;

    use super::{
        fit_within, normalize_for_analysis, render_thumbnail, thumbnail_data_url,
        ANALYSIS_MAX_DIM, THUMBNAIL_MAX_DIM,
    };

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 80, 200]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode fixture");
        cursor.into_inner()
    }

    #[test]
    fn oversized_landscape_lands_on_the_bound() {
        let source = png_bytes(2048, 1024);
        let normalized = normalize_for_analysis(&source).expect("normalize");
        assert_eq!(normalized.width, ANALYSIS_MAX_DIM);
        assert_eq!(normalized.height, 512);
        assert_eq!(normalized.original_len, source.len());
        assert_eq!(normalized.encoded_len, normalized.bytes.len());
    }

    #[test]
    fn aspect_ratio_survives_within_one_pixel() {
        let source = png_bytes(2048, 1023);
        let normalized = normalize_for_analysis(&source).expect("normalize");
        assert_eq!(normalized.width, ANALYSIS_MAX_DIM);
        let ideal = 1023.0 * (f64::from(ANALYSIS_MAX_DIM) / 2048.0);
        assert!((f64::from(normalized.height) - ideal).abs() <= 1.0);
    }

    #[test]
    fn portrait_thumbnail_scales_the_height() {
        let source = png_bytes(300, 600);
        let thumb = render_thumbnail(&source).expect("thumbnail");
        assert_eq!(thumb.height, THUMBNAIL_MAX_DIM);
        assert_eq!(thumb.width, 100);
    }

    #[test]
    fn small_sources_are_never_upscaled() {
        let source = png_bytes(320, 240);
        let normalized = normalize_for_analysis(&source).expect("normalize");
        assert_eq!((normalized.width, normalized.height), (320, 240));
    }

    #[test]
    fn reencode_is_deterministic_for_fixed_input() {
        let source = png_bytes(640, 480);
        let first = normalize_for_analysis(&source).expect("normalize");
        let second = normalize_for_analysis(&source).expect("normalize");
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn empty_buffer_is_a_decode_error() {
        let err = normalize_for_analysis(&[]).expect_err("empty buffer");
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn corrupt_bytes_are_a_decode_error() {
        let err = normalize_for_analysis(b"definitely not an image").expect_err("corrupt");
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn thumbnail_data_url_is_base64_jpeg() {
        let source = png_bytes(400, 400);
        let url = thumbnail_data_url(&source).expect("data url");
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert!(url.len() > "data:image/jpeg;base64,".len());
    }

    #[test]
    fn fit_within_covers_both_orientations_and_ties() {
        assert_eq!(fit_within(2000, 1000, 1000), (1000, 500));
        assert_eq!(fit_within(1000, 2000, 1000), (500, 1000));
        assert_eq!(fit_within(1500, 1500, 1000), (1000, 1000));
        assert_eq!(fit_within(800, 600, 1000), (800, 600));
    }
}
