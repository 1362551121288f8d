//! Decoding and re-encoding of uploaded images into the two public renditions.
//!
//! Every upload is normalised to JPEG regardless of its source format, so the
//! public extension is always [`EXTENSION`].

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Limits, RgbImage};
use thiserror::Error;

pub const EXTENSION: &str = "jpg";
pub const CONTENT_TYPE: &str = "image/jpeg";

/// Largest accepted source edge; anything bigger is refused at decode time.
const MAX_SOURCE_EDGE: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenditionSpec {
    pub max_width: u32,
    pub quality: u8,
}

pub const FULL: RenditionSpec = RenditionSpec { max_width: 1080, quality: 75 };
pub const THUMB: RenditionSpec = RenditionSpec { max_width: 400, quality: 60 };

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone)]
pub struct Rendition {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Renditions {
    pub full: Rendition,
    pub thumb: Rendition,
}

/// Decode `bytes` and produce both renditions. CPU bound; callers on an async
/// executor should run this on a blocking thread.
pub fn process(bytes: &[u8]) -> Result<Renditions, PipelineError> {
    let source = flatten(decode(bytes)?);
    Ok(Renditions {
        full: render(&source, FULL)?,
        thumb: render(&source, THUMB)?,
    })
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_EDGE);
    limits.max_image_height = Some(MAX_SOURCE_EDGE);
    reader.limits(limits);
    reader.decode().map_err(|e| PipelineError::Decode(e.to_string()))
}

/// Width/height after fitting `width` into `max_width`. Never upscales.
pub fn fit_width(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }
    let scaled = (f64::from(height) * f64::from(max_width) / f64::from(width)).round();
    (max_width, (scaled as u32).max(1))
}

pub fn render(source: &RgbImage, spec: RenditionSpec) -> Result<Rendition, PipelineError> {
    let (width, height) = fit_width(source.width(), source.height(), spec.max_width);
    let resized;
    let frame = if (width, height) == source.dimensions() {
        source
    } else {
        resized = image::imageops::resize(source, width, height, FilterType::Lanczos3);
        &resized
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, spec.quality)
        .encode_image(frame)
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    Ok(Rendition { bytes, width, height })
}

// JPEG has no alpha channel; composite transparent pixels over white.
fn flatten(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }
    let rgba = img.into_rgba8();
    let (w, h) = rgba.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}
