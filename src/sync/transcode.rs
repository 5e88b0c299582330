//! Cover transcoding.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

/// Transformed image bytes and their format.
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

pub trait Transcoder: Send + Sync {
    fn transform(&self, bytes: &[u8]) -> Result<Transcoded>;
}

/// Downscale to a maximum width and re-encode as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct CoverTranscoder {
    pub max_width: u32,
    pub quality: u8,
}

impl CoverTranscoder {
    pub fn new(max_width: u32, quality: u8) -> Self {
        Self {
            max_width: max_width.max(1),
            quality: quality.clamp(1, 100),
        }
    }
}

impl Transcoder for CoverTranscoder {
    fn transform(&self, bytes: &[u8]) -> Result<Transcoded> {
        let mut img = image::load_from_memory(bytes).context("Unrecognized image data")?;
        if img.width() > self.max_width {
            img = img.resize(self.max_width, u32::MAX, FilterType::Lanczos3);
        }

        let rgb = img.to_rgb8();
        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .context("JPEG encoding failed")?;

        Ok(Transcoded {
            bytes: out.into_inner(),
            content_type: "image/jpeg",
            extension: "jpg",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn wide_covers_are_downscaled_to_jpeg() {
        let transcoder = CoverTranscoder::new(100, 80);
        let result = transcoder.transform(&png(400, 200)).unwrap();
        assert_eq!(result.content_type, "image/jpeg");

        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn narrow_covers_keep_their_size() {
        let transcoder = CoverTranscoder::new(800, 85);
        let result = transcoder.transform(&png(40, 60)).unwrap();
        let decoded = image::load_from_memory(&result.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 60));
    }

    #[test]
    fn garbage_is_rejected() {
        let transcoder = CoverTranscoder::new(800, 85);
        assert!(transcoder.transform(b"<html>not an image</html>").is_err());
    }
}
