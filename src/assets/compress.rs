/// Image recompression applied to media before upload.
///
/// Only jpg, png, webp and bmp files above 100 KiB are touched. They are
/// scaled to fit 1400 px and re-encoded (JPEG at quality 60; bmp always
/// becomes JPEG). When the result is still over 200 KiB a JPEG encoding is
/// tried too and kept if smaller. Output that is not smaller than the input
/// is discarded, as is anything that fails to decode.
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};
use tracing::{debug, warn};

use crate::queue::AssetTransform;

pub const MIN_COMPRESS_BYTES: usize = 100 * 1024;
const JPEG_FALLBACK_BYTES: usize = 200 * 1024;
pub const MAX_DIMENSION: u32 = 1400;
pub const JPEG_QUALITY: u8 = 60;

#[derive(Debug, Clone)]
pub struct ImageCompressor {
    pub min_bytes: usize,
    pub max_dimension: u32,
    pub quality: u8,
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self {
            min_bytes: MIN_COMPRESS_BYTES,
            max_dimension: MAX_DIMENSION,
            quality: JPEG_QUALITY,
        }
    }
}

/// Encoding used for a supported input filetype.
fn target_format(filetype: &str) -> Option<ImageFormat> {
    match filetype {
        "jpg" | "jpeg" | "bmp" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

impl ImageCompressor {
    fn encode_jpeg(&self, image: &DynamicImage) -> Result<Vec<u8>, ImageError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality).encode_image(&image.to_rgb8())?;
        Ok(out)
    }

    fn encode(&self, image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
        if format == ImageFormat::Jpeg {
            return self.encode_jpeg(image);
        }
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format)?;
        Ok(out.into_inner())
    }

    /// `Ok(None)` when recompression does not pay off.
    fn recompress(
        &self,
        filetype: &str,
        format: ImageFormat,
        content: &[u8],
    ) -> Result<Option<(String, Vec<u8>)>, ImageError> {
        let mut image = image::load_from_memory(content)?;
        if image.width() > self.max_dimension || image.height() > self.max_dimension {
            image = image.resize(self.max_dimension, self.max_dimension, FilterType::Triangle);
        }

        let mut filetype = match filetype {
            "bmp" => "jpg".to_string(),
            other => other.to_string(),
        };
        let mut data = self.encode(&image, format)?;

        if data.len() > JPEG_FALLBACK_BYTES && format != ImageFormat::Jpeg {
            let jpeg = self.encode_jpeg(&image)?;
            if jpeg.len() < data.len() {
                data = jpeg;
                filetype = "jpg".to_string();
            }
        }

        if data.len() >= content.len() {
            return Ok(None);
        }
        Ok(Some((filetype, data)))
    }
}

impl AssetTransform for ImageCompressor {
    fn transform(&self, filetype: String, content: Vec<u8>) -> (String, Vec<u8>) {
        let Some(format) = target_format(&filetype) else {
            return (filetype, content);
        };
        if content.len() <= self.min_bytes {
            return (filetype, content);
        }

        match self.recompress(&filetype, format, &content) {
            Ok(Some((new_type, data))) => {
                debug!(
                    from = %filetype,
                    to = %new_type,
                    before = content.len(),
                    after = data.len(),
                    "Image recompressed"
                );
                (new_type, data)
            }
            Ok(None) => (filetype, content),
            Err(e) => {
                warn!(filetype = %filetype, error = %e, "Image recompression failed, uploading original");
                (filetype, content)
            }
        }
    }
}
