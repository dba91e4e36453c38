//! Input normalization: data URI decoding, image decoding and upscaling of
//! small inputs so the detector sees faces at a usable resolution.

use crate::types::Image;
use base64::Engine;
use image::imageops::{self, FilterType};
use thiserror::Error;

/// Images whose smaller side is below this are upscaled to it.
pub const MIN_DIMENSION: u32 = 512;
/// Largest image the upscaler will produce (about 50 megapixels).
pub const MAX_UPSCALED_PIXELS: u64 = 50_000_000;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cannot decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    ZeroDimensions,
    #[error("{width}x{height} image is too large to upscale")]
    TooLarge { width: u32, height: u32 },
}

/// Extract the binary payload of a `data:<mime>;base64,<payload>` URI.
///
/// A bare base64 string without the `data:` prefix is accepted as well.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, DecodeError> {
    let payload = match uri.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, p)| p).unwrap_or(""),
        None => uri,
    };
    Ok(base64::engine::general_purpose::STANDARD.decode(payload.trim())?)
}

/// Decode and upscale raw image bytes ahead of face detection.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    min_dimension: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            min_dimension: MIN_DIMENSION,
        }
    }
}

impl Preprocessor {
    /// Decode `bytes` (any format the `image` crate understands) and upscale.
    pub fn prepare(&self, bytes: &[u8]) -> Result<Image, DecodeError> {
        let decoded = image::load_from_memory(bytes)?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(DecodeError::ZeroDimensions);
        }
        self.upscale(Image::from_rgb(decoded.to_rgb8()))
    }

    /// Upscale so that `min(width, height) >= min_dimension`, preserving the
    /// aspect ratio. Images already large enough pass through untouched.
    pub fn upscale(&self, image: Image) -> Result<Image, DecodeError> {
        let (w, h) = (image.width(), image.height());
        let (new_w, new_h) = match scaled_dimensions(w, h, self.min_dimension)? {
            Some(dims) => dims,
            None => return Ok(image),
        };

        tracing::debug!(from = ?(w, h), to = ?(new_w, new_h), "upscaling input image");
        let order = image.order();
        let resized = imageops::resize(image.pixels(), new_w, new_h, FilterType::CatmullRom);
        Ok(Image::new(resized, order))
    }
}

/// Target size for a `w × h` image, or `None` when no resize is needed.
///
/// The smaller side lands exactly on `min_dimension`; the other side is
/// rounded to the nearest pixel. Targets above [`MAX_UPSCALED_PIXELS`] are
/// rejected.
fn scaled_dimensions(w: u32, h: u32, min_dimension: u32) -> Result<Option<(u32, u32)>, DecodeError> {
    let short = w.min(h);
    if short == 0 || short >= min_dimension {
        return Ok(None);
    }
    let scale = min_dimension as f64 / short as f64;
    let long = (w.max(h) as f64 * scale).round().max(min_dimension as f64);
    if long * min_dimension as f64 > MAX_UPSCALED_PIXELS as f64 {
        return Err(DecodeError::TooLarge { width: w, height: h });
    }
    let long = u32::try_from(long as u64).map_err(|_| DecodeError::TooLarge { width: w, height: h })?;

    Ok(Some(if w <= h { (min_dimension, long) } else { (long, min_dimension) }))
}
