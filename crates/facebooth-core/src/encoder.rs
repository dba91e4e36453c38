//! Final image serialization for transport.

use crate::types::{ChannelOrder, Image, SwapResult};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::Serialize;
use thiserror::Error;

pub const JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Transport form of a [`SwapResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedResult {
    /// `data:image/jpeg;base64,...`
    pub result_image: String,
    pub faces_swapped: usize,
    pub enhanced: bool,
}

/// JPEG + base64 data URI encoder.
#[derive(Debug, Clone)]
pub struct ResultEncoder {
    quality: u8,
}

impl Default for ResultEncoder {
    fn default() -> Self {
        Self { quality: JPEG_QUALITY }
    }
}

impl ResultEncoder {
    pub fn new(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }

    /// Lossy-compress `image` to JPEG bytes.
    pub fn encode_jpeg(&self, image: &Image) -> Result<Vec<u8>, EncodeError> {
        let rgb = image.clone().into_order(ChannelOrder::Rgb);
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality).write_image(
            rgb.pixels().as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(buffer)
    }

    pub fn encode(&self, result: &SwapResult) -> Result<EncodedResult, EncodeError> {
        let jpeg = self.encode_jpeg(&result.image)?;
        Ok(EncodedResult {
            result_image: to_data_uri("image/jpeg", &jpeg),
            faces_swapped: result.faces_swapped,
            enhanced: result.enhanced,
        })
    }
}

pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
