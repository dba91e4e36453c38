//! Neural face restoration capability and its GFPGAN implementation.

use crate::alignment::{self, FFHQ_REFERENCE_512};
use crate::enhancer::upscale;
use crate::types::{ChannelOrder, DetectedFace, Image};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const GFPGAN_INPUT_SIZE: u32 = 512;
/// Whole-image upscale applied before faces are restored (GFPGANer `upscale=2`).
const GFPGAN_UPSCALE: u32 = 2;
const PASTE_FEATHER: f32 = 24.0;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("model file not found: {0} — place GFPGANv1.4.onnx in models/")]
    ModelNotFound(String),
    #[error("restoration failed: {0}")]
    Failed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A learned transform that sharpens the faces of a composited image.
pub trait FaceRestorer {
    /// Channel order `restore` expects its input in, and returns output in.
    fn channel_order(&self) -> ChannelOrder;

    /// Restore `faces` (positions in `image` coordinates) and return the result.
    fn restore(&mut self, image: &Image, faces: &[DetectedFace]) -> Result<Image, RestoreError>;
}

/// GFPGAN v1.4 restorer.
pub struct GfpganRestorer {
    session: Session,
}

impl GfpganRestorer {
    pub fn load(model_path: &str) -> Result<Self, RestoreError> {
        if !Path::new(model_path).exists() {
            return Err(RestoreError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded GFPGAN model"
        );

        Ok(Self { session })
    }

    fn restore_crop(&mut self, crop: &RgbImage) -> Result<RgbImage, RestoreError> {
        let input = to_signed_tensor(crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RestoreError::Failed(format!("restoration output: {e}")))?;
        from_signed_tensor(raw, GFPGAN_INPUT_SIZE)
    }
}

impl FaceRestorer for GfpganRestorer {
    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    fn restore(&mut self, image: &Image, faces: &[DetectedFace]) -> Result<Image, RestoreError> {
        let mut canvas = upscale(image, GFPGAN_UPSCALE);
        let factor = GFPGAN_UPSCALE as f32;

        for face in faces {
            let Some(landmarks) = face.landmarks else {
                continue;
            };
            let scaled = landmarks.map(|(x, y)| (x * factor, y * factor));
            let (crop, matrix) =
                alignment::align_face(canvas.pixels(), &scaled, &FFHQ_REFERENCE_512, GFPGAN_INPUT_SIZE);
            let restored = self.restore_crop(&crop)?;
            let (w, h) = (canvas.width(), canvas.height());
            alignment::paste_back(canvas.pixels_mut(), &restored, &matrix, (0, 0, w, h), PASTE_FEATHER);
        }

        Ok(canvas)
    }
}

/// RGB crop → NCHW tensor in [-1, 1].
fn to_signed_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, px) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px.0[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

/// NCHW tensor in [-1, 1] → RGB crop. Values outside the range are clamped.
fn from_signed_tensor(raw: &[f32], size: u32) -> Result<RgbImage, RestoreError> {
    let plane = (size * size) as usize;
    if raw.len() < plane * 3 {
        return Err(RestoreError::Failed(format!(
            "expected {} output values, got {}",
            plane * 3,
            raw.len()
        )));
    }
    Ok(RgbImage::from_fn(size, size, |x, y| {
        let i = (y * size + x) as usize;
        Rgb(std::array::from_fn(|c| {
            ((raw[c * plane + i].clamp(-1.0, 1.0) + 1.0) / 2.0 * 255.0).round() as u8
        }))
    }))
}
