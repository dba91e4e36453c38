//! Face swap capability and its inswapper-128 implementation via ONNX Runtime.
//!
//! The swapper receives a canvas by value and returns the composited canvas,
//! so callers chain successive swaps on the evolving image.

use crate::alignment::{self, arcface_reference};
use crate::recognizer::{l2_normalize, ARCFACE_EMBEDDING_DIM};
use crate::types::{ChannelOrder, DetectedFace, Image};
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: u32 = 128;
/// Width of the blending ramp at the crop border, in crop pixels.
const PASTE_FEATHER: f32 = 12.0;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("model file not found: {0} — place inswapper_128.onnx in models/")]
    ModelNotFound(String),
    #[error("invalid emap file {path}: {reason}")]
    InvalidEmap { path: String, reason: String },
    #[error("target face has no landmarks")]
    NoLandmarks,
    #[error("source face has no identity embedding")]
    NoEmbedding,
    #[error("source embedding has {0} dimensions, expected 512")]
    EmbeddingDimension(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Replaces the `target` face in `canvas` with the identity of `source`.
pub trait FaceSwapper {
    fn swap(
        &mut self,
        canvas: Image,
        target: &DetectedFace,
        source: &DetectedFace,
    ) -> Result<Image, SwapError>;
}

/// inswapper-128 face swapper.
pub struct Inswapper {
    session: Session,
    /// Row-major 512×512 identity projection; `None` uses the embedding as is.
    emap: Option<Vec<f32>>,
}

impl Inswapper {
    /// Load the swap model and, when given, its identity projection matrix.
    ///
    /// `emap_path` holds 512×512 little-endian `f32` values, extracted from the
    /// last initializer of the inswapper graph.
    pub fn load(model_path: &str, emap_path: Option<&str>) -> Result<Self, SwapError> {
        if !Path::new(model_path).exists() {
            return Err(SwapError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded inswapper model"
        );

        let emap = match emap_path {
            Some(path) if Path::new(path).exists() => Some(load_emap(path)?),
            Some(path) => {
                tracing::warn!(path, "emap file not found; using raw embeddings as latent");
                None
            }
            None => None,
        };

        Ok(Self { session, emap })
    }
}

impl FaceSwapper for Inswapper {
    fn swap(
        &mut self,
        canvas: Image,
        target: &DetectedFace,
        source: &DetectedFace,
    ) -> Result<Image, SwapError> {
        let landmarks = target.landmarks.as_ref().ok_or(SwapError::NoLandmarks)?;
        let embedding = source.embedding.as_ref().ok_or(SwapError::NoEmbedding)?;
        let latent = source_latent(&embedding.values, self.emap.as_deref())?;

        let order = canvas.order();
        let mut canvas = canvas.into_order(ChannelOrder::Rgb);
        let (crop, matrix) = alignment::align_face(
            canvas.pixels(),
            landmarks,
            &arcface_reference(INSWAPPER_INPUT_SIZE),
            INSWAPPER_INPUT_SIZE,
        );
        let blob = to_unit_tensor(&crop);

        let outputs = self.session.run(ort::inputs![
            TensorRef::from_array_view(blob.view())?,
            TensorRef::from_array_view(latent.view())?
        ])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapError::InferenceFailed(format!("swap output: {e}")))?;
        let swapped = from_unit_tensor(raw, INSWAPPER_INPUT_SIZE)?;

        let clip = target.bbox.pixel_bounds(canvas.width(), canvas.height());
        alignment::paste_back(canvas.pixels_mut(), &swapped, &matrix, clip, PASTE_FEATHER);

        Ok(canvas.into_order(order))
    }
}

fn load_emap(path: &str) -> Result<Vec<f32>, SwapError> {
    let bytes = std::fs::read(path)?;
    let expected = ARCFACE_EMBEDDING_DIM * ARCFACE_EMBEDDING_DIM * 4;
    if bytes.len() != expected {
        return Err(SwapError::InvalidEmap {
            path: path.to_string(),
            reason: format!("expected {expected} bytes, got {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Project a source embedding into the swap model's latent space:
/// `normalize(embedding · emap)`.
fn source_latent(embedding: &[f32], emap: Option<&[f32]>) -> Result<Array2<f32>, SwapError> {
    let dim = ARCFACE_EMBEDDING_DIM;
    if embedding.len() != dim {
        return Err(SwapError::EmbeddingDimension(embedding.len()));
    }

    let projected: Vec<f32> = match emap {
        Some(emap) => (0..dim)
            .map(|j| embedding.iter().enumerate().map(|(i, e)| e * emap[i * dim + j]).sum())
            .collect(),
        None => embedding.to_vec(),
    };

    Array2::from_shape_vec((1, dim), l2_normalize(projected))
        .map_err(|e| SwapError::InferenceFailed(format!("latent shape: {e}")))
}

/// RGB crop → NCHW tensor in [0, 1].
fn to_unit_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, px) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = px.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// NCHW tensor in [0, 1] → RGB crop.
fn from_unit_tensor(raw: &[f32], size: u32) -> Result<RgbImage, SwapError> {
    let plane = (size * size) as usize;
    if raw.len() < plane * 3 {
        return Err(SwapError::InferenceFailed(format!(
            "expected {} output values, got {}",
            plane * 3,
            raw.len()
        )));
    }
    Ok(RgbImage::from_fn(size, size, |x, y| {
        let i = (y * size + x) as usize;
        Rgb(std::array::from_fn(|c| (raw[c * plane + i] * 255.0).round().clamp(0.0, 255.0) as u8))
    }))
}
