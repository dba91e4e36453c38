use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Interpretation of the three interleaved channels of an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A decoded three-channel pixel buffer with an explicit channel order.
///
/// The buffer is stored as an `RgbImage` for the `image` crate's sake; the
/// `order` field says what the three bytes of each pixel actually hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: RgbImage,
    order: ChannelOrder,
}

impl Image {
    /// Wrap a buffer whose bytes are already laid out in `order`.
    pub fn new(pixels: RgbImage, order: ChannelOrder) -> Self {
        Self { pixels, order }
    }

    /// Wrap an RGB buffer.
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self {
            pixels,
            order: ChannelOrder::Rgb,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut RgbImage {
        &mut self.pixels
    }

    /// Reinterpret the buffer in `order`, swapping the first and third
    /// channel of every pixel when the order changes.
    pub fn into_order(mut self, order: ChannelOrder) -> Self {
        if self.order != order {
            for px in self.pixels.pixels_mut() {
                px.0.swap(0, 2);
            }
            self.order = order;
        }
        self
    }

    /// True when both images have the same size and identical bytes.
    pub fn same_pixels(&self, other: &Image) -> bool {
        self.pixels.dimensions() == other.pixels.dimensions()
            && self.pixels.as_raw() == other.pixels.as_raw()
    }
}

/// Axis-aligned face rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Integer pixel bounds `[x0, x1) × [y0, y1)` clipped to a `width × height` image.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let clip = |v: f32, max: u32| v.clamp(0.0, max as f32) as u32;
        (
            clip(self.x0.floor(), width),
            clip(self.y0.floor(), height),
            clip(self.x1.ceil(), width),
            clip(self.y1.ceil(), height),
        )
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

/// Which of the two request images a face was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageRole {
    /// The live photo whose faces are transplanted.
    Captured,
    /// The template photo that receives the faces.
    Template,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Captured => f.write_str("captured image"),
            ImageRole::Template => f.write_str("template image"),
        }
    }
}

/// A face found by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
    pub embedding: Option<Embedding>,
    /// Image the face came from. Stamped by the pipeline after detection.
    pub provenance: Option<ImageRole>,
}

impl DetectedFace {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            landmarks: None,
            embedding: None,
            provenance: None,
        }
    }
}

/// One source/target correspondence, valid for a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct FacePair {
    pub index: usize,
    pub source: DetectedFace,
    pub target: DetectedFace,
}

/// Output of a full pipeline run.
#[derive(Debug, Clone)]
pub struct SwapResult {
    pub image: Image,
    pub faces_swapped: usize,
    pub enhanced: bool,
}
