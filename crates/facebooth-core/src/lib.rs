//! facebooth-core — Face swap pipeline.
//!
//! Detects faces with SCRFD, embeds them with ArcFace, swaps them with
//! inswapper-128 and optionally restores the result with GFPGAN, all via
//! ONNX Runtime on the CPU. Model-backed stages sit behind traits so the
//! orchestration can run against any implementation.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod encoder;
pub mod enhancer;
pub mod pairing;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod restorer;
pub mod swapper;
pub mod types;

pub use detector::FaceDetector;
pub use encoder::{EncodedResult, ResultEncoder};
pub use enhancer::{EnhancementTier, QualityEnhancer, TierKind};
pub use pipeline::{Capabilities, ModelPaths, PipelineError, SwapPipeline};
pub use preprocess::{decode_data_uri, DecodeError};
pub use restorer::FaceRestorer;
pub use swapper::FaceSwapper;
pub use types::{BoundingBox, DetectedFace, Embedding, FacePair, Image, ImageRole, SwapResult};
