//! End-to-end swap: decode, detect, pair, composite, enhance.
//!
//! A [`SwapPipeline`] owns every model handle. It is built once at startup
//! (see [`SwapPipeline::load`]) and then driven one request at a time.

use crate::analyzer::FaceAnalyzer;
use crate::detector::{DetectorError, FaceDetector, SCRFD_DEFAULT_INPUT_SIZE};
use crate::enhancer::{probe_simple_upscale, probe_tier, EnhancementTier, QualityEnhancer, TierKind};
use crate::pairing::{pair_faces, PairingError};
use crate::preprocess::{DecodeError, Preprocessor};
use crate::restorer::{FaceRestorer, GfpganRestorer, RestoreError};
use crate::swapper::{FaceSwapper, Inswapper, SwapError};
use crate::types::{DetectedFace, Image, ImageRole, SwapResult};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub const SCRFD_MODEL: &str = "det_10g.onnx";
pub const ARCFACE_MODEL: &str = "w600k_r50.onnx";
pub const INSWAPPER_MODEL: &str = "inswapper_128.onnx";
pub const INSWAPPER_EMAP: &str = "emap.bin";
pub const GFPGAN_MODEL: &str = "GFPGANv1.4.onnx";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot decode {role}: {source}")]
    Decode {
        role: ImageRole,
        #[source]
        source: DecodeError,
    },
    #[error("no faces detected in {0}")]
    NoFaceDetected(ImageRole),
    #[error("face swap model is not available")]
    SwapCapabilityUnavailable,
    #[error("face detection model is not available")]
    DetectionUnavailable,
    #[error("detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("swap failed: {0}")]
    Swap(#[from] SwapError),
}

impl From<PairingError> for PipelineError {
    fn from(e: PairingError) -> Self {
        match e {
            PairingError::NoFaceDetected(role) => PipelineError::NoFaceDetected(role),
        }
    }
}

/// Where the model files live and how to load them.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub model_dir: PathBuf,
    /// Square SCRFD input size.
    pub det_size: usize,
    /// When false the neural restoration tier is never attempted.
    pub restoration_enabled: bool,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            det_size: SCRFD_DEFAULT_INPUT_SIZE,
            restoration_enabled: true,
        }
    }
}

impl ModelPaths {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            ..Self::default()
        }
    }

    fn file(&self, name: &str) -> String {
        self.model_dir.join(name).to_string_lossy().into_owned()
    }
}

/// What the pipeline can do, as decided at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub detector: bool,
    pub swapper: bool,
    pub enhancement: TierKind,
}

pub struct SwapPipeline {
    detector: Option<Box<dyn FaceDetector + Send>>,
    swapper: Option<Box<dyn FaceSwapper + Send>>,
    enhancer: QualityEnhancer,
    preprocessor: Preprocessor,
}

impl SwapPipeline {
    pub fn new(
        detector: Option<Box<dyn FaceDetector + Send>>,
        swapper: Option<Box<dyn FaceSwapper + Send>>,
        enhancer: QualityEnhancer,
    ) -> Self {
        Self {
            detector,
            swapper,
            enhancer,
            preprocessor: Preprocessor::default(),
        }
    }

    /// Load every model from `paths`.
    ///
    /// Never fails: a capability whose model cannot be loaded is logged and
    /// left out, and requests needing it are rejected later.
    pub fn load(paths: &ModelPaths) -> Self {
        let detector = match FaceAnalyzer::load(
            &paths.file(SCRFD_MODEL),
            &paths.file(ARCFACE_MODEL),
            paths.det_size,
        ) {
            Ok(analyzer) => Some(Box::new(analyzer) as Box<dyn FaceDetector + Send>),
            Err(e) => {
                tracing::warn!(error = %e, "face detection disabled");
                None
            }
        };

        let emap = paths.file(INSWAPPER_EMAP);
        let swapper = match Inswapper::load(&paths.file(INSWAPPER_MODEL), Some(emap.as_str())) {
            Ok(swapper) => Some(Box::new(swapper) as Box<dyn FaceSwapper + Send>),
            Err(e) => {
                tracing::warn!(error = %e, "face swapping disabled");
                None
            }
        };

        let tier = probe_tier(
            || {
                if !paths.restoration_enabled {
                    return Err(RestoreError::Failed("disabled by configuration".into()));
                }
                let restorer = GfpganRestorer::load(&paths.file(GFPGAN_MODEL))?;
                Ok(Box::new(restorer) as Box<dyn FaceRestorer + Send>)
            },
            probe_simple_upscale,
        );

        let pipeline = Self::new(detector, swapper, QualityEnhancer::new(tier));
        let caps = pipeline.capabilities();
        tracing::info!(
            detector = caps.detector,
            swapper = caps.swapper,
            enhancement = ?caps.enhancement,
            "pipeline ready"
        );
        pipeline
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            detector: self.detector.is_some(),
            swapper: self.swapper.is_some(),
            enhancement: self.enhancer.tier(),
        }
    }

    /// Put the faces of `captured` onto the faces of `template`.
    ///
    /// Both inputs are encoded image files. Faces are matched left to right;
    /// extra faces on either side are ignored.
    pub fn run(
        &mut self,
        captured: &[u8],
        template: &[u8],
        use_enhancement: bool,
    ) -> Result<SwapResult, PipelineError> {
        let swapper = self
            .swapper
            .as_mut()
            .ok_or(PipelineError::SwapCapabilityUnavailable)?;
        let detector = self
            .detector
            .as_mut()
            .ok_or(PipelineError::DetectionUnavailable)?;

        let captured = prepare(&self.preprocessor, captured, ImageRole::Captured)?;
        let template = prepare(&self.preprocessor, template, ImageRole::Template)?;

        let source_faces = detect(detector.as_mut(), &captured, ImageRole::Captured)?;
        let target_faces = detect(detector.as_mut(), &template, ImageRole::Template)?;
        tracing::debug!(
            source = source_faces.len(),
            target = target_faces.len(),
            "faces detected"
        );

        let pairs = pair_faces(source_faces, target_faces)?;

        let mut canvas = template;
        for pair in &pairs {
            canvas = swapper.swap(canvas, &pair.target, &pair.source)?;
        }

        let swapped: Vec<DetectedFace> = pairs.into_iter().map(|p| p.target).collect();
        let enhanced = self.enhancer.enhance(canvas, &swapped, use_enhancement);

        tracing::info!(
            faces_swapped = swapped.len(),
            enhanced = enhanced.enhanced,
            "swap complete"
        );

        Ok(SwapResult {
            image: enhanced.image,
            faces_swapped: swapped.len(),
            enhanced: enhanced.enhanced,
        })
    }
}

fn prepare(preprocessor: &Preprocessor, bytes: &[u8], role: ImageRole) -> Result<Image, PipelineError> {
    preprocessor
        .prepare(bytes)
        .map_err(|source| PipelineError::Decode { role, source })
}

fn detect(
    detector: &mut (dyn FaceDetector + Send),
    image: &Image,
    role: ImageRole,
) -> Result<Vec<DetectedFace>, PipelineError> {
    let mut faces = detector.detect(image)?;
    for face in &mut faces {
        face.provenance = Some(role);
    }
    Ok(faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, ChannelOrder, Embedding};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    const CAPTURED_W: u32 = 600;
    const TEMPLATE_W: u32 = 700;
    const HEIGHT: u32 = 520;
    const BACKGROUND: [u8; 3] = [40, 40, 40];

    fn png(width: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, HEIGHT, Rgb(BACKGROUND));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Face at `x0` whose "identity" is the paint colour `shade`.
    fn face(x0: f32, shade: u8) -> DetectedFace {
        let mut f = DetectedFace::new(BoundingBox { x0, y0: 100.0, x1: x0 + 60.0, y1: 160.0 }, 0.9);
        f.embedding = Some(Embedding { values: vec![shade as f32], model_version: None });
        f
    }

    /// Returns canned faces keyed by image width.
    struct FakeDetector {
        faces: HashMap<u32, Vec<DetectedFace>>,
    }

    impl FaceDetector for FakeDetector {
        fn detect(&mut self, image: &Image) -> Result<Vec<DetectedFace>, DetectorError> {
            Ok(self.faces.get(&image.width()).cloned().unwrap_or_default())
        }
    }

    /// Paints the target box with the source face's shade and records the
    /// order of calls.
    struct PaintSwapper {
        calls: Arc<Mutex<Vec<(f32, f32)>>>,
    }

    impl FaceSwapper for PaintSwapper {
        fn swap(&mut self, mut canvas: Image, target: &DetectedFace, source: &DetectedFace) -> Result<Image, SwapError> {
            assert_eq!(target.provenance, Some(ImageRole::Template));
            assert_eq!(source.provenance, Some(ImageRole::Captured));
            let shade = source.embedding.as_ref().ok_or(SwapError::NoEmbedding)?.values[0] as u8;
            self.calls.lock().unwrap().push((source.bbox.x0, target.bbox.x0));

            let (x0, y0, x1, y1) = target.bbox.pixel_bounds(canvas.width(), canvas.height());
            for y in y0..y1 {
                for x in x0..x1 {
                    canvas.pixels_mut().put_pixel(x, y, Rgb([shade, shade, shade]));
                }
            }
            Ok(canvas)
        }
    }

    /// Records the faces it is asked to restore and brightens the image.
    struct RecordingRestorer {
        seen: Arc<Mutex<Vec<DetectedFace>>>,
    }

    impl FaceRestorer for RecordingRestorer {
        fn channel_order(&self) -> ChannelOrder {
            ChannelOrder::Rgb
        }

        fn restore(&mut self, image: &Image, faces: &[DetectedFace]) -> Result<Image, RestoreError> {
            self.seen.lock().unwrap().extend_from_slice(faces);
            let mut out = image.clone();
            for p in out.pixels_mut().pixels_mut() {
                p.0[1] = p.0[1].saturating_add(1);
            }
            Ok(out)
        }
    }

    struct Harness {
        pipeline: SwapPipeline,
        calls: Arc<Mutex<Vec<(f32, f32)>>>,
    }

    fn harness(source: Vec<DetectedFace>, target: Vec<DetectedFace>, tier: EnhancementTier) -> Harness {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let detector = FakeDetector {
            faces: HashMap::from([(CAPTURED_W, source), (TEMPLATE_W, target)]),
        };
        let pipeline = SwapPipeline::new(
            Some(Box::new(detector)),
            Some(Box::new(PaintSwapper { calls: calls.clone() })),
            QualityEnhancer::new(tier),
        );
        Harness { pipeline, calls }
    }

    fn run(h: &mut Harness, enhance: bool) -> Result<SwapResult, PipelineError> {
        h.pipeline.run(&png(CAPTURED_W), &png(TEMPLATE_W), enhance)
    }

    #[test]
    fn test_faces_swapped_is_min_of_counts() {
        for n_src in 1..4 {
            for n_dst in 1..4 {
                let src = (0..n_src).map(|i| face(i as f32 * 150.0, 200)).collect();
                let dst = (0..n_dst).map(|i| face(i as f32 * 150.0, 0)).collect();
                let mut h = harness(src, dst, EnhancementTier::Disabled);
                let result = run(&mut h, false).unwrap();
                assert_eq!(result.faces_swapped, n_src.min(n_dst));
                assert_eq!(h.calls.lock().unwrap().len(), n_src.min(n_dst));
            }
        }
    }

    #[test]
    fn test_leftmost_source_goes_to_leftmost_target() {
        let src = vec![face(400.0, 220), face(100.0, 180)];
        let dst = vec![face(300.0, 0)];
        let mut h = harness(src, dst, EnhancementTier::Disabled);

        let result = run(&mut h, false).unwrap();
        assert_eq!(result.faces_swapped, 1);
        assert!(!result.enhanced);
        assert_eq!(*h.calls.lock().unwrap(), vec![(100.0, 300.0)]);

        let px = result.image.pixels();
        assert_eq!(px.get_pixel(310, 120).0, [180, 180, 180]);
        for (x, y, p) in px.enumerate_pixels() {
            let inside = (300..360).contains(&x) && (100..160).contains(&y);
            if !inside {
                assert_eq!(p.0, BACKGROUND, "pixel ({x},{y}) changed");
            }
        }
    }

    #[test]
    fn test_swaps_chain_on_one_canvas() {
        let src = vec![face(0.0, 90), face(200.0, 150)];
        let dst = vec![face(350.0, 0), face(50.0, 0)];
        let mut h = harness(src, dst, EnhancementTier::Disabled);

        let result = run(&mut h, false).unwrap();
        assert_eq!(*h.calls.lock().unwrap(), vec![(0.0, 50.0), (200.0, 350.0)]);
        // The second swap must not undo the first.
        assert_eq!(result.image.pixels().get_pixel(60, 120).0, [90, 90, 90]);
        assert_eq!(result.image.pixels().get_pixel(360, 120).0, [150, 150, 150]);
    }

    #[test]
    fn test_no_face_in_captured() {
        let mut h = harness(vec![], vec![face(10.0, 0)], EnhancementTier::Disabled);
        assert!(matches!(run(&mut h, true), Err(PipelineError::NoFaceDetected(ImageRole::Captured))));
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_no_face_in_template() {
        let mut h = harness(vec![face(10.0, 0)], vec![], EnhancementTier::Disabled);
        assert!(matches!(run(&mut h, true), Err(PipelineError::NoFaceDetected(ImageRole::Template))));
    }

    #[test]
    fn test_missing_swapper_fails_before_decoding() {
        let detector = FakeDetector { faces: HashMap::new() };
        let mut pipeline = SwapPipeline::new(
            Some(Box::new(detector)),
            None,
            QualityEnhancer::new(EnhancementTier::Disabled),
        );
        let err = pipeline.run(b"not an image", b"nor this", true).unwrap_err();
        assert!(matches!(err, PipelineError::SwapCapabilityUnavailable));
        assert!(!pipeline.capabilities().swapper);
    }

    #[test]
    fn test_missing_detector() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = SwapPipeline::new(
            None,
            Some(Box::new(PaintSwapper { calls })),
            QualityEnhancer::new(EnhancementTier::Disabled),
        );
        let err = pipeline.run(&png(CAPTURED_W), &png(TEMPLATE_W), false).unwrap_err();
        assert!(matches!(err, PipelineError::DetectionUnavailable));
    }

    #[test]
    fn test_undecodable_captured_image() {
        let mut h = harness(vec![face(10.0, 0)], vec![face(10.0, 0)], EnhancementTier::Disabled);
        let err = h.pipeline.run(b"garbage", &png(TEMPLATE_W), true).unwrap_err();
        assert!(matches!(err, PipelineError::Decode { role: ImageRole::Captured, .. }));
    }

    #[test]
    fn test_enhancement_off_leaves_composite_untouched() {
        let mut plain = harness(vec![face(100.0, 200)], vec![face(300.0, 0)], EnhancementTier::Disabled);
        let mut upscaling = harness(vec![face(100.0, 200)], vec![face(300.0, 0)], EnhancementTier::SimpleUpscale);

        let a = run(&mut plain, false).unwrap();
        let b = run(&mut upscaling, false).unwrap();
        assert!(!b.enhanced);
        assert!(a.image.same_pixels(&b.image));
    }

    #[test]
    fn test_simple_upscale_tier() {
        let mut h = harness(vec![face(100.0, 200)], vec![face(300.0, 0)], EnhancementTier::SimpleUpscale);
        let result = run(&mut h, true).unwrap();
        assert!(result.enhanced);
        assert_eq!((result.image.width(), result.image.height()), (TEMPLATE_W * 2, HEIGHT * 2));
        assert_eq!(h.pipeline.capabilities().enhancement, TierKind::SimpleUpscale);
    }

    #[test]
    fn test_restorer_sees_swapped_target_faces() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let restorer = RecordingRestorer { seen: seen.clone() };
        let mut h = harness(
            vec![face(100.0, 200), face(300.0, 100)],
            vec![face(50.0, 0), face(250.0, 0), face(500.0, 0)],
            EnhancementTier::NeuralRestoration(Box::new(restorer)),
        );

        let result = run(&mut h, true).unwrap();
        assert!(result.enhanced);
        let xs: Vec<f32> = seen.lock().unwrap().iter().map(|f| f.bbox.x0).collect();
        assert_eq!(xs, vec![50.0, 250.0]);
    }

    /// Fails its first call, then brightens like [`RecordingRestorer`].
    struct FailOnceRestorer {
        calls: usize,
    }

    impl FaceRestorer for FailOnceRestorer {
        fn channel_order(&self) -> ChannelOrder {
            ChannelOrder::Bgr
        }

        fn restore(&mut self, image: &Image, _faces: &[DetectedFace]) -> Result<Image, RestoreError> {
            self.calls += 1;
            if self.calls == 1 {
                return Err(RestoreError::Failed("out of memory".into()));
            }
            let mut out = image.clone();
            for p in out.pixels_mut().pixels_mut() {
                p.0[1] = p.0[1].saturating_add(1);
            }
            Ok(out)
        }
    }

    #[test]
    fn test_restorer_failure_returns_composite_for_that_request() {
        let mut plain = harness(vec![face(100.0, 200)], vec![face(300.0, 0)], EnhancementTier::Disabled);
        let composite = run(&mut plain, false).unwrap().image;

        let mut h = harness(
            vec![face(100.0, 200)],
            vec![face(300.0, 0)],
            EnhancementTier::NeuralRestoration(Box::new(FailOnceRestorer { calls: 0 })),
        );

        let failed = run(&mut h, true).unwrap();
        assert!(!failed.enhanced);
        assert_eq!(failed.faces_swapped, 1);
        assert!(failed.image.same_pixels(&composite));

        let next = run(&mut h, true).unwrap();
        assert!(next.enhanced);
        assert!(!next.image.same_pixels(&composite));
        assert_eq!(h.pipeline.capabilities().enhancement, TierKind::NeuralRestoration);
    }

    #[test]
    fn test_extreme_aspect_capture_rejected() {
        let sliver = {
            let img = RgbImage::from_pixel(1, 20_000, Rgb(BACKGROUND));
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Png).unwrap();
            out.into_inner()
        };
        let mut h = harness(vec![face(10.0, 0)], vec![face(10.0, 0)], EnhancementTier::Disabled);
        let err = h.pipeline.run(&sliver, &png(TEMPLATE_W), false).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Decode { role: ImageRole::Captured, source: DecodeError::TooLarge { .. } }
        ));
    }

    #[test]
    fn test_small_inputs_are_upscaled_before_detection() {
        // Detector keyed on the upscaled width; a 300x260 capture becomes 591x512.
        let small = {
            let img = RgbImage::from_pixel(300, 260, Rgb(BACKGROUND));
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Png).unwrap();
            out.into_inner()
        };
        let detector = FakeDetector {
            faces: HashMap::from([(591, vec![face(10.0, 77)]), (TEMPLATE_W, vec![face(300.0, 0)])]),
        };
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = SwapPipeline::new(
            Some(Box::new(detector)),
            Some(Box::new(PaintSwapper { calls })),
            QualityEnhancer::new(EnhancementTier::Disabled),
        );
        let result = pipeline.run(&small, &png(TEMPLATE_W), false).unwrap();
        assert_eq!(result.faces_swapped, 1);
    }

    #[test]
    fn test_load_with_no_models_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = SwapPipeline::load(&ModelPaths::new(dir.path()));
        let caps = pipeline.capabilities();
        assert!(!caps.detector);
        assert!(!caps.swapper);
        assert_eq!(caps.enhancement, TierKind::SimpleUpscale);
    }
}
