//! Detection plus identity embedding in one capability.

use crate::detector::{DetectorError, FaceDetector, ScrfdDetector};
use crate::recognizer::FaceRecognizer;
use crate::types::{DetectedFace, Image};

/// SCRFD detection followed by ArcFace embedding of every face.
///
/// Faces the detector returned without landmarks are kept, just without an
/// embedding.
pub struct FaceAnalyzer {
    detector: ScrfdDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyzer {
    pub fn new(detector: ScrfdDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both models.
    pub fn load(scrfd_path: &str, arcface_path: &str, input_size: usize) -> Result<Self, DetectorError> {
        let detector = ScrfdDetector::load(scrfd_path, input_size)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self::new(detector, recognizer))
    }
}

impl FaceDetector for FaceAnalyzer {
    fn detect(&mut self, image: &Image) -> Result<Vec<DetectedFace>, DetectorError> {
        let mut faces = self.detector.detect_boxes(image)?;
        for face in faces.iter_mut().filter(|f| f.landmarks.is_some()) {
            face.embedding = Some(self.recognizer.extract(image, face)?);
        }
        Ok(faces)
    }
}
