//! Deterministic left-to-right correspondence between two face sets.

use crate::types::{DetectedFace, FacePair, ImageRole};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PairingError {
    #[error("no faces detected in {0}")]
    NoFaceDetected(ImageRole),
}

/// Sort faces leftmost first by `bbox.x0`.
///
/// The sort is stable: faces with identical `x0` keep the order the
/// detector returned them in. NaN coordinates follow IEEE total ordering.
pub fn sort_left_to_right(faces: &mut [DetectedFace]) {
    faces.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
}

/// Pair captured (source) faces with template (target) faces by position.
///
/// Pair `i` joins the i-th leftmost source face with the i-th leftmost
/// target face. Faces beyond the shorter list are dropped. Both lists must
/// be non-empty.
pub fn pair_faces(
    mut source: Vec<DetectedFace>,
    mut target: Vec<DetectedFace>,
) -> Result<Vec<FacePair>, PairingError> {
    if source.is_empty() {
        return Err(PairingError::NoFaceDetected(ImageRole::Captured));
    }
    if target.is_empty() {
        return Err(PairingError::NoFaceDetected(ImageRole::Template));
    }

    sort_left_to_right(&mut source);
    sort_left_to_right(&mut target);

    let unpaired = source.len().abs_diff(target.len());
    if unpaired > 0 {
        tracing::debug!(
            source = source.len(),
            target = target.len(),
            unpaired,
            "face counts differ; extra faces left untouched"
        );
    }

    Ok(source
        .into_iter()
        .zip(target)
        .enumerate()
        .map(|(index, (source, target))| FacePair { index, source, target })
        .collect())
}
