//! Quality enhancement with a three-tier fallback chain.
//!
//! The tier is probed once at startup (neural restoration, then simple
//! upscaling, then nothing) and never changes afterwards. Per request, any
//! error or panic inside the selected transform is contained here and the
//! request falls back to the unenhanced image.

use crate::restorer::{FaceRestorer, RestoreError};
use crate::types::{DetectedFace, Image};
use image::imageops::{self, FilterType};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};

/// Scale factor of the simple-upscale tier.
pub const SIMPLE_UPSCALE_FACTOR: u32 = 2;

/// Enhancement capability selected at startup.
pub enum EnhancementTier {
    NeuralRestoration(Box<dyn FaceRestorer + Send>),
    SimpleUpscale,
    Disabled,
}

/// Payload-free view of an [`EnhancementTier`] for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    NeuralRestoration,
    SimpleUpscale,
    Disabled,
}

impl EnhancementTier {
    pub fn kind(&self) -> TierKind {
        match self {
            EnhancementTier::NeuralRestoration(_) => TierKind::NeuralRestoration,
            EnhancementTier::SimpleUpscale => TierKind::SimpleUpscale,
            EnhancementTier::Disabled => TierKind::Disabled,
        }
    }
}

/// Pick the best available tier.
///
/// `neural` constructs the restoration handle; `simple` checks that the
/// upscaling fallback works. Failures are logged and fall through to the
/// next tier.
pub fn probe_tier<N, S>(neural: N, simple: S) -> EnhancementTier
where
    N: FnOnce() -> Result<Box<dyn FaceRestorer + Send>, RestoreError>,
    S: FnOnce() -> Result<(), RestoreError>,
{
    match neural() {
        Ok(restorer) => {
            tracing::info!("enhancement tier: neural restoration");
            return EnhancementTier::NeuralRestoration(restorer);
        }
        Err(e) => tracing::warn!(error = %e, "neural restoration unavailable; trying simple upscale"),
    }

    match simple() {
        Ok(()) => {
            tracing::info!(factor = SIMPLE_UPSCALE_FACTOR, "enhancement tier: simple upscale");
            EnhancementTier::SimpleUpscale
        }
        Err(e) => {
            tracing::warn!(error = %e, "simple upscale unavailable; enhancement disabled");
            EnhancementTier::Disabled
        }
    }
}

/// Sanity check for the simple-upscale tier: resize a tiny image.
pub fn probe_simple_upscale() -> Result<(), RestoreError> {
    let probe = Image::from_rgb(image::RgbImage::new(1, 1));
    let out = upscale(&probe, SIMPLE_UPSCALE_FACTOR);
    if out.width() == SIMPLE_UPSCALE_FACTOR && out.height() == SIMPLE_UPSCALE_FACTOR {
        Ok(())
    } else {
        Err(RestoreError::Failed(format!(
            "upscale probe produced {}x{}",
            out.width(),
            out.height()
        )))
    }
}

/// Cubic (Catmull-Rom) resize by an integer factor, keeping the channel order.
pub fn upscale(image: &Image, factor: u32) -> Image {
    let resized = imageops::resize(
        image.pixels(),
        image.width() * factor,
        image.height() * factor,
        FilterType::CatmullRom,
    );
    Image::new(resized, image.order())
}

/// Result of one enhancement attempt.
#[derive(Debug, Clone)]
pub struct Enhanced {
    pub image: Image,
    /// True only when a transform ran and changed the image.
    pub enhanced: bool,
}

/// Applies the startup-selected tier to composited images.
pub struct QualityEnhancer {
    tier: EnhancementTier,
}

impl QualityEnhancer {
    pub fn new(tier: EnhancementTier) -> Self {
        Self { tier }
    }

    pub fn tier(&self) -> TierKind {
        self.tier.kind()
    }

    /// Enhance `image` when `requested`. Never fails.
    ///
    /// `faces` are the swapped faces in `image` coordinates; only the neural
    /// tier uses them.
    pub fn enhance(&mut self, image: Image, faces: &[DetectedFace], requested: bool) -> Enhanced {
        if !requested || matches!(self.tier, EnhancementTier::Disabled) {
            return Enhanced { image, enhanced: false };
        }

        let tier = &mut self.tier;
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| match tier {
            EnhancementTier::NeuralRestoration(restorer) => restore(restorer.as_mut(), &image, faces),
            EnhancementTier::SimpleUpscale => Ok(upscale(&image, SIMPLE_UPSCALE_FACTOR)),
            EnhancementTier::Disabled => Ok(image.clone()),
        }))
        .unwrap_or_else(|payload| Err(RestoreError::Failed(panic_message(payload.as_ref()))));

        match attempt {
            Ok(out) if !out.same_pixels(&image) => Enhanced { image: out, enhanced: true },
            Ok(_) => Enhanced { image, enhanced: false },
            Err(e) => {
                tracing::warn!(error = %e, "enhancement failed; returning unenhanced image");
                Enhanced { image, enhanced: false }
            }
        }
    }
}

/// Run the restorer in its own channel order and convert back.
fn restore(
    restorer: &mut (dyn FaceRestorer + Send),
    image: &Image,
    faces: &[DetectedFace],
) -> Result<Image, RestoreError> {
    let working = image.order();
    let input = image.clone().into_order(restorer.channel_order());
    let output = restorer.restore(&input, faces)?;
    Ok(output.into_order(working))
}

/// Human-readable text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
