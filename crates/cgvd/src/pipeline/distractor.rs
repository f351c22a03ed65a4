//! Distractor mask accumulation and safe-set gating.
//!
//! Distractors are assumed static, so warm-up accumulation is a plain
//! per-pixel maximum with no IoU gating. After warm-up the raw mask either
//! freezes for the episode (default) or is replaced wholesale on a fixed
//! frame interval. Gating then derives the two working masks:
//!
//! - inpainting region: `dilate(distractor) AND NOT dilate(safe)`
//! - compositing region: `distractor AND NOT dilate(safe)`
//!
//! The subtraction makes `inpaint ∩ safe = ∅` true by construction for any
//! dilation radii; it is not a heuristic.

use tracing::debug;

use crate::config::DistillConfig;
use crate::mask::{self, morphology, Mask, BINARY_THRESHOLD};
use crate::services::Segmentation;

/// The two gated distractor regions consumed downstream.
#[derive(Debug, Clone)]
pub struct GatedMasks {
    /// Dilated, safe-subtracted region handed to the inpainting backend.
    pub inpaint: Mask,
    /// Undilated, safe-subtracted region that seeds the compositing feather.
    pub compositing: Mask,
}

/// Accumulates raw distractor detections for one episode.
pub struct DistractorMaskBuilder {
    raw: Mask,
}

impl DistractorMaskBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            raw: mask::zeros(width, height),
        }
    }

    /// Raw accumulated detections, pre-subtraction.
    pub fn raw_mask(&self) -> &Mask {
        &self.raw
    }

    /// Warm-up accumulation: per-pixel maximum into the raw mask.
    pub fn observe(&mut self, seg: &Segmentation) {
        mask::max_in_place(&mut self.raw, &seg.combined);
    }

    /// Periodic re-detection: the raw mask is replaced, not accumulated.
    pub fn refresh(&mut self, seg: &Segmentation) {
        debug!(
            pixels = mask::nonzero_count(&seg.combined),
            "distractor mask refreshed"
        );
        self.raw = seg.combined.clone();
    }

    /// Derive the gated working masks against the (frozen) safe set.
    pub fn gated(&self, safe: &Mask, config: &DistillConfig) -> GatedMasks {
        let dilated = morphology::dilate(&self.raw, config.lama_dilation);
        if config.disable_safeset {
            return GatedMasks {
                inpaint: dilated,
                compositing: mask::binarize(&self.raw, BINARY_THRESHOLD),
            };
        }
        let safe_dilated = morphology::dilate(safe, config.safe_dilation);
        GatedMasks {
            inpaint: mask::and_not(&dilated, &safe_dilated),
            compositing: mask::and_not(&self.raw, &safe_dilated),
        }
    }
}
