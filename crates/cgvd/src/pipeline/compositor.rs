//! Feathered, multiply-gated compositing of the clean plate over the live
//! frame.
//!
//! The soft feather alone cannot guarantee correctness: robot motion through
//! a distractor region would otherwise drag soft alpha values over raw
//! distractor pixels, and jitter near mask boundaries could shave pixels off
//! the target. Two hard overrides run after the feather every frame:
//!
//! 1. clamp: alpha forced to 1 on undilated distractor pixels outside the
//!    protected core, so raw distractor pixels can never leak through;
//! 2. re-enforcement: alpha forced to 0 on the live safe set and the
//!    protected core, so target, anchor and robot are never occluded by
//!    the cached background, however the feather falls.

use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;

use crate::mask::{self, Mask, BINARY_THRESHOLD};

/// Inputs to one composite, all in the episode's frame geometry.
pub struct CompositeInputs<'a> {
    /// Live frame from the environment.
    pub live: &'a RgbImage,
    /// Cached clean plate.
    pub clean: &'a RgbImage,
    /// Undilated, safe-subtracted distractor region (feather seed).
    pub compositing_mask: &'a Mask,
    /// Raw distractor detections, undilated, pre-subtraction.
    pub distractor_raw: &'a Mask,
    /// Live safe set: target + anchor + current robot mask.
    pub safe_live: &'a Mask,
    /// Dilated target+anchor core; wide enough that the feather tail is
    /// negligible at its boundary.
    pub protected_core: &'a Mask,
}

/// Blend the clean plate over the live frame.
///
/// With `sigma = 0` the feather is skipped and the composite is an exact
/// binary selection between the two source images.
pub fn composite(inputs: &CompositeInputs<'_>, sigma: f32) -> RgbImage {
    let (w, h) = inputs.live.dimensions();

    let mut alpha = if sigma > 0.0 {
        gaussian_blur_f32(inputs.compositing_mask, sigma)
    } else {
        mask::binarize(inputs.compositing_mask, BINARY_THRESHOLD)
    };

    for (i, a) in alpha.iter_mut().enumerate() {
        let distractor = inputs.distractor_raw.as_raw()[i] > BINARY_THRESHOLD;
        let core = inputs.protected_core.as_raw()[i] > BINARY_THRESHOLD;
        let safe = inputs.safe_live.as_raw()[i] > BINARY_THRESHOLD;
        if distractor && !core {
            *a = 1.0;
        }
        if safe || core {
            *a = 0.0;
        }
    }

    blend(inputs.live, inputs.clean, alpha.as_raw(), w, h)
}

/// Ablation composite: flat fill of the mask region with the mean color of
/// all unmasked pixels. Replaces the feathered clean-plate blend wholesale.
pub fn mean_fill(live: &RgbImage, fill_mask: &Mask) -> RgbImage {
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for (i, pixel) in live.pixels().enumerate() {
        if fill_mask.as_raw()[i] <= BINARY_THRESHOLD {
            for (s, &c) in sums.iter_mut().zip(pixel.0.iter()) {
                *s += u64::from(c);
            }
            count += 1;
        }
    }
    let mean = if count == 0 {
        [0u8; 3]
    } else {
        [
            (sums[0] / count) as u8,
            (sums[1] / count) as u8,
            (sums[2] / count) as u8,
        ]
    };

    let mut out = live.clone();
    for (i, pixel) in out.pixels_mut().enumerate() {
        if fill_mask.as_raw()[i] > BINARY_THRESHOLD {
            pixel.0 = mean;
        }
    }
    out
}

/// Per-channel `alpha × clean + (1 − alpha) × live`, cast back to u8.
fn blend(live: &RgbImage, clean: &RgbImage, alpha: &[f32], w: u32, h: u32) -> RgbImage {
    assert_eq!(
        live.dimensions(),
        clean.dimensions(),
        "mask shape mismatch in blend: {:?} vs {:?}",
        live.dimensions(),
        clean.dimensions()
    );
    let mut out = RgbImage::new(w, h);
    let lraw = live.as_raw();
    let craw = clean.as_raw();
    for (i, pixel) in out.pixels_mut().enumerate() {
        let a = alpha[i].clamp(0.0, 1.0);
        let base = i * 3;
        for c in 0..3 {
            let lv = lraw[base + c] as f32;
            let cv = craw[base + c] as f32;
            pixel.0[c] = (a * cv + (1.0 - a) * lv).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
