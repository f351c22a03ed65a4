//! Binary dilation for protective buffers around mask edges.

use image::GrayImage;
use imageproc::distance_transform::Norm;

use super::{Mask, BINARY_THRESHOLD};

/// Dilate a mask by `radius` pixels (Chebyshev norm, i.e. a square kernel).
///
/// The input is binarized at the gating threshold first; the output is an
/// exact 0/1 mask. `radius = 0` returns the binarized input unchanged.
pub fn dilate(mask: &Mask, radius: u32) -> Mask {
    let (w, h) = mask.dimensions();
    let mut gray = GrayImage::new(w, h);
    for (g, &v) in gray.iter_mut().zip(mask.iter()) {
        *g = if v > BINARY_THRESHOLD { 255 } else { 0 };
    }
    if radius > 0 {
        // imageproc's kernel parameter is u8; clamp instead of wrapping for
        // pathological radii.
        let k = radius.min(u8::MAX as u32) as u8;
        gray = imageproc::morphology::dilate(&gray, Norm::LInf, k);
    }
    let data = gray.iter().map(|&g| if g > 0 { 1.0 } else { 0.0 }).collect();
    Mask::from_raw(w, h, data).expect("dilate preserves dimensions")
}
