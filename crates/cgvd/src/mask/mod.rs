//! Soft-mask arithmetic over `Luma<f32>` buffers.
//!
//! Masks carry per-pixel confidence in [0, 1]. Compositing consumes the soft
//! values directly; every gating decision first binarizes at
//! [`BINARY_THRESHOLD`]. All operations are pure; combining masks of
//! different shapes is a programming error and panics with both shapes in
//! the message; externally supplied masks are shape-checked at the wrapper
//! boundary before they get here.

pub mod components;
pub mod morphology;

use image::{ImageBuffer, Luma};

/// Soft confidence mask, one `f32` in [0, 1] per pixel.
pub type Mask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Threshold separating "present" from "absent" when a soft mask is used
/// for gating.
pub const BINARY_THRESHOLD: f32 = 0.5;

/// All-zero mask of the given dimensions.
pub fn zeros(width: u32, height: u32) -> Mask {
    Mask::new(width, height)
}

#[inline]
fn check_dims(a: &Mask, b: &Mask, op: &str) {
    assert_eq!(
        a.dimensions(),
        b.dimensions(),
        "mask shape mismatch in {op}: {:?} vs {:?}",
        a.dimensions(),
        b.dimensions()
    );
}

/// Per-pixel maximum, accumulated into `dst`.
pub fn max_in_place(dst: &mut Mask, src: &Mask) {
    check_dims(dst, src, "max_in_place");
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        if s > *d {
            *d = s;
        }
    }
}

/// Per-pixel maximum of two masks.
pub fn union(a: &Mask, b: &Mask) -> Mask {
    let mut out = a.clone();
    max_in_place(&mut out, b);
    out
}

/// Binarize at `threshold`: output pixels are exactly 0.0 or 1.0.
pub fn binarize(mask: &Mask, threshold: f32) -> Mask {
    let (w, h) = mask.dimensions();
    let data = mask
        .iter()
        .map(|&v| if v > threshold { 1.0 } else { 0.0 })
        .collect();
    Mask::from_raw(w, h, data).expect("binarize preserves dimensions")
}

/// Binary `a AND NOT b`: keeps pixels of `a` above the gating threshold that
/// are not covered by `b`. Output is exactly 0/1.
pub fn and_not(a: &Mask, b: &Mask) -> Mask {
    check_dims(a, b, "and_not");
    let (w, h) = a.dimensions();
    let data = a
        .iter()
        .zip(b.iter())
        .map(|(&av, &bv)| {
            if av > BINARY_THRESHOLD && bv <= BINARY_THRESHOLD {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    Mask::from_raw(w, h, data).expect("and_not preserves dimensions")
}

/// Number of pixels above the gating threshold.
pub fn nonzero_count(mask: &Mask) -> usize {
    mask.iter().filter(|&&v| v > BINARY_THRESHOLD).count()
}

/// True when no pixel passes the gating threshold.
pub fn is_empty(mask: &Mask) -> bool {
    nonzero_count(mask) == 0
}

/// Intersection-over-union of two masks, binarized at the gating threshold.
///
/// Returns 0.0 when the union is empty.
pub fn iou(a: &Mask, b: &Mask) -> f32 {
    check_dims(a, b, "iou");
    let mut inter = 0usize;
    let mut uni = 0usize;
    for (&av, &bv) in a.iter().zip(b.iter()) {
        let ab = av > BINARY_THRESHOLD;
        let bb = bv > BINARY_THRESHOLD;
        if ab && bb {
            inter += 1;
        }
        if ab || bb {
            uni += 1;
        }
    }
    if uni == 0 {
        0.0
    } else {
        inter as f32 / uni as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::rect_mask;

    #[test]
    fn union_takes_pixelwise_max() {
        let a = rect_mask(8, 8, 0, 0, 4, 4);
        let b = rect_mask(8, 8, 2, 2, 6, 6);
        let u = union(&a, &b);
        assert_eq!(nonzero_count(&u), 16 + 16 - 4);
    }

    #[test]
    fn and_not_subtracts_exactly() {
        let a = rect_mask(8, 8, 0, 0, 4, 4);
        let b = rect_mask(8, 8, 0, 0, 2, 2);
        let d = and_not(&a, &b);
        assert_eq!(nonzero_count(&d), 16 - 4);
        // Subtracted region is hard zero.
        assert_eq!(d.get_pixel(1, 1)[0], 0.0);
        assert_eq!(d.get_pixel(3, 3)[0], 1.0);
    }

    #[test]
    fn iou_of_identical_masks_is_one() {
        let a = rect_mask(10, 10, 2, 2, 7, 7);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_masks_is_zero() {
        let a = rect_mask(10, 10, 0, 0, 3, 3);
        let b = rect_mask(10, 10, 5, 5, 9, 9);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_of_empty_masks_is_zero() {
        let a = zeros(4, 4);
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn binarize_snaps_soft_values() {
        let mut m = zeros(2, 2);
        m.put_pixel(0, 0, Luma([0.8]));
        m.put_pixel(1, 0, Luma([0.3]));
        let b = binarize(&m, BINARY_THRESHOLD);
        assert_eq!(b.get_pixel(0, 0)[0], 1.0);
        assert_eq!(b.get_pixel(1, 0)[0], 0.0);
    }

    #[test]
    #[should_panic(expected = "mask shape mismatch")]
    fn mismatched_shapes_panic_with_diagnostic() {
        let a = zeros(4, 4);
        let b = zeros(5, 4);
        let _ = iou(&a, &b);
    }
}
