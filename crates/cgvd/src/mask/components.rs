//! 4-connected component labeling over binarized masks.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::{Mask, BINARY_THRESHOLD};

/// Label image produced by [`label`]: 0 = background, 1..=n = components.
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Label the 4-connected components of a mask.
///
/// Returns the label image and the number of components found.
pub fn label(mask: &Mask) -> (LabelImage, usize) {
    let (w, h) = mask.dimensions();
    let mut gray = GrayImage::new(w, h);
    for (g, &v) in gray.iter_mut().zip(mask.iter()) {
        *g = if v > BINARY_THRESHOLD { 255 } else { 0 };
    }
    let labels = connected_components(&gray, Connectivity::Four, Luma([0u8]));
    let n = labels.iter().copied().max().unwrap_or(0) as usize;
    (labels, n)
}

/// Zero every pixel of `mask` outside the component with label `keep`.
///
/// Surviving pixels retain their original soft values.
pub fn retain_component(mask: &Mask, labels: &LabelImage, keep: u32) -> Mask {
    assert_eq!(
        mask.dimensions(),
        labels.dimensions(),
        "mask shape mismatch in retain_component: {:?} vs {:?}",
        mask.dimensions(),
        labels.dimensions()
    );
    let (w, h) = mask.dimensions();
    let data = mask
        .iter()
        .zip(labels.iter())
        .map(|(&v, &l)| if l == keep { v } else { 0.0 })
        .collect();
    Mask::from_raw(w, h, data).expect("retain_component preserves dimensions")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{nonzero_count, union};
    use crate::test_utils::rect_mask;

    #[test]
    fn two_disjoint_rects_give_two_components() {
        let m = union(
            &rect_mask(16, 16, 1, 1, 4, 4),
            &rect_mask(16, 16, 8, 8, 12, 12),
        );
        let (_, n) = label(&m);
        assert_eq!(n, 2);
    }

    #[test]
    fn diagonal_touch_is_not_connected() {
        // Two 1x1 pixels sharing only a corner: 4-connectivity keeps them apart.
        let m = union(&rect_mask(4, 4, 0, 0, 1, 1), &rect_mask(4, 4, 1, 1, 2, 2));
        let (_, n) = label(&m);
        assert_eq!(n, 2);
    }

    #[test]
    fn retain_component_drops_the_rest() {
        let a = rect_mask(16, 16, 1, 1, 4, 4);
        let b = rect_mask(16, 16, 8, 8, 12, 12);
        let m = union(&a, &b);
        let (labels, n) = label(&m);
        assert_eq!(n, 2);
        let label_a = labels.get_pixel(2, 2)[0];
        let kept = retain_component(&m, &labels, label_a);
        assert_eq!(nonzero_count(&kept), nonzero_count(&a));
        assert_eq!(kept.get_pixel(9, 9)[0], 0.0);
    }
}
