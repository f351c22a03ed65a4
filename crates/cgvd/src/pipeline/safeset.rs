//! Warm-up safe-set accumulation.
//!
//! Over a fixed warm-up window the accumulator repeatedly queries the
//! segmenter for the target and anchor concepts, gates new target detections
//! against the already-accumulated mask (IoU), keeps a parallel per-pixel
//! vote count, and cross-validates every target instance against the
//! distractor detections of the same frame. The final warm-up frame runs a
//! connected-component cleanup that keeps the single best-scoring component.
//!
//! Anchors are trusted: they are accumulated unconditionally and never
//! scored or cleaned.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::DistillConfig;
use crate::mask::{self, components, Mask, BINARY_THRESHOLD};
use crate::services::Segmentation;

/// IoU above which a distractor instance counts as a competing
/// interpretation of a target instance during cross-validation.
const CROSS_VALIDATION_IOU: f32 = 0.3;

/// Cross-validation record for one target instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceGenuineness {
    pub concept: String,
    pub instance_index: usize,
    /// The instance's own safe-set confidence.
    pub own_score: f32,
    /// `own_score − (best overlapping distractor score + margin)`;
    /// positive ⇒ corroborated as genuine, negative ⇒ suspected distractor
    /// confusion. Never used to drop an instance, only to bias component
    /// scoring.
    pub genuineness: f32,
}

/// Per-frame accumulation decision for the target concept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TargetUpdate {
    /// Unioned into the accumulated mask. `iou` is `None` on ungated frames.
    Accepted { pixels: usize, iou: Option<f32> },
    /// Below the minimum pixel count (also covers "no detection at all").
    RejectedTooSmall { pixels: usize },
    /// IoU with the accumulated mask did not clear the gate.
    RejectedIou { iou: f32 },
}

/// Per-component score from the final cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentScore {
    pub label: u32,
    pub pixels: usize,
    pub avg_votes: f32,
    pub dist_overlap: f32,
    pub genuineness: f32,
    pub score: f32,
}

/// Accumulates target/anchor masks over the warm-up window.
pub struct SafeSetAccumulator {
    width: u32,
    height: u32,
    target_concept: String,
    anchor_concept: Option<String>,
    target: Mask,
    anchor: Mask,
    /// Per-pixel count of warm-up frames whose accepted target detection
    /// covered that pixel. Updated in lockstep with `target`.
    votes: Vec<u32>,
    /// Per-pixel best genuineness among target instances covering the pixel.
    genuineness_map: Vec<f32>,
    /// All cross-validation records, in observation order.
    instances: Vec<InstanceGenuineness>,
    frames_seen: u32,
}

impl SafeSetAccumulator {
    pub fn new(width: u32, height: u32, target: &str, anchor: Option<&str>) -> Self {
        let n = (width * height) as usize;
        Self {
            width,
            height,
            target_concept: target.to_string(),
            anchor_concept: anchor.map(str::to_string),
            target: mask::zeros(width, height),
            anchor: mask::zeros(width, height),
            votes: vec![0; n],
            genuineness_map: vec![f32::NEG_INFINITY; n],
            instances: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn target_mask(&self) -> &Mask {
        &self.target
    }

    pub fn anchor_mask(&self) -> &Mask {
        &self.anchor
    }

    /// `max(target, anchor)`: the region distillation must never touch.
    pub fn safe_mask(&self) -> Mask {
        mask::union(&self.target, &self.anchor)
    }

    pub fn votes(&self) -> &[u32] {
        &self.votes
    }

    pub fn instance_records(&self) -> &[InstanceGenuineness] {
        &self.instances
    }

    /// Ingest one warm-up frame's safe-set query, cross-validated against
    /// the same frame's distractor query.
    pub fn observe(
        &mut self,
        safe_seg: &Segmentation,
        distractor_seg: &Segmentation,
        config: &DistillConfig,
    ) -> TargetUpdate {
        let frame_idx = self.frames_seen;
        self.frames_seen += 1;

        self.cross_validate(safe_seg, distractor_seg, config.genuineness_margin);

        // Anchor: always trusted, unconditional union.
        if let Some(anchor) = self.anchor_concept.clone() {
            let detection = safe_seg.concept_mask(&anchor, self.width, self.height);
            mask::max_in_place(&mut self.anchor, &detection);
        }

        // Target: minimum-size gate, then IoU gate once past the early frames.
        let detection = safe_seg.concept_mask(&self.target_concept, self.width, self.height);
        let pixels = mask::nonzero_count(&detection);
        if pixels < config.min_component_pixels {
            debug!(
                frame_idx,
                pixels,
                min = config.min_component_pixels,
                "target detection below minimum size, skipped"
            );
            return TargetUpdate::RejectedTooSmall { pixels };
        }

        let update = if frame_idx < config.iou_gate_start_frame {
            TargetUpdate::Accepted { pixels, iou: None }
        } else {
            let iou = mask::iou(&detection, &self.target);
            if iou > config.iou_gate_threshold {
                TargetUpdate::Accepted {
                    pixels,
                    iou: Some(iou),
                }
            } else {
                warn!(
                    frame_idx,
                    iou,
                    gate = config.iou_gate_threshold,
                    "target detection rejected by IoU gate"
                );
                TargetUpdate::RejectedIou { iou }
            }
        };

        if let TargetUpdate::Accepted { .. } = update {
            mask::max_in_place(&mut self.target, &detection);
            for (vote, &v) in self.votes.iter_mut().zip(detection.iter()) {
                if v > BINARY_THRESHOLD {
                    *vote += 1;
                }
            }
        }
        update
    }

    /// Cross-validation is compute-only: every instance keeps its mask; the
    /// scores only bias the final component selection.
    fn cross_validate(
        &mut self,
        safe_seg: &Segmentation,
        distractor_seg: &Segmentation,
        margin: f32,
    ) {
        for inst in safe_seg.instances_of(&self.target_concept) {
            let best_competitor = distractor_seg
                .instances
                .iter()
                .filter(|d| mask::iou(&inst.mask, &d.mask) > CROSS_VALIDATION_IOU)
                .map(|d| d.score)
                .fold(0.0, f32::max);
            let genuineness = inst.score - (best_competitor + margin);

            for (g, &v) in self.genuineness_map.iter_mut().zip(inst.mask.iter()) {
                if v > BINARY_THRESHOLD && genuineness > *g {
                    *g = genuineness;
                }
            }
            self.instances.push(InstanceGenuineness {
                concept: inst.concept.clone(),
                instance_index: inst.instance_index,
                own_score: inst.score,
                genuineness,
            });
        }
    }

    /// Connected-component cleanup on the accumulated target mask.
    ///
    /// Scores every 4-connected component as
    /// `avg_votes × (1 − dist_overlap) × (1 + genuineness)` and keeps only
    /// the best one (ties broken by lowest label, so reruns are
    /// deterministic). Returns the per-component scores, or `None` when at
    /// most one component exists and there is nothing to clean.
    pub fn cleanup(
        &mut self,
        distractor_raw: &Mask,
        config: &DistillConfig,
    ) -> Option<Vec<ComponentScore>> {
        assert_eq!(
            distractor_raw.dimensions(),
            self.target.dimensions(),
            "mask shape mismatch in cleanup: {:?} vs {:?}",
            distractor_raw.dimensions(),
            self.target.dimensions()
        );
        let (labels, n) = components::label(&self.target);
        if n <= 1 {
            return None;
        }

        let mut pixels = vec![0usize; n + 1];
        let mut vote_sum = vec![0u64; n + 1];
        let mut dist_pixels = vec![0usize; n + 1];
        let mut best_genuineness = vec![f32::NEG_INFINITY; n + 1];
        for (idx, &l) in labels.iter().enumerate() {
            if l == 0 {
                continue;
            }
            let l = l as usize;
            pixels[l] += 1;
            vote_sum[l] += u64::from(self.votes[idx]);
            if distractor_raw.as_raw()[idx] > BINARY_THRESHOLD {
                dist_pixels[l] += 1;
            }
            if self.genuineness_map[idx] > best_genuineness[l] {
                best_genuineness[l] = self.genuineness_map[idx];
            }
        }

        let mut scores = Vec::with_capacity(n);
        for l in 1..=n {
            let count = pixels[l].max(1);
            let avg_votes = vote_sum[l] as f32 / count as f32;
            let dist_overlap =
                (dist_pixels[l] as f32 / count as f32).min(config.overlap_penalty_cap);
            let genuineness = if best_genuineness[l].is_finite() {
                best_genuineness[l]
            } else {
                0.0
            };
            scores.push(ComponentScore {
                label: l as u32,
                pixels: pixels[l],
                avg_votes,
                dist_overlap,
                genuineness,
                score: avg_votes * (1.0 - dist_overlap) * (1.0 + genuineness),
            });
        }

        // Strict `>` keeps the lowest label on ties.
        let mut best = &scores[0];
        for s in &scores[1..] {
            if s.score > best.score {
                best = s;
            }
        }
        debug!(
            n_components = n,
            kept = best.label,
            score = best.score,
            "safe-set component cleanup"
        );

        let keep = best.label;
        self.target = components::retain_component(&self.target, &labels, keep);
        for (idx, &l) in labels.iter().enumerate() {
            if l != keep {
                self.votes[idx] = 0;
            }
        }
        Some(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::nonzero_count;
    use crate::test_utils::{rect_mask, seg_with, DIMS};

    fn config() -> DistillConfig {
        DistillConfig {
            min_component_pixels: 4,
            iou_gate_start_frame: 2,
            iou_gate_threshold: 0.25,
            ..Default::default()
        }
    }

    fn accumulator() -> SafeSetAccumulator {
        SafeSetAccumulator::new(DIMS.0, DIMS.1, "spoon", Some("towel"))
    }

    #[test]
    fn early_frames_accumulate_unconditionally() {
        let cfg = config();
        let mut acc = accumulator();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);

        // Two disjoint detections on the two ungated frames: both unioned.
        let a = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8), 0.9)]);
        let b = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 20, 20, 28, 28), 0.9)]);
        assert!(matches!(
            acc.observe(&a, &empty, &cfg),
            TargetUpdate::Accepted { iou: None, .. }
        ));
        assert!(matches!(
            acc.observe(&b, &empty, &cfg),
            TargetUpdate::Accepted { iou: None, .. }
        ));
        assert_eq!(nonzero_count(acc.target_mask()), 128);
    }

    #[test]
    fn iou_gate_rejects_and_leaves_mask_unchanged() {
        let cfg = config();
        let mut acc = accumulator();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);
        let stable = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8), 0.9)]);
        acc.observe(&stable, &empty, &cfg);
        acc.observe(&stable, &empty, &cfg);

        let before = nonzero_count(acc.target_mask());
        // Frame index 2: gate active; a disjoint detection must be rejected.
        let jumped = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 20, 20, 28, 28), 0.9)]);
        let update = acc.observe(&jumped, &empty, &cfg);
        assert!(matches!(update, TargetUpdate::RejectedIou { iou } if iou == 0.0));
        assert_eq!(nonzero_count(acc.target_mask()), before);

        // The same stable detection still passes the gate.
        assert!(matches!(
            acc.observe(&stable, &empty, &cfg),
            TargetUpdate::Accepted { iou: Some(_), .. }
        ));
    }

    #[test]
    fn undersized_detection_is_skipped_without_vote_update() {
        let cfg = DistillConfig {
            min_component_pixels: 100,
            ..config()
        };
        let mut acc = accumulator();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);
        let small = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 3, 3), 0.9)]);
        assert!(matches!(
            acc.observe(&small, &empty, &cfg),
            TargetUpdate::RejectedTooSmall { pixels: 9 }
        ));
        assert!(acc.votes().iter().all(|&v| v == 0));
    }

    #[test]
    fn anchor_accumulates_even_when_target_rejected() {
        let cfg = DistillConfig {
            min_component_pixels: 100,
            ..config()
        };
        let mut acc = accumulator();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);
        let seg = seg_with(&[
            ("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 3, 3), 0.9),
            ("towel", rect_mask(DIMS.0, DIMS.1, 10, 10, 20, 20), 0.8),
        ]);
        acc.observe(&seg, &empty, &cfg);
        assert_eq!(nonzero_count(acc.anchor_mask()), 100);
        assert_eq!(nonzero_count(acc.target_mask()), 0);
    }

    #[test]
    fn genuineness_goes_negative_under_distractor_confusion() {
        let cfg = config();
        let mut acc = accumulator();
        let region = rect_mask(DIMS.0, DIMS.1, 4, 4, 12, 12);
        let seg = seg_with(&[("spoon", region.clone(), 0.6)]);
        let distractors = seg_with(&[("spatula", region, 0.9)]);
        acc.observe(&seg, &distractors, &cfg);

        let rec = &acc.instance_records()[0];
        assert!(rec.genuineness < 0.0);
        assert!((rec.genuineness - (0.6 - 0.9)).abs() < 1e-6);
    }

    #[test]
    fn genuineness_stays_positive_without_overlap() {
        let cfg = config();
        let mut acc = accumulator();
        let seg = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8), 0.6)]);
        let distractors = seg_with(&[("fork", rect_mask(DIMS.0, DIMS.1, 20, 20, 28, 28), 0.95)]);
        acc.observe(&seg, &distractors, &cfg);
        assert!((acc.instance_records()[0].genuineness - 0.6).abs() < 1e-6);
    }

    #[test]
    fn cleanup_keeps_best_component_and_is_deterministic() {
        let cfg = config();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);
        let true_spoon = rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8);
        let spurious = rect_mask(DIMS.0, DIMS.1, 20, 20, 26, 26);

        let mut reference = None;
        for _ in 0..3 {
            let mut acc = accumulator();
            // True spoon seen twice, spurious blob once: higher avg votes win.
            let both = seg_with(&[
                ("spoon", true_spoon.clone(), 0.9),
                ("spoon", spurious.clone(), 0.9),
            ]);
            let only_true = seg_with(&[("spoon", true_spoon.clone(), 0.9)]);
            acc.observe(&both, &empty, &cfg);
            acc.observe(&only_true, &empty, &cfg);

            let scores = acc.cleanup(&mask::zeros(DIMS.0, DIMS.1), &cfg).unwrap();
            assert_eq!(scores.len(), 2);
            assert_eq!(nonzero_count(acc.target_mask()), 64);
            assert_eq!(acc.target_mask().get_pixel(22, 22)[0], 0.0);

            let kept: Vec<u32> = scores.iter().map(|s| s.label).collect();
            match &reference {
                None => reference = Some(kept),
                Some(prev) => assert_eq!(prev, &kept),
            }
        }
    }

    #[test]
    fn cleanup_skips_single_component() {
        let cfg = config();
        let mut acc = accumulator();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);
        let seg = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8), 0.9)]);
        acc.observe(&seg, &empty, &cfg);
        assert!(acc.cleanup(&mask::zeros(DIMS.0, DIMS.1), &cfg).is_none());
        assert_eq!(nonzero_count(acc.target_mask()), 64);
    }

    #[test]
    fn cleanup_votes_follow_kept_component() {
        let cfg = config();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);
        let mut acc = accumulator();
        let both = seg_with(&[
            ("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8), 0.9),
            ("spoon", rect_mask(DIMS.0, DIMS.1, 20, 20, 26, 26), 0.9),
        ]);
        let only_first = seg_with(&[("spoon", rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8), 0.9)]);
        acc.observe(&both, &empty, &cfg);
        acc.observe(&only_first, &empty, &cfg);
        acc.cleanup(&mask::zeros(DIMS.0, DIMS.1), &cfg);

        // Votes outside the kept component are zeroed with the mask.
        let idx = (22 * DIMS.0 + 22) as usize;
        assert_eq!(acc.votes()[idx], 0);
        let kept_idx = (4 * DIMS.0 + 4) as usize;
        assert_eq!(acc.votes()[kept_idx], 2);
    }

    #[test]
    fn negative_genuineness_flips_component_selection() {
        // A true spoon and a visually similar spatula both pass the safe-set
        // threshold with equal votes. The spatula region coincides with a
        // higher-confidence distractor detection, so its genuineness goes
        // negative and the true spoon wins the cleanup.
        let cfg = config();
        let spoon = rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8);
        let spatula_region = rect_mask(DIMS.0, DIMS.1, 20, 20, 28, 28);
        let mut acc = accumulator();
        let both = seg_with(&[
            ("spoon", spoon.clone(), 0.6),
            ("spoon", spatula_region.clone(), 0.6),
        ]);
        let distractors = seg_with(&[("spatula", spatula_region.clone(), 0.9)]);
        acc.observe(&both, &distractors, &cfg);
        acc.observe(&both, &distractors, &cfg);

        // No raw-distractor overlap penalty in play: the spatula was not a
        // *configured* distractor region, only a competing interpretation.
        let scores = acc.cleanup(&mask::zeros(DIMS.0, DIMS.1), &cfg).unwrap();
        assert_eq!(nonzero_count(acc.target_mask()), 64);
        assert_eq!(acc.target_mask().get_pixel(4, 4)[0], 1.0);
        assert_eq!(acc.target_mask().get_pixel(24, 24)[0], 0.0);
        let negative = scores.iter().find(|s| s.genuineness < 0.0).unwrap();
        assert!(negative.score < scores.iter().find(|s| s.genuineness > 0.0).unwrap().score);
    }

    #[test]
    fn distractor_overlap_penalizes_component_selection() {
        let cfg = config();
        let spoon = rect_mask(DIMS.0, DIMS.1, 0, 0, 8, 8);
        let spatula = rect_mask(DIMS.0, DIMS.1, 20, 20, 28, 28);
        let mut acc = accumulator();
        let empty = Segmentation::empty(DIMS.0, DIMS.1);
        let both = seg_with(&[
            ("spoon", spoon.clone(), 0.9),
            ("spoon", spatula.clone(), 0.9),
        ]);
        // Equal votes for both components.
        acc.observe(&both, &empty, &cfg);
        acc.observe(&both, &empty, &cfg);

        // The spatula region is also a raw distractor detection.
        let scores = acc.cleanup(&spatula, &cfg).unwrap();
        assert_eq!(nonzero_count(acc.target_mask()), 64);
        assert_eq!(acc.target_mask().get_pixel(4, 4)[0], 1.0);
        let penalized = scores.iter().find(|s| s.dist_overlap > 0.0).unwrap();
        assert!((penalized.dist_overlap - cfg.overlap_penalty_cap).abs() < 1e-6);
    }
}
