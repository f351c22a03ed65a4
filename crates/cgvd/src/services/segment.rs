//! Open-vocabulary segmentation contract.

use image::RgbImage;

use crate::error::ServiceError;
use crate::mask::{self, Mask};

/// One detected instance of a concept.
///
/// A concept may yield several spatially-disjoint instances per query; each
/// carries its own mask and confidence. Instances are structured records;
/// core logic never parses identity out of display names.
#[derive(Debug, Clone)]
pub struct InstanceDetection {
    /// Concept the instance belongs to (e.g. `"spoon"`).
    pub concept: String,
    /// Index among this concept's instances in the same query, starting at 0.
    pub instance_index: usize,
    /// Soft confidence mask for this instance.
    pub mask: Mask,
    /// Detection confidence in [0, 1]; 0.0 means "not found".
    pub score: f32,
}

impl InstanceDetection {
    /// Display name: bare concept for a sole instance, `concept_i` otherwise.
    /// Used only for logs and debug records.
    pub fn display_name(&self, siblings: usize) -> String {
        if siblings <= 1 {
            self.concept.clone()
        } else {
            format!("{}_{}", self.concept, self.instance_index)
        }
    }
}

/// Result of one segmentation query.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Per-pixel maximum over all instance masks. Concepts are never merged
    /// except through this max.
    pub combined: Mask,
    /// Per-instance detections, in backend order.
    pub instances: Vec<InstanceDetection>,
}

impl Segmentation {
    /// A result with no detections: all-zero combined mask, no instances.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            combined: mask::zeros(width, height),
            instances: Vec::new(),
        }
    }

    /// Instances belonging to `concept`.
    pub fn instances_of<'a>(
        &'a self,
        concept: &'a str,
    ) -> impl Iterator<Item = &'a InstanceDetection> {
        self.instances.iter().filter(move |i| i.concept == concept)
    }

    /// Per-pixel maximum over the instances of one concept.
    ///
    /// Returns an all-zero mask when the concept was not detected; absence
    /// is data, not an error.
    pub fn concept_mask(&self, concept: &str, width: u32, height: u32) -> Mask {
        let mut out = mask::zeros(width, height);
        for inst in self.instances_of(concept) {
            mask::max_in_place(&mut out, &inst.mask);
        }
        out
    }

    /// Best confidence among instances of `concept`, 0.0 when absent.
    pub fn best_score(&self, concept: &str) -> f32 {
        self.instances_of(concept)
            .map(|i| i.score)
            .fold(0.0, f32::max)
    }
}

/// Open-vocabulary segmentation backend.
///
/// `concepts` is a `". "`-separated list of concept names (see
/// [`crate::instruction::concept_prompt`]). Instances scoring below
/// `threshold` are omitted; a concept with no surviving instance simply does
/// not appear in `instances`; the backend must never fail for "not found".
pub trait Segmenter {
    fn segment(
        &self,
        image: &RgbImage,
        concepts: &str,
        threshold: f32,
    ) -> Result<Segmentation, ServiceError>;
}
