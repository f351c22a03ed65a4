//! Wrapper configuration.
//!
//! All tuning knobs of the distillation pipeline in one place, with defaults
//! that match the reference tuning. Construction-time validation is loud:
//! a nonsensical value is a configuration error, never a silent clamp.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Optional per-frame diagnostic output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Directory receiving panel images and the decision log.
    pub dir: PathBuf,
}

/// Distillation pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillConfig {
    /// Observation key of the camera to distill.
    pub camera_name: String,
    /// Distractor concepts to remove. Empty ⇒ the wrapper is a strict
    /// pass-through and no model is ever queried.
    pub distractor_names: Vec<String>,
    /// Number of internal warm-up frames per episode (≥ 1).
    pub safeset_warmup_frames: u32,
    /// Confidence threshold for target/anchor (safe-set) queries.
    pub presence_threshold: f32,
    /// Confidence threshold for distractor queries.
    pub distractor_presence_threshold: f32,
    /// Confidence threshold for robot queries.
    pub robot_presence_threshold: f32,
    /// Gaussian sigma for the compositing feather. 0 disables blending and
    /// composites with a hard edge.
    pub blend_sigma: f32,
    /// Dilation radius (px) applied to the distractor mask before safe-set
    /// subtraction; also the margin handed to the inpainting backend.
    pub lama_dilation: u32,
    /// Dilation radius (px) applied to the safe-set mask before it is
    /// subtracted from the distractor region.
    pub safe_dilation: u32,
    /// Freeze the distractor mask after warm-up (default). When false, the
    /// distractors are re-queried every `update_freq` frames.
    pub cache_distractor_once: bool,
    /// Distractor re-query period in frames; only read when
    /// `cache_distractor_once` is false.
    pub update_freq: u32,
    /// Optional wholesale clean-plate refresh period in frames.
    pub cache_refresh_interval: Option<u32>,
    /// Slack subtracted inside the cross-validation score: an instance is
    /// corroborated only when its own score beats the best overlapping
    /// distractor score by more than this margin.
    pub genuineness_margin: f32,
    /// Minimum IoU between a new target detection and the accumulated mask
    /// for the detection to be accepted once the gate is active.
    pub iou_gate_threshold: f32,
    /// Frame index (0-based, within warm-up) at which the IoU gate starts;
    /// earlier frames accumulate unconditionally.
    pub iou_gate_start_frame: u32,
    /// Minimum pixel count for a target detection to be considered at all.
    pub min_component_pixels: usize,
    /// Ceiling on the distractor-overlap penalty in component scoring.
    pub overlap_penalty_cap: f32,
    /// Ablation: skip safe-set subtraction entirely.
    pub disable_safeset: bool,
    /// Ablation: flat mean-color fill instead of inpainted background.
    pub disable_inpaint: bool,
    /// Diagnostic side channel; `None` (default) writes nothing.
    pub debug: Option<DebugConfig>,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            camera_name: "overhead_camera".to_string(),
            distractor_names: Vec::new(),
            safeset_warmup_frames: 5,
            presence_threshold: 0.3,
            distractor_presence_threshold: 0.4,
            robot_presence_threshold: 0.15,
            blend_sigma: 2.0,
            lama_dilation: 12,
            safe_dilation: 6,
            cache_distractor_once: true,
            update_freq: 10,
            cache_refresh_interval: None,
            genuineness_margin: 0.0,
            iou_gate_threshold: 0.25,
            iou_gate_start_frame: 2,
            min_component_pixels: 40,
            overlap_penalty_cap: 0.8,
            disable_safeset: false,
            disable_inpaint: false,
            debug: None,
        }
    }
}

impl DistillConfig {
    /// Validate the configuration. Called by the wrapper constructor; every
    /// rejection names the offending field and value.
    pub fn validate(&self) -> Result<(), String> {
        if self.camera_name.is_empty() {
            return Err("camera_name must not be empty".to_string());
        }
        if self.safeset_warmup_frames == 0 {
            return Err("safeset_warmup_frames must be >= 1".to_string());
        }
        for (name, v) in [
            ("presence_threshold", self.presence_threshold),
            (
                "distractor_presence_threshold",
                self.distractor_presence_threshold,
            ),
            ("robot_presence_threshold", self.robot_presence_threshold),
            ("iou_gate_threshold", self.iou_gate_threshold),
            ("overlap_penalty_cap", self.overlap_penalty_cap),
        ] {
            if !(0.0..=1.0).contains(&v) || !v.is_finite() {
                return Err(format!("{name} must be in [0, 1], got {v}"));
            }
        }
        if !self.blend_sigma.is_finite() || self.blend_sigma < 0.0 {
            return Err(format!(
                "blend_sigma must be finite and >= 0, got {}",
                self.blend_sigma
            ));
        }
        if !self.genuineness_margin.is_finite() {
            return Err("genuineness_margin must be finite".to_string());
        }
        if !self.cache_distractor_once && self.update_freq == 0 {
            return Err("update_freq must be >= 1 when distractors are re-queried".to_string());
        }
        if self.cache_refresh_interval == Some(0) {
            return Err("cache_refresh_interval must be >= 1 when set".to_string());
        }
        Ok(())
    }

    /// Dilation radius for the protected target+anchor core used by the
    /// compositor: the distractor dilation plus three feather sigmas, so the
    /// Gaussian tail is negligible at the protection boundary.
    pub(crate) fn protect_dilation(&self) -> u32 {
        self.lama_dilation + (3.0 * self.blend_sigma).ceil() as u32
    }
}
