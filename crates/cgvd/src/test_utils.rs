//! Shared test fixtures: synthetic masks and frames, deterministic mock
//! services, and a scripted environment.
//!
//! Consolidated here so every module's tests build scenes the same way
//! instead of growing private copies of `rect_mask` and friends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbImage;

use crate::env::{Environment, Observation, StepOutcome};
use crate::error::{EnvError, ServiceError};
use crate::mask::{self, Mask};
use crate::services::{
    Inpainter, InstanceDetection, ModelRegistry, Segmentation, Segmenter,
};

/// Default frame geometry for unit tests.
pub const DIMS: (u32, u32) = (32, 32);

/// Camera key produced by [`ScriptedEnv`].
pub const CAMERA: &str = "overhead_camera";

/// Mask that is 1.0 inside `[x0, x1) × [y0, y1)` and 0.0 elsewhere.
pub fn rect_mask(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Mask {
    let mut m = mask::zeros(w, h);
    for y in y0..y1.min(h) {
        for x in x0..x1.min(w) {
            m.put_pixel(x, y, image::Luma([1.0]));
        }
    }
    m
}

/// Uniformly colored frame.
pub fn flat_rgb(w: u32, h: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(w, h, image::Rgb(color))
}

/// Build a segmentation result from `(concept, mask, score)` triples.
/// Instance indices count up per concept; the combined mask is the
/// per-pixel max.
pub fn seg_with(detections: &[(&str, Mask, f32)]) -> Segmentation {
    let (w, h) = detections
        .first()
        .map(|(_, m, _)| m.dimensions())
        .unwrap_or(DIMS);
    let mut combined = mask::zeros(w, h);
    let mut instances = Vec::new();
    for (concept, m, score) in detections {
        let instance_index = instances
            .iter()
            .filter(|i: &&InstanceDetection| i.concept == *concept)
            .count();
        mask::max_in_place(&mut combined, m);
        instances.push(InstanceDetection {
            concept: concept.to_string(),
            instance_index,
            mask: m.clone(),
            score: *score,
        });
    }
    Segmentation {
        combined,
        instances,
    }
}

/// Single-instance result for tests that only care about the combined mask.
pub fn seg_from_mask(m: Mask) -> Segmentation {
    seg_with(&[("distractor", m, 0.9)])
}

/// Shared call counter handed out by the mocks.
#[derive(Clone)]
pub struct CallCounter(Arc<AtomicU64>);

impl CallCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// One concept the mock segmenter knows how to "detect".
pub struct ConceptSpec {
    concept: String,
    mask: Mask,
    score: f32,
}

impl ConceptSpec {
    pub fn new(concept: &str, mask: Mask, score: f32) -> Self {
        Self {
            concept: concept.to_string(),
            mask,
            score,
        }
    }
}

struct ScheduledMove {
    concept: String,
    mask: Mask,
    /// Takes effect once the total call count reaches this value.
    at_call: u64,
}

/// Deterministic segmenter: returns the configured mask/score for every
/// requested concept it knows, honoring scheduled mid-episode moves.
pub struct MockSegmenter {
    specs: Mutex<Vec<ConceptSpec>>,
    moves: Mutex<Vec<ScheduledMove>>,
    calls: Arc<AtomicU64>,
}

impl MockSegmenter {
    pub fn new(specs: Vec<ConceptSpec>) -> Self {
        Self {
            specs: Mutex::new(specs),
            moves: Mutex::new(Vec::new()),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn call_counter(&self) -> CallCounter {
        CallCounter(self.calls.clone())
    }

    /// Relocate `concept` to `mask` once the segmenter has served
    /// `at_call − 1` queries.
    pub fn schedule_move(&self, concept: &str, mask: Mask, at_call: u64) {
        self.moves.lock().unwrap().push(ScheduledMove {
            concept: concept.to_string(),
            mask,
            at_call,
        });
    }
}

impl Segmenter for MockSegmenter {
    fn segment(
        &self,
        image: &RgbImage,
        concepts: &str,
        threshold: f32,
    ) -> Result<Segmentation, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let (w, h) = image.dimensions();
        let specs = self.specs.lock().unwrap();
        let moves = self.moves.lock().unwrap();

        let mut combined = mask::zeros(w, h);
        let mut instances: Vec<InstanceDetection> = Vec::new();
        for requested in concepts.split(". ") {
            for spec in specs.iter().filter(|s| s.concept == requested) {
                if spec.score < threshold {
                    continue;
                }
                let effective = moves
                    .iter()
                    .rfind(|m| m.concept == spec.concept && call >= m.at_call)
                    .map(|m| m.mask.clone())
                    .unwrap_or_else(|| spec.mask.clone());
                let instance_index = instances
                    .iter()
                    .filter(|i| i.concept == requested)
                    .count();
                mask::max_in_place(&mut combined, &effective);
                instances.push(InstanceDetection {
                    concept: requested.to_string(),
                    instance_index,
                    mask: effective,
                    score: spec.score,
                });
            }
        }
        Ok(Segmentation {
            combined,
            instances,
        })
    }
}

/// Inpainter that paints every masked pixel a fixed color.
pub struct MockInpainter {
    color: [u8; 3],
    calls: Arc<AtomicU64>,
}

impl MockInpainter {
    pub fn flat(color: [u8; 3]) -> Self {
        Self {
            color,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn call_counter(&self) -> CallCounter {
        CallCounter(self.calls.clone())
    }
}

impl Inpainter for MockInpainter {
    fn inpaint(&self, image: &RgbImage, mask: &Mask) -> Result<RgbImage, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = image.clone();
        for (i, pixel) in out.pixels_mut().enumerate() {
            if mask.as_raw()[i] > mask::BINARY_THRESHOLD {
                pixel.0 = self.color;
            }
        }
        Ok(out)
    }
}

pub fn registry(segmenter: MockSegmenter, inpainter: MockInpainter) -> ModelRegistry {
    ModelRegistry::new(Arc::new(segmenter), Arc::new(inpainter))
}

/// Minimal deterministic environment: one camera, frames derived from the
/// step counter so any mutation is detectable bit-for-bit.
pub struct ScriptedEnv {
    width: u32,
    height: u32,
    instruction: String,
    distractor_names: Option<Vec<String>>,
    step_count: u64,
    render_count: u32,
    last_reward: f64,
}

impl ScriptedEnv {
    pub fn new(width: u32, height: u32, instruction: &str) -> Self {
        Self {
            width,
            height,
            instruction: instruction.to_string(),
            distractor_names: None,
            step_count: 0,
            render_count: 0,
            last_reward: 0.0,
        }
    }

    pub fn with_distractor_names(mut self, names: Vec<String>) -> Self {
        self.distractor_names = Some(names);
        self
    }

    /// The frame the environment would render right now.
    pub fn current_frame(&self) -> RgbImage {
        let step = self.step_count;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let v = (u64::from(x) * 3 + u64::from(y) * 5 + step * 7) % 251;
            image::Rgb([v as u8, (v / 2) as u8, 100])
        })
    }

    pub fn render_count(&self) -> u32 {
        self.render_count
    }

    pub fn last_reward(&self) -> f64 {
        self.last_reward
    }

    fn observation(&self) -> Observation {
        Observation::with_camera(CAMERA, self.current_frame())
    }
}

impl Environment for ScriptedEnv {
    type Action = f64;

    fn reset(&mut self, _seed: Option<u64>) -> Result<Observation, EnvError> {
        self.step_count = 0;
        self.last_reward = 0.0;
        Ok(self.observation())
    }

    fn step(&mut self, _action: &f64) -> Result<StepOutcome, EnvError> {
        self.step_count += 1;
        self.last_reward = 0.05 * self.step_count as f64;
        Ok(StepOutcome {
            observation: self.observation(),
            reward: self.last_reward,
            terminated: false,
            truncated: false,
        })
    }

    fn render(&mut self) -> Result<Observation, EnvError> {
        self.render_count += 1;
        Ok(self.observation())
    }

    fn language_instruction(&self) -> Option<String> {
        Some(self.instruction.clone())
    }

    fn distractor_names(&self) -> Option<Vec<String>> {
        self.distractor_names.clone()
    }
}
