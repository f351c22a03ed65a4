//! Episode orchestration: the distillation wrapper around an environment.
//!
//! Lifecycle per episode:
//!
//! 1. `reset`: forward to the inner environment, adopt the episode's
//!    distractor names and instruction, then drive the warm-up protocol
//!    internally: repeated perception passes over the settled scene (no
//!    physics stepping, nothing exposed to the caller), accumulating the
//!    safe set and distractor masks, then one inpainting call producing the
//!    episode's clean plate.
//! 2. `step`: forward the action, re-segment only the robot (it moves;
//!    everything else is frozen), composite, and write the distilled frame
//!    back under the same camera key.
//!
//! With no distractor names configured the wrapper is a strict pass-through:
//! no model is ever queried and observations are returned untouched.

use std::time::Instant;

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::config::DistillConfig;
use crate::debug_dump::DebugSink;
use crate::env::{Environment, Observation, StepOutcome};
use crate::error::DistillError;
use crate::instruction::{self, ParsedInstruction};
use crate::mask::{self, morphology, Mask, BINARY_THRESHOLD};
use crate::pipeline::{
    compositor, CompositeInputs, DistractorMaskBuilder, GatedMasks, SafeSetAccumulator,
};
use crate::services::{ModelRegistry, Segmentation};
use crate::timing::{PipelineTiming, TimingSnapshot};

/// Read-only view of the cached episode masks, for inspection and tests.
pub struct EpisodeMasks<'a> {
    /// Accumulated target mask, frozen after warm-up.
    pub target: &'a Mask,
    /// Accumulated anchor mask, frozen after warm-up.
    pub anchor: &'a Mask,
    /// Raw distractor detections, pre-subtraction.
    pub distractor_raw: &'a Mask,
    /// Dilated, safe-subtracted region the inpainter was asked to remove.
    pub inpaint: &'a Mask,
    /// Undilated, safe-subtracted compositing region.
    pub compositing: &'a Mask,
    /// Robot mask from the most recent frame.
    pub robot: &'a Mask,
}

struct EpisodeState {
    width: u32,
    height: u32,
    distractor_prompt: String,
    safeset: SafeSetAccumulator,
    distractor: DistractorMaskBuilder,
    /// `max(target, anchor)`, recomputed whenever the safe set changes.
    safe_mask: Mask,
    gated: GatedMasks,
    /// Dilated target+anchor core protected from both feather and clamp.
    protected_core: Mask,
    /// `None` only in the mean-fill ablation.
    clean_plate: Option<RgbImage>,
    last_robot_mask: Mask,
    /// Frames since reset, warm-up included.
    frame_count: u64,
}

/// Visual-distillation wrapper around an [`Environment`].
pub struct DistillWrapper<E: Environment> {
    env: E,
    config: DistillConfig,
    models: ModelRegistry,
    state: Option<EpisodeState>,
    has_reset: bool,
    passthrough: bool,
    timing: PipelineTiming,
    debug: Option<DebugSink>,
}

impl<E: Environment> DistillWrapper<E> {
    /// Construct the wrapper. Configuration problems are rejected here,
    /// before any model or environment call.
    pub fn new(
        env: E,
        config: DistillConfig,
        models: ModelRegistry,
    ) -> Result<Self, DistillError> {
        config.validate().map_err(DistillError::Config)?;
        let debug = match &config.debug {
            Some(dc) => Some(DebugSink::new(dc)?),
            None => None,
        };
        Ok(Self {
            env,
            config,
            models,
            state: None,
            has_reset: false,
            passthrough: false,
            timing: PipelineTiming::default(),
            debug,
        })
    }

    pub fn config(&self) -> &DistillConfig {
        &self.config
    }

    /// Inner environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    /// Wall-clock telemetry accumulated since construction.
    pub fn timing(&self) -> TimingSnapshot {
        self.timing.snapshot()
    }

    /// Cached episode masks; `None` before the first warm-up completes or
    /// in pass-through mode.
    pub fn episode_masks(&self) -> Option<EpisodeMasks<'_>> {
        self.state.as_ref().map(|s| EpisodeMasks {
            target: s.safeset.target_mask(),
            anchor: s.safeset.anchor_mask(),
            distractor_raw: s.distractor.raw_mask(),
            inpaint: &s.gated.inpaint,
            compositing: &s.gated.compositing,
            robot: &s.last_robot_mask,
        })
    }

    /// Reset the inner environment and run the warm-up protocol.
    ///
    /// The returned observation is the first post-warm-up distilled frame;
    /// none of the internal warm-up frames are ever exposed.
    pub fn reset(&mut self, seed: Option<u64>) -> Result<Observation, DistillError> {
        let mut obs = self.env.reset(seed)?;
        self.state = None;
        self.has_reset = true;

        let names = self
            .env
            .distractor_names()
            .unwrap_or_else(|| self.config.distractor_names.clone());
        self.passthrough = names.is_empty();
        if self.passthrough {
            debug!("no distractor names configured; wrapper is a pass-through");
            return Ok(obs);
        }

        let t0 = Instant::now();
        let (width, height) = camera_frame(&obs, &self.config.camera_name)?.dimensions();

        let parsed = match self.env.language_instruction() {
            Some(text) => instruction::parse(&text),
            None => ParsedInstruction {
                target: instruction::FALLBACK_TARGET.to_string(),
                anchor: None,
            },
        };
        info!(
            "starting distillation episode: target='{}' anchor={:?} distractors={}",
            parsed.target,
            parsed.anchor,
            names.len()
        );

        self.run_warmup(width, height, &parsed, &names)?;

        // One more pass on the settled scene to produce the first visible
        // distilled observation.
        let live_obs = self.env.render()?;
        let live = camera_frame(&live_obs, &self.config.camera_name)?.clone();
        check_frame_shape(&live, width, height, "post-warm-up frame")?;
        let distilled = self.distill_frame(&live)?;
        obs.cameras
            .insert(self.config.camera_name.clone(), distilled);
        self.timing.pipeline.record(t0.elapsed());
        Ok(obs)
    }

    /// Forward an action and distill the resulting frame.
    pub fn step(&mut self, action: &E::Action) -> Result<StepOutcome, DistillError> {
        if !self.has_reset {
            return Err(DistillError::NotReset);
        }
        if self.passthrough {
            return Ok(self.env.step(action)?);
        }

        // A failed reset leaves no episode state behind; require a clean one.
        let (width, height) = match self.state.as_ref() {
            Some(state) => (state.width, state.height),
            None => return Err(DistillError::NotReset),
        };
        let t0 = Instant::now();
        let mut outcome = self.env.step(action)?;
        let live = camera_frame(&outcome.observation, &self.config.camera_name)?.clone();
        check_frame_shape(&live, width, height, "step frame")?;

        let distilled = self.distill_frame(&live)?;
        outcome
            .observation
            .cameras
            .insert(self.config.camera_name.clone(), distilled);
        self.timing.pipeline.record(t0.elapsed());
        Ok(outcome)
    }

    /// Warm-up protocol: W perception-only passes over the settled scene.
    fn run_warmup(
        &mut self,
        width: u32,
        height: u32,
        parsed: &ParsedInstruction,
        names: &[String],
    ) -> Result<(), DistillError> {
        let safe_prompt =
            instruction::concept_prompt(&parsed.target, parsed.anchor.as_deref(), false);
        let distractor_prompt = names.join(". ");

        let mut safeset =
            SafeSetAccumulator::new(width, height, &parsed.target, parsed.anchor.as_deref());
        let mut distractor = DistractorMaskBuilder::new(width, height);
        let mut robot_union = mask::zeros(width, height);
        let mut last_robot_mask = mask::zeros(width, height);
        let mut final_frame: Option<RgbImage> = None;
        let mut hide_warned = false;

        let warmup = self.config.safeset_warmup_frames;
        for frame_idx in 0..warmup {
            // Early frames prefer a robot-hidden render so the arm cannot
            // occlude the target/anchor query. Best-effort only.
            let early = frame_idx < self.config.iou_gate_start_frame;
            let mut perception_frame: Option<RgbImage> = None;
            if early {
                match self.env.set_robot_visible(false) {
                    Ok(()) => {
                        let hidden_obs = self.env.render()?;
                        perception_frame =
                            Some(camera_frame(&hidden_obs, &self.config.camera_name)?.clone());
                        if let Err(e) = self.env.set_robot_visible(true) {
                            warn!(error = %e, "failed to restore robot visibility");
                        }
                    }
                    Err(e) => {
                        if !hide_warned {
                            warn!(error = %e, "robot-hide unavailable; warm-up sees the robot");
                            hide_warned = true;
                        }
                    }
                }
            }

            let live_obs = self.env.render()?;
            let live = camera_frame(&live_obs, &self.config.camera_name)?.clone();
            check_frame_shape(&live, width, height, "warm-up frame")?;
            let perception = perception_frame.unwrap_or_else(|| live.clone());

            let safe_seg = self.segment_timed(
                &perception,
                &safe_prompt,
                self.config.presence_threshold,
                width,
                height,
            )?;
            let dist_seg = self.segment_timed(
                &perception,
                &distractor_prompt,
                self.config.distractor_presence_threshold,
                width,
                height,
            )?;
            let robot_seg = self.segment_timed(
                &live,
                instruction::robot_prompt(),
                self.config.robot_presence_threshold,
                width,
                height,
            )?;

            let update = safeset.observe(&safe_seg, &dist_seg, &self.config);
            distractor.observe(&dist_seg);
            mask::max_in_place(&mut robot_union, &robot_seg.combined);
            last_robot_mask = robot_seg.combined;

            if let Some(sink) = &mut self.debug {
                sink.record_warmup(frame_idx, &update, safeset.instance_records())?;
            }
            if frame_idx + 1 == warmup {
                final_frame = Some(live);
            }
        }

        let scores = safeset.cleanup(distractor.raw_mask(), &self.config);
        let target_missing = mask::is_empty(safeset.target_mask());
        if target_missing {
            // Debug-time visual warning only: a missing target must not
            // crash a long evaluation sweep.
            warn!("target '{}' never detected during warm-up", parsed.target);
        }
        if let Some(sink) = &mut self.debug {
            sink.record_cleanup(scores.as_deref(), target_missing)?;
        }

        // In the safe-set ablation the cached safe mask is all-zero for the
        // whole episode, so neither the subtraction nor the compositor's
        // target/anchor protection fires. The robot keeps its own guard.
        let safe_mask = if self.config.disable_safeset {
            mask::zeros(width, height)
        } else {
            safeset.safe_mask()
        };
        let gated = distractor.gated(&safe_mask, &self.config);
        let protected_core = morphology::dilate(&safe_mask, self.config.protect_dilation());

        // Clean plate: inpaint distractor+robot out of the live final frame
        // (not a robot-hidden render, which would bake in a lighting shift).
        let clean_plate = if self.config.disable_inpaint {
            None
        } else {
            let frame = final_frame.as_ref().expect("warm-up ran at least once");
            let inpaint_mask = mask::union(
                &gated.inpaint,
                &mask::binarize(&robot_union, BINARY_THRESHOLD),
            );
            let t0 = Instant::now();
            let plate = self.models.inpainter().inpaint(frame, &inpaint_mask)?;
            self.timing.inpainting.record(t0.elapsed());
            check_frame_shape(&plate, width, height, "inpainted image")?;
            Some(plate)
        };

        self.state = Some(EpisodeState {
            width,
            height,
            distractor_prompt,
            safeset,
            distractor,
            safe_mask,
            gated,
            protected_core,
            clean_plate,
            last_robot_mask,
            frame_count: u64::from(warmup),
        });
        Ok(())
    }

    /// Per-frame distillation: robot re-segmentation, cache maintenance,
    /// composite.
    fn distill_frame(&mut self, live: &RgbImage) -> Result<RgbImage, DistillError> {
        let (width, height) = {
            let state = self.state.as_ref().expect("distill_frame after warm-up");
            (state.width, state.height)
        };
        let robot_seg = self.segment_timed(
            live,
            instruction::robot_prompt(),
            self.config.robot_presence_threshold,
            width,
            height,
        )?;

        let state = self.state.as_mut().expect("distill_frame after warm-up");
        state.frame_count += 1;
        state.last_robot_mask = robot_seg.combined;

        // Periodic distractor re-detection (off by default: the mask is
        // frozen for the episode).
        let refresh_distractors = !self.config.cache_distractor_once
            && state.frame_count % u64::from(self.config.update_freq) == 0;
        if refresh_distractors {
            let t0 = Instant::now();
            let dist_seg = self.models.segmenter().segment(
                live,
                &state.distractor_prompt,
                self.config.distractor_presence_threshold,
            )?;
            self.timing.segmentation.record(t0.elapsed());
            check_segmentation(&dist_seg, state.width, state.height)?;
            state.distractor.refresh(&dist_seg);
            state.gated = state.distractor.gated(&state.safe_mask, &self.config);
        }

        // Optional wholesale clean-plate refresh.
        if let Some(interval) = self.config.cache_refresh_interval {
            if !self.config.disable_inpaint && state.frame_count % u64::from(interval) == 0 {
                let inpaint_mask = mask::union(
                    &state.gated.inpaint,
                    &mask::binarize(&state.last_robot_mask, BINARY_THRESHOLD),
                );
                let t0 = Instant::now();
                let plate = self.models.inpainter().inpaint(live, &inpaint_mask)?;
                self.timing.inpainting.record(t0.elapsed());
                check_frame_shape(&plate, state.width, state.height, "inpainted image")?;
                state.clean_plate = Some(plate);
            }
        }

        let t0 = Instant::now();
        let distilled = if self.config.disable_inpaint {
            compositor::mean_fill(live, &state.gated.compositing)
        } else {
            let safe_live = mask::union(&state.safe_mask, &state.last_robot_mask);
            let inputs = CompositeInputs {
                live,
                clean: state.clean_plate.as_ref().expect("clean plate cached"),
                compositing_mask: &state.gated.compositing,
                distractor_raw: state.distractor.raw_mask(),
                safe_live: &safe_live,
                protected_core: &state.protected_core,
            };
            compositor::composite(&inputs, self.config.blend_sigma)
        };
        self.timing.compositing.record(t0.elapsed());

        if let Some(sink) = &mut self.debug {
            sink.record_frame(
                state.frame_count,
                live,
                &state.gated.compositing,
                &state.safe_mask,
                &distilled,
                mask::nonzero_count(&state.last_robot_mask),
            )?;
        }
        Ok(distilled)
    }

    /// Timed segmentation query with boundary shape validation.
    fn segment_timed(
        &mut self,
        frame: &RgbImage,
        prompt: &str,
        threshold: f32,
        width: u32,
        height: u32,
    ) -> Result<Segmentation, DistillError> {
        let t0 = Instant::now();
        let seg = self.models.segmenter().segment(frame, prompt, threshold)?;
        self.timing.segmentation.record(t0.elapsed());
        check_segmentation(&seg, width, height)?;
        Ok(seg)
    }
}

fn camera_frame<'a>(obs: &'a Observation, name: &str) -> Result<&'a RgbImage, DistillError> {
    obs.cameras
        .get(name)
        .ok_or_else(|| DistillError::CameraNotFound(name.to_string()))
}

fn check_frame_shape(
    frame: &RgbImage,
    width: u32,
    height: u32,
    context: &'static str,
) -> Result<(), DistillError> {
    let (got_w, got_h) = frame.dimensions();
    if (got_w, got_h) != (width, height) {
        return Err(DistillError::ShapeMismatch {
            context,
            expected_w: width,
            expected_h: height,
            got_w,
            got_h,
        });
    }
    Ok(())
}

fn check_segmentation(
    seg: &Segmentation,
    width: u32,
    height: u32,
) -> Result<(), DistillError> {
    let masks = std::iter::once(&seg.combined).chain(seg.instances.iter().map(|i| &i.mask));
    for m in masks {
        let (got_w, got_h) = m.dimensions();
        if (got_w, got_h) != (width, height) {
            return Err(DistillError::ShapeMismatch {
                context: "segmentation mask",
                expected_w: width,
                expected_h: height,
                got_w,
                got_h,
            });
        }
    }
    Ok(())
}
