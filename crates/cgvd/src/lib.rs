//! cgvd: clean-background guided visual distillation for manipulation
//! policies in cluttered scenes.
//!
//! Given a raw camera frame and a natural-language task instruction, the
//! wrapper produces a distilled frame in which distractor objects are
//! inpainted away while the manipulation target, its reference anchor and
//! the robot's own arm stay visible and untouched. The stages, per episode:
//!
//! 1. **Parse** – instruction → (target, anchor) concepts.
//! 2. **Warm-up** – accumulate target/anchor/distractor masks over a fixed
//!    window with IoU gating, per-pixel voting and distractor
//!    cross-validation; finish with connected-component cleanup.
//! 3. **Clean plate** – one inpainting call removes distractors and robot
//!    from the final warm-up frame.
//! 4. **Steady state** – every step re-segments only the robot and blends
//!    the cached clean plate over the live frame with a feathered,
//!    hard-gated alpha mask.
//!
//! # Public API
//! [`DistillWrapper`] around any [`Environment`], configured by
//! [`DistillConfig`], with the external models injected through
//! [`ModelRegistry`]. The `mask` and `pipeline` modules expose the
//! underlying building blocks for direct use.

pub mod config;
pub mod debug_dump;
pub mod env;
pub mod error;
pub mod instruction;
pub mod mask;
pub mod pipeline;
pub mod services;
pub mod timing;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{DebugConfig, DistillConfig};
pub use env::{Environment, Observation, StepOutcome};
pub use error::{DistillError, EnvError, ServiceError};
pub use instruction::ParsedInstruction;
pub use mask::Mask;
pub use services::{Inpainter, InstanceDetection, ModelRegistry, Segmentation, Segmenter};
pub use timing::TimingSnapshot;
pub use wrapper::{DistillWrapper, EpisodeMasks};
