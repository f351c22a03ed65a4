//! Wrapped-environment contract.
//!
//! The distillation wrapper sits between a policy and any environment that
//! exposes the conventional reset/step shape with named camera images in its
//! observations. Optional capabilities (language instruction, per-episode
//! distractor names, robot-visibility control) have conservative defaults so
//! a minimal environment only implements the required three methods.

use std::collections::HashMap;

use image::RgbImage;

use crate::error::EnvError;

/// One observation: named camera frames plus whatever scalar state the
/// caller threads through untouched.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// RGB frames keyed by camera name. The wrapper reads and writes back
    /// the same key it was configured with.
    pub cameras: HashMap<String, RgbImage>,
}

impl Observation {
    pub fn with_camera(name: impl Into<String>, frame: RgbImage) -> Self {
        let mut cameras = HashMap::new();
        cameras.insert(name.into(), frame);
        Self { cameras }
    }
}

/// Result of one environment step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
}

/// Environment collaborator contract.
///
/// `render` re-renders the current scene without advancing physics; the
/// warm-up protocol relies on it to observe a settled scene repeatedly.
pub trait Environment {
    type Action;

    fn reset(&mut self, seed: Option<u64>) -> Result<Observation, EnvError>;

    fn step(&mut self, action: &Self::Action) -> Result<StepOutcome, EnvError>;

    fn render(&mut self) -> Result<Observation, EnvError>;

    /// Natural-language task instruction for the current episode, if the
    /// environment provides one.
    fn language_instruction(&self) -> Option<String> {
        None
    }

    /// Names of freshly-spawned distractor objects for the current episode.
    /// `None` means "use the statically configured names".
    fn distractor_names(&self) -> Option<Vec<String>> {
        None
    }

    /// Hide or show the robot's visual meshes for subsequent renders.
    ///
    /// Best-effort capability: the default refuses, and the wrapper treats a
    /// refusal as a logged warning, never a failure.
    fn set_robot_visible(&mut self, _visible: bool) -> Result<(), EnvError> {
        Err(EnvError::Unsupported("robot visibility control"))
    }
}
