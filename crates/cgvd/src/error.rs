//! Error taxonomy for the distillation pipeline.
//!
//! Configuration problems are loud at construction time. External-service
//! failures propagate unmodified: a crashed backend is a caller problem,
//! not something to paper over with a stale mask. Perception misses are
//! *not* errors and never appear here.

use thiserror::Error;

/// Failure raised by an external model backend (segmentation or inpainting).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The backing model call failed.
    #[error("model backend: {0}")]
    Backend(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure raised by the wrapped environment.
#[derive(Error, Debug)]
pub enum EnvError {
    /// The environment does not implement an optional capability.
    #[error("unsupported capability: {0}")]
    Unsupported(&'static str),

    /// Any other environment-side failure.
    #[error("environment: {0}")]
    Backend(String),
}

/// Top-level error for wrapper construction, `reset` and `step`.
#[derive(Error, Debug)]
pub enum DistillError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configured camera key is missing from an observation. This is a
    /// collaborator contract violation, raised immediately.
    #[error("camera '{0}' not found in observation")]
    CameraNotFound(String),

    /// An externally supplied image or mask does not match the episode's
    /// frame geometry.
    #[error("shape mismatch in {context}: expected {expected_w}x{expected_h}, got {got_w}x{got_h}")]
    ShapeMismatch {
        context: &'static str,
        expected_w: u32,
        expected_h: u32,
        got_w: u32,
        got_h: u32,
    },

    /// `step` was called before the first `reset`.
    #[error("step() called before reset()")]
    NotReset,

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_mismatch_message_names_both_shapes() {
        let err = DistillError::ShapeMismatch {
            context: "segmentation mask",
            expected_w: 640,
            expected_h: 480,
            got_w: 320,
            got_h: 240,
        };
        let msg = err.to_string();
        assert!(msg.contains("segmentation mask"));
        assert!(msg.contains("640x480"));
        assert!(msg.contains("320x240"));
    }

    #[test]
    fn service_error_propagates_through_distill_error() {
        let err: DistillError = ServiceError::Backend("cuda OOM".into()).into();
        assert!(err.to_string().contains("cuda OOM"));
    }
}
