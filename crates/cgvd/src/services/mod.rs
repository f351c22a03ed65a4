//! External-model contracts and the shared-handle registry.
//!
//! The segmentation and inpainting models are expensive to initialize and
//! are shared across wrapper instances running in the same process. They are
//! injected as trait objects through [`ModelRegistry`] so tests can
//! substitute deterministic mocks; there are no module-level globals.

mod inpaint;
mod segment;

pub use inpaint::Inpainter;
pub use segment::{InstanceDetection, Segmentation, Segmenter};

use std::sync::Arc;

/// Shared handles to the heavyweight perception models.
///
/// Cloning is cheap (two `Arc` bumps); every wrapper instance holds its own
/// clone. The registry issues only stateless query calls against the models
/// and never mutates backend state.
#[derive(Clone)]
pub struct ModelRegistry {
    segmenter: Arc<dyn Segmenter + Send + Sync>,
    inpainter: Arc<dyn Inpainter + Send + Sync>,
}

impl ModelRegistry {
    pub fn new(
        segmenter: Arc<dyn Segmenter + Send + Sync>,
        inpainter: Arc<dyn Inpainter + Send + Sync>,
    ) -> Self {
        Self {
            segmenter,
            inpainter,
        }
    }

    pub fn segmenter(&self) -> &dyn Segmenter {
        self.segmenter.as_ref()
    }

    pub fn inpainter(&self) -> &dyn Inpainter {
        self.inpainter.as_ref()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry").finish_non_exhaustive()
    }
}
