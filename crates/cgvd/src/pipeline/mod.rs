//! Mask-gating and compositing core.
//!
//! The `wrapper` module owns the call order; these modules are the reusable
//! algorithmic building blocks: warm-up safe-set accumulation, distractor
//! gating, and the feathered composite.

pub mod compositor;
pub mod distractor;
pub mod safeset;

pub use compositor::{composite, mean_fill, CompositeInputs};
pub use distractor::{DistractorMaskBuilder, GatedMasks};
pub use safeset::{ComponentScore, InstanceGenuineness, SafeSetAccumulator, TargetUpdate};
