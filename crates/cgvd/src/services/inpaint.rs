//! Inpainting contract.

use image::RgbImage;

use crate::error::ServiceError;
use crate::mask::Mask;

/// Image inpainting backend.
///
/// Produces a plausible fill for the masked region from surrounding context.
/// The backend may dilate the mask internally for seam quality. Calls are
/// deterministic and stateless; the wrapper owns all caching.
pub trait Inpainter {
    fn inpaint(&self, image: &RgbImage, mask: &Mask) -> Result<RgbImage, ServiceError>;
}
