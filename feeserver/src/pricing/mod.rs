//! Multi-modal price resolution.
//!
//! - [`token`]: arithmetic over per-model token prices fetched from `models_info`
//! - [`image`]: model → quality → size matrix
//! - [`video`]: model → resolution matrix
//!
//! The image and video matrices start from compiled-in defaults and are selectively overridden
//! by optional YAML overlay documents (see [`overlay`]). A [`PricingCatalog`] is built once at
//! startup and then shared immutably, usually as `Arc<PricingCatalog>`; there is no way to
//! mutate it after construction.

pub mod image;
pub mod overlay;
pub mod token;
pub mod video;

use crate::config::PricingConfig;
use image::{ImagePricing, ImagePricingOverlay};
use overlay::{OverlayError, load_overlay};
use tracing::info;
use video::{VideoPricing, VideoPricingOverlay};

pub use token::{MICRO, TokenCost, cost_micro, credits_to_micro};

/// The frozen image and video price matrices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingCatalog {
    image: ImagePricing,
    video: VideoPricing,
}

impl PricingCatalog {
    pub fn new(image: ImagePricing, video: VideoPricing) -> Self {
        Self { image, video }
    }

    /// Build the catalog from defaults plus the configured overlay files
    pub fn load(config: &PricingConfig) -> Result<Self, OverlayError> {
        let mut image = ImagePricing::with_defaults();
        if let Some(path) = &config.image_overlay {
            match load_overlay::<ImagePricingOverlay>(path)? {
                Some(overlay) => {
                    image.merge_overlay(&overlay);
                    info!(path = %path.display(), models = overlay.models.len(), "Applied image pricing overlay");
                }
                None => info!(path = %path.display(), "No image pricing overlay found, using defaults"),
            }
        }

        let mut video = VideoPricing::with_defaults();
        if let Some(path) = &config.video_overlay {
            match load_overlay::<VideoPricingOverlay>(path)? {
                Some(overlay) => {
                    video.merge_overlay(&overlay);
                    info!(path = %path.display(), models = overlay.models.len(), "Applied video pricing overlay");
                }
                None => info!(path = %path.display(), "No video pricing overlay found, using defaults"),
            }
        }

        Ok(Self::new(image, video))
    }

    pub fn image(&self) -> &ImagePricing {
        &self.image
    }

    pub fn video(&self) -> &VideoPricing {
        &self.video
    }
}
