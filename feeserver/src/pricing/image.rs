//! Image pricing: a model → quality → size matrix of per-image prices (in credits).

use super::overlay::OverlayMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// size → price
pub type SizePrices = BTreeMap<String, f64>;
/// model → quality → size → price
pub type ImageMatrix = BTreeMap<String, BTreeMap<String, SizePrices>>;

/// Overlay document for image prices.
///
/// ```yaml
/// version: "1.0"
/// models:
///   - model: gpt-image-1
///     enabled: true
///     qualities:
///       - quality: low
///         sizes:
///           - size: 1024x1024
///             price: 0.01
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ImagePricingOverlay {
    #[serde(flatten)]
    pub metadata: OverlayMetadata,
    pub models: Vec<ImageModelOverlay>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageModelOverlay {
    pub model: String,
    pub description: String,
    pub enabled: bool,
    pub qualities: Vec<ImageQualityOverlay>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageQualityOverlay {
    pub quality: String,
    pub description: String,
    pub sizes: Vec<ImageSizeOverlay>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageSizeOverlay {
    pub size: String,
    pub price: f64,
    pub description: String,
}

/// Image price resolver
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePricing {
    matrix: ImageMatrix,
}

impl Default for ImagePricing {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ImagePricing {
    /// Resolver holding only the built-in prices
    pub fn with_defaults() -> Self {
        let table: &[(&str, &str, &[(&str, f64)])] = &[
            ("gpt-image-1", "low", &[("1024x1024", 0.011), ("1024x1536", 0.016), ("1536x1024", 0.016)]),
            ("gpt-image-1", "medium", &[("1024x1024", 0.042), ("1024x1536", 0.063), ("1536x1024", 0.063)]),
            ("gpt-image-1", "high", &[("1024x1024", 0.167), ("1024x1536", 0.25), ("1536x1024", 0.25)]),
            ("gpt-image-1-mini", "low", &[("1024x1024", 0.005), ("1024x1536", 0.006), ("1536x1024", 0.006)]),
            ("gpt-image-1-mini", "medium", &[("1024x1024", 0.011), ("1024x1536", 0.015), ("1536x1024", 0.015)]),
            ("gpt-image-1-mini", "high", &[("1024x1024", 0.036), ("1024x1536", 0.052), ("1536x1024", 0.052)]),
            ("dall-e-3", "standard", &[("1024x1024", 0.04), ("1024x1792", 0.08), ("1792x1024", 0.08)]),
            ("dall-e-3", "hd", &[("1024x1024", 0.08), ("1024x1792", 0.12), ("1792x1024", 0.12)]),
            ("dall-e-2", "standard", &[("256x256", 0.016), ("512x512", 0.018), ("1024x1024", 0.02)]),
        ];

        let mut matrix = ImageMatrix::new();
        for (model, quality, sizes) in table {
            let leaves = matrix
                .entry(model.to_string())
                .or_default()
                .entry(quality.to_string())
                .or_default();
            for (size, price) in *sizes {
                leaves.insert(size.to_string(), *price);
            }
        }

        Self { matrix }
    }

    /// Apply an overlay on top of the current prices.
    ///
    /// Disabled models are skipped entirely. For enabled models only the (quality, size) leaves
    /// listed in the overlay are set; every other leaf keeps its current value.
    pub fn merge_overlay(&mut self, overlay: &ImagePricingOverlay) {
        for model in overlay.models.iter().filter(|m| m.enabled) {
            let qualities = self.matrix.entry(model.model.clone()).or_default();
            for quality in &model.qualities {
                let sizes = qualities.entry(quality.quality.clone()).or_default();
                for size in &quality.sizes {
                    debug!(model = %model.model, quality = %quality.quality, size = %size.size, price = size.price, "Image price overridden");
                    sizes.insert(size.size.clone(), size.price);
                }
            }
        }
    }

    /// Per-image price, if configured
    pub fn price(&self, model: &str, quality: &str, size: &str) -> Option<f64> {
        self.matrix.get(model)?.get(quality)?.get(size).copied()
    }

    /// Price of `count` images
    pub fn cost(&self, model: &str, quality: &str, size: &str, count: u32) -> Option<f64> {
        self.price(model, quality, size).map(|price| price * count as f64)
    }

    pub fn supported_models(&self) -> Vec<String> {
        self.matrix.keys().cloned().collect()
    }

    pub fn supported_qualities(&self, model: &str) -> Vec<String> {
        self.matrix
            .get(model)
            .map(|qualities| qualities.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn supported_sizes(&self, model: &str, quality: &str) -> Vec<String> {
        self.matrix
            .get(model)
            .and_then(|qualities| qualities.get(quality))
            .map(|sizes| sizes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Owned copy of the full matrix. Mutating it has no effect on the resolver.
    pub fn all_pricing(&self) -> ImageMatrix {
        self.matrix.clone()
    }
}
