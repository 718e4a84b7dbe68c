//! Video pricing: a model → resolution matrix of per-second prices (in credits).

use super::overlay::OverlayMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// model → resolution → price per second
pub type VideoMatrix = BTreeMap<String, BTreeMap<String, f64>>;

/// Overlay document for video prices
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoPricingOverlay {
    #[serde(flatten)]
    pub metadata: OverlayMetadata,
    pub models: Vec<VideoModelOverlay>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoModelOverlay {
    pub model: String,
    pub description: String,
    pub enabled: bool,
    pub resolutions: Vec<VideoResolutionOverlay>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoResolutionOverlay {
    pub resolution: String,
    pub price_per_second: f64,
    pub description: String,
}

/// Video price resolver
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPricing {
    matrix: VideoMatrix,
}

impl Default for VideoPricing {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl VideoPricing {
    /// Resolver holding only the built-in prices
    pub fn with_defaults() -> Self {
        let table: &[(&str, &[(&str, f64)])] = &[
            ("sora-2", &[("720x1280", 0.10), ("1280x720", 0.10)]),
            (
                "sora-2-pro",
                &[("720x1280", 0.30), ("1280x720", 0.30), ("1024x1792", 0.50), ("1792x1024", 0.50)],
            ),
        ];

        let matrix = table
            .iter()
            .map(|(model, resolutions)| {
                let prices = resolutions.iter().map(|(res, price)| (res.to_string(), *price)).collect();
                (model.to_string(), prices)
            })
            .collect();

        Self { matrix }
    }

    /// Apply an overlay. Same rules as image overlays, one level shallower.
    pub fn merge_overlay(&mut self, overlay: &VideoPricingOverlay) {
        for model in overlay.models.iter().filter(|m| m.enabled) {
            let resolutions = self.matrix.entry(model.model.clone()).or_default();
            for res in &model.resolutions {
                debug!(model = %model.model, resolution = %res.resolution, price = res.price_per_second, "Video price overridden");
                resolutions.insert(res.resolution.clone(), res.price_per_second);
            }
        }
    }

    /// Price per second, if configured
    pub fn price(&self, model: &str, resolution: &str) -> Option<f64> {
        self.matrix.get(model)?.get(resolution).copied()
    }

    /// Price of a render lasting `seconds`
    pub fn cost(&self, model: &str, resolution: &str, seconds: f64) -> Option<f64> {
        self.price(model, resolution).map(|price| price * seconds)
    }

    pub fn supported_models(&self) -> Vec<String> {
        self.matrix.keys().cloned().collect()
    }

    pub fn supported_resolutions(&self, model: &str) -> Vec<String> {
        self.matrix
            .get(model)
            .map(|resolutions| resolutions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Owned copy of the full matrix
    pub fn all_pricing(&self) -> VideoMatrix {
        self.matrix.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(model: &str, enabled: bool, resolution: &str, price: f64) -> VideoPricingOverlay {
        VideoPricingOverlay {
            metadata: OverlayMetadata::default(),
            models: vec![VideoModelOverlay {
                model: model.into(),
                description: String::new(),
                enabled,
                resolutions: vec![VideoResolutionOverlay {
                    resolution: resolution.into(),
                    price_per_second: price,
                    description: String::new(),
                }],
            }],
        }
    }

    #[test]
    fn test_default_prices_and_cost() {
        let pricing = VideoPricing::with_defaults();
        assert_eq!(pricing.price("sora-2", "720x1280"), Some(0.10));
        assert_eq!(pricing.price("sora-2-pro", "1280x720"), Some(0.30));
        assert_eq!(pricing.cost("sora-2-pro", "1024x1792", 12.5), Some(6.25));
        assert_eq!(pricing.price("sora-2", "1024x1792"), None);
        assert_eq!(pricing.cost("veo-3", "1280x720", 4.0), None);
    }

    #[test]
    fn test_overlay_merge() {
        let mut pricing = VideoPricing::with_defaults();
        pricing.merge_overlay(&overlay("sora-2", true, "1024x1792", 0.2));
        pricing.merge_overlay(&overlay("sora-2-pro", false, "1280x720", 9.0));

        assert_eq!(pricing.price("sora-2", "1024x1792"), Some(0.2));
        assert_eq!(pricing.price("sora-2", "720x1280"), Some(0.10));
        assert_eq!(pricing.price("sora-2-pro", "1280x720"), Some(0.30));
    }

    #[test]
    fn test_accessors() {
        let mut pricing = VideoPricing::with_defaults();
        assert_eq!(pricing.supported_models(), vec!["sora-2", "sora-2-pro"]);
        assert_eq!(
            pricing.supported_resolutions("sora-2-pro"),
            vec!["1024x1792", "1280x720", "1792x1024", "720x1280"]
        );
        assert!(pricing.supported_resolutions("veo-3").is_empty());

        let mut snapshot = pricing.all_pricing();
        snapshot.remove("sora-2");
        assert_eq!(pricing.price("sora-2", "1280x720"), Some(0.10));

        pricing.merge_overlay(&overlay("veo-3", true, "1280x720", 0.4));
        assert_eq!(pricing.supported_models().len(), 3);
    }
}
