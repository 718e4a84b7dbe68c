//! Loading of optional pricing overlay documents.

use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Header fields shared by every overlay document. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OverlayMetadata {
    /// Free-form document version (`1`, `"1.0"`, ...)
    pub version: Option<serde_json::Value>,
    pub last_updated: Option<String>,
}

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Failed to read pricing overlay {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse pricing overlay {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },
}

/// Read and parse an overlay document.
///
/// A file that does not exist is not an error: `Ok(None)` means built-in prices apply.
pub fn load_overlay<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, OverlayError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(OverlayError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Figment::from(Yaml::string(&contents))
        .extract()
        .map(Some)
        .map_err(|e| OverlayError::Parse {
            path: path.to_path_buf(),
            source: Box::new(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::image::ImagePricingOverlay;
    use crate::pricing::video::VideoPricingOverlay;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result: Option<ImagePricingOverlay> = load_overlay(&dir.path().join("absent.yaml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_parse_image_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
version: 1.2
last_updated: "2025-01-15"
models:
  - model: gpt-image-1
    description: OpenAI image model
    enabled: true
    qualities:
      - quality: low
        description: Draft
        sizes:
          - size: 1024x1024
            price: 0.02
            description: Square
  - model: legacy
    enabled: false
"#
        )
        .unwrap();

        let overlay: ImagePricingOverlay = load_overlay(file.path()).unwrap().unwrap();
        assert_eq!(overlay.metadata.last_updated.as_deref(), Some("2025-01-15"));
        assert!(overlay.metadata.version.is_some());
        assert_eq!(overlay.models.len(), 2);
        assert!(overlay.models[0].enabled);
        assert_eq!(overlay.models[0].qualities[0].sizes[0].price, 0.02);
        assert!(!overlay.models[1].enabled);
        assert!(overlay.models[1].qualities.is_empty());
    }

    #[test]
    fn test_parse_video_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
models:
  - model: sora-2
    enabled: true
    resolutions:
      - resolution: 1920x1080
        price_per_second: 0.2
"#
        )
        .unwrap();

        let overlay: VideoPricingOverlay = load_overlay(file.path()).unwrap().unwrap();
        assert_eq!(overlay.models[0].resolutions[0].resolution, "1920x1080");
        assert_eq!(overlay.models[0].resolutions[0].price_per_second, 0.2);
    }

    #[test]
    fn test_malformed_overlay_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "models: [{{model: x, enabled: true, qualities: 5}}]").unwrap();

        let result: Result<Option<ImagePricingOverlay>, _> = load_overlay(file.path());
        assert!(matches!(result, Err(OverlayError::Parse { .. })));
    }

    #[test]
    fn test_unreadable_path_is_io_error() {
        // A directory cannot be read as a file
        let dir = tempfile::tempdir().unwrap();
        let result: Result<Option<ImagePricingOverlay>, _> = load_overlay(dir.path());
        assert!(matches!(result, Err(OverlayError::Io { .. })));
    }
}
