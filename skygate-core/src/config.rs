use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub embedding: EmbeddingConfig,
    pub matching: MatchingConfig,
    pub gallery: GalleryConfig,
    pub registry: RegistryConfig,
    pub watch: WatchConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub threshold: f32,
}

/// Reference image folders searched per frame. Identities are derived
/// from filenames, so these folders are the source of truth for who can
/// be recognized at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryConfig {
    pub passenger_dir: PathBuf,
    pub watchlist_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub data_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_frame_delay_ms")]
    pub frame_delay_ms: u64,
}

fn default_frame_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub save_snapshots: bool,
    pub output_dir: PathBuf,
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/skygate/skygate.toml (system-wide)
    /// 2. ~/.config/skygate/skygate.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/skygate/skygate.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("skygate")
                .join("skygate.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Validation(
                "Camera dimensions must be non-zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        // Cosine similarity ranges over [-1, 1]
        if !(-1.0..=1.0).contains(&self.matching.threshold) {
            return Err(ConfigError::Validation(
                "Matching threshold must be between -1.0 and 1.0".to_string(),
            ));
        }

        if self.watch.frame_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "Watch frame delay must be greater than 0".to_string(),
            ));
        }

        if self.gallery.passenger_dir.as_os_str().is_empty()
            || self.gallery.watchlist_dir.as_os_str().is_empty()
        {
            return Err(ConfigError::Validation(
                "Gallery directories cannot be empty".to_string(),
            ));
        }

        if self.registry.data_file.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Registry data file cannot be empty".to_string(),
            ));
        }

        if self.debug.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Debug output directory cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device: "/dev/video0".to_string(),
                width: 640,
                height: 480,
            },
            detection: DetectionConfig {
                model_path: PathBuf::from("models/scrfd_500m.onnx"),
                confidence_threshold: 0.5,
            },
            embedding: EmbeddingConfig {
                model_path: PathBuf::from("models/arcface_mobilefacenet.onnx"),
            },
            matching: MatchingConfig { threshold: 0.4 },
            gallery: GalleryConfig {
                passenger_dir: PathBuf::from("known_faces"),
                watchlist_dir: PathBuf::from("known_threats"),
            },
            registry: RegistryConfig {
                data_file: PathBuf::from("passenger_data.json"),
            },
            watch: WatchConfig {
                frame_delay_ms: 100,
            },
            debug: DebugConfig {
                save_snapshots: false,
                output_dir: PathBuf::from("~/.cache/skygate/debug"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_frame_delay() {
        let mut config = Config::default();
        config.watch.frame_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_thresholds() {
        let mut config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.matching.threshold = -2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_watch_section() {
        let toml_str = r#"
            [camera]
            device = "/dev/video1"
            width = 1280
            height = 720

            [detection]
            model_path = "models/scrfd_500m.onnx"
            confidence_threshold = 0.6

            [embedding]
            model_path = "models/arcface_mobilefacenet.onnx"

            [matching]
            threshold = 0.35

            [gallery]
            passenger_dir = "known_faces"
            watchlist_dir = "known_threats"

            [registry]
            data_file = "passenger_data.json"

            [watch]

            [debug]
            save_snapshots = false
            output_dir = "/tmp/skygate"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.camera.device, "/dev/video1");
        assert_eq!(config.watch.frame_delay_ms, 100);
        assert!(config.validate().is_ok());
    }
}
