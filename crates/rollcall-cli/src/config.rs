use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Runtime configuration.
///
/// Layered: built-in defaults, then `rollcall.toml` (or the file named by
/// `ROLLCALL_CONFIG`), then `ROLLCALL_*` environment variables. Command
/// line flags are applied on top by `main`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// One reference image per enrolled student.
    pub gallery_dir: PathBuf,
    /// Where `attendance_<class>.csv` files live.
    pub attendance_dir: PathBuf,
    /// Embedding distance below which a face counts as a match.
    pub match_threshold: f32,
    /// Downscale factor applied to frames before detection.
    pub detect_scale: f32,
    /// Frames discarded after opening the camera (exposure settling).
    pub warmup_frames: usize,
    pub geolocation: bool,
    pub geolocation_url: String,
    pub geolocation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            gallery_dir: PathBuf::from("images"),
            attendance_dir: PathBuf::from("."),
            match_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            detect_scale: rollcall_core::DEFAULT_DETECT_SCALE,
            warmup_frames: 4,
            geolocation: true,
            geolocation_url: "https://ipinfo.io/json".to_string(),
            geolocation_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Load the file layer (if any) and the environment layer.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_ATTENDANCE_DIR") {
            self.attendance_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_GEOLOCATION_URL") {
            self.geolocation_url = v;
        }
        if let Some(v) = env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD") {
            self.match_threshold = v;
        }
        if let Some(v) = env_parse(&lookup, "ROLLCALL_DETECT_SCALE") {
            self.detect_scale = v;
        }
        if let Some(v) = env_parse(&lookup, "ROLLCALL_WARMUP_FRAMES") {
            self.warmup_frames = v;
        }
        if let Some(v) = env_parse(&lookup, "ROLLCALL_GEOLOCATION_TIMEOUT_SECS") {
            self.geolocation_timeout_secs = v;
        }
        if let Some(v) = lookup("ROLLCALL_GEOLOCATION") {
            self.geolocation = v != "0";
        }
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_secs(self.geolocation_timeout_secs)
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.gallery_dir, PathBuf::from("images"));
        assert!((c.match_threshold - 1.1).abs() < 1e-6);
        assert!((c.detect_scale - 0.25).abs() < 1e-6);
        assert!(c.geolocation);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c: Config = toml::from_str("match_threshold = 0.45\ngallery_dir = \"faces\"\n").unwrap();
        assert!((c.match_threshold - 0.45).abs() < 1e-6);
        assert_eq!(c.gallery_dir, PathBuf::from("faces"));
        assert_eq!(c.warmup_frames, 4);
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(env(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video4"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.5"),
            ("ROLLCALL_WARMUP_FRAMES", "not-a-number"),
            ("ROLLCALL_GEOLOCATION", "0"),
        ]));
        assert_eq!(c.camera_device, "/dev/video4");
        assert!((c.match_threshold - 0.5).abs() < 1e-6);
        assert_eq!(c.warmup_frames, 4);
        assert!(!c.geolocation);
    }

    #[test]
    fn test_from_file_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "match_threshold = \"high\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }
}
