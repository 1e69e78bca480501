use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SCRFD_MODEL: &str = "det_10g.onnx";
const ARCFACE_MODEL: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
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
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("tolerance must be within [0, 1], got {0}")]
    InvalidTolerance(f32),
    #[error("{0} is not configured")]
    Missing(&'static str),
    #[error("model not found: {} (set ROLLCALL_MODEL_DIR)", .0.display())]
    ModelNotFound(PathBuf),
}

/// Optional settings read from `config.toml`. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    encodings_path: Option<PathBuf>,
    image_dir: Option<PathBuf>,
    camera_device: Option<String>,
    camera_width: Option<u32>,
    camera_height: Option<u32>,
    tolerance: Option<f32>,
    frame_interval_ms: Option<u64>,
    warmup_frames: Option<usize>,
    confidence_threshold: Option<f32>,
}

/// Resolved configuration: file values, then `ROLLCALL_*` overrides, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub db_path: PathBuf,
    pub encodings_path: PathBuf,
    pub image_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Maximum match distance in [0, 1].
    pub tolerance: f32,
    pub frame_interval: Duration,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Minimum SCRFD score for a face.
    pub confidence_threshold: f32,
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (or `$XDG_CONFIG_HOME/rollcall/config.toml`
    /// if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();

        let file = match config_file_path(&env) {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "reading config file");
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                parse_file(&text, &path)?
            }
            Some(path) if env("ROLLCALL_CONFIG").is_some() => {
                return Err(ConfigError::Read {
                    path,
                    source: std::io::ErrorKind::NotFound.into(),
                });
            }
            _ => FileConfig::default(),
        };

        Self::resolve(file, env)
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = match env("ROLLCALL_DATA_DIR").map(PathBuf::from).or(file.data_dir) {
            Some(dir) => dir,
            None => env("XDG_DATA_HOME")
                .map(PathBuf::from)
                .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".local/share")))
                .ok_or(ConfigError::Missing("data directory"))?
                .join("rollcall"),
        };

        let path_or = |key: &str, from_file: Option<PathBuf>, default: PathBuf| {
            env(key).map(PathBuf::from).or(from_file).unwrap_or(default)
        };

        let tolerance = env_parse(&env, "ROLLCALL_TOLERANCE")?
            .or(file.tolerance)
            .unwrap_or(0.55);
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(ConfigError::InvalidTolerance(tolerance));
        }

        let frame_interval_ms = env_parse(&env, "ROLLCALL_FRAME_INTERVAL_MS")?
            .or(file.frame_interval_ms)
            .unwrap_or(20);

        Ok(Self {
            model_dir: path_or("ROLLCALL_MODEL_DIR", file.model_dir, data_dir.join("models")),
            db_path: path_or("ROLLCALL_DB_PATH", file.db_path, data_dir.join("attendance.db")),
            encodings_path: path_or(
                "ROLLCALL_ENCODINGS_PATH",
                file.encodings_path,
                data_dir.join("encodings.json"),
            ),
            image_dir: path_or("ROLLCALL_IMAGE_DIR", file.image_dir, data_dir.join("images")),
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            camera_width: file.camera_width.unwrap_or(640),
            camera_height: file.camera_height.unwrap_or(480),
            tolerance,
            frame_interval: Duration::from_millis(frame_interval_ms),
            warmup_frames: env_parse(&env, "ROLLCALL_WARMUP_FRAMES")?
                .or(file.warmup_frames)
                .unwrap_or(4),
            confidence_threshold: file.confidence_threshold.unwrap_or(0.5),
            data_dir,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(SCRFD_MODEL)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(ARCFACE_MODEL)
    }

    /// Both model paths, checked to exist.
    pub fn require_models(&self) -> Result<(String, String), ConfigError> {
        let scrfd = existing(self.scrfd_model_path())?;
        let arcface = existing(self.arcface_model_path())?;
        Ok((scrfd, arcface))
    }
}

fn config_file_path(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = env("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".config")))
        .map(|dir| dir.join("rollcall/config.toml"))
}

fn parse_file(text: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn existing(path: PathBuf) -> Result<String, ConfigError> {
    if path.exists() {
        Ok(path.to_string_lossy().into_owned())
    } else {
        Err(ConfigError::ModelNotFound(path))
    }
}
