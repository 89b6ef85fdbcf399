use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Session configuration, loaded from environment variables and optionally
/// overridden by a TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Reference images, one `<id>_<name>` folder per student.
    pub gallery_dir: PathBuf,
    /// Where the attendance JSON is written at shutdown.
    pub output: PathBuf,
    /// Euclidean distance below which a face is matched.
    pub match_threshold: f32,
    /// Seconds an overlay stays visible after first recognition.
    pub display_secs: u64,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Session time limit in seconds; 0 runs until interrupted.
    pub max_session_secs: u64,
    /// Annotated snapshot PNG, refreshed at most once per second.
    pub snapshot_path: Option<PathBuf>,
}

/// TOML overlay. Every key is optional; present keys win over the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    gallery_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    match_threshold: Option<f32>,
    display_secs: Option<u64>,
    warmup_frames: Option<usize>,
    max_session_secs: Option<u64>,
    snapshot_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_core::default_model_dir());

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| rollcall_hw::DEFAULT_DEVICE.to_string()),
            model_dir,
            gallery_dir: env_path("ROLLCALL_GALLERY_DIR", "students"),
            output: env_path("ROLLCALL_OUTPUT", "attendance.json"),
            match_threshold: env_f32(
                "ROLLCALL_MATCH_THRESHOLD",
                rollcall_core::DEFAULT_MATCH_THRESHOLD,
            ),
            display_secs: env_u64("ROLLCALL_DISPLAY_SECS", 10),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            max_session_secs: env_u64("ROLLCALL_MAX_SESSION_SECS", 0),
            snapshot_path: std::env::var("ROLLCALL_SNAPSHOT_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Environment configuration with `path`, if given, applied on top.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_env();
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            config
                .apply_toml(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "config file applied");
        }
        Ok(config)
    }

    fn apply_toml(&mut self, raw: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(raw)?;

        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.gallery_dir {
            self.gallery_dir = v;
        }
        if let Some(v) = file.output {
            self.output = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.display_secs {
            self.display_secs = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if let Some(v) = file.max_session_secs {
            self.max_session_secs = v;
        }
        if file.snapshot_path.is_some() {
            self.snapshot_path = file.snapshot_path;
        }
        Ok(())
    }

    pub fn display_time(&self) -> Duration {
        Duration::from_secs(self.display_secs)
    }

    /// `None` when the session is unbounded.
    pub fn max_duration(&self) -> Option<Duration> {
        (self.max_session_secs > 0).then(|| Duration::from_secs(self.max_session_secs))
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::RECOGNIZER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
