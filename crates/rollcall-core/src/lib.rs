//! rollcall-core: Face identification and attendance tracking.
//!
//! SCRFD locates faces and ArcFace embeds them, both via ONNX Runtime.
//! Embeddings are matched against a gallery of enrolled students by
//! Euclidean distance, and recognized students are recorded once per session.

pub mod alignment;
pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod tracker;
pub mod types;

use std::path::PathBuf;

pub use detector::{DetectorError, FaceDetector, FaceLocator};
pub use gallery::{Gallery, GalleryError};
pub use matcher::{identify_faces, EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use recognizer::{FaceEncoder, FaceRecognizer, RecognizerError};
pub use tracker::{AttendanceEntry, AttendanceSheet, AttendanceTracker, ExportError};
pub use types::{BoundingBox, Embedding, FaceMatch, Identity, MatchResult, ReferenceIdentity};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/rollcall` (or `~/.local/share/rollcall`).
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Where the ONNX models live unless overridden.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
