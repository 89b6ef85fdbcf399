use serde::{Deserialize, Serialize};

/// Bounding box for a located face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Component-wise mean of a set of samples.
    ///
    /// Returns `None` for an empty set or when the samples disagree on
    /// dimensionality. The result is not re-normalized.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.dim();
        if samples.iter().any(|s| s.dim() != dim) {
            return None;
        }

        let mut sum = vec![0.0f32; dim];
        for sample in samples {
            for (acc, v) in sum.iter_mut().zip(&sample.values) {
                *acc += v;
            }
        }
        let n = samples.len() as f32;

        Some(Embedding {
            values: sum.into_iter().map(|v| v / n).collect(),
            model_version: first.model_version.clone(),
        })
    }
}

/// Identifier and display name of an enrolled student.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Overlay label, e.g. `"101 - Alice"`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.id, self.name)
    }
}

/// An enrolled identity with its mean reference embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceIdentity {
    pub identity: Identity,
    pub embedding: Embedding,
    /// Number of enrollment images averaged into `embedding`.
    pub samples: usize,
}

/// Label used for faces that match no reference.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Result of matching a query embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest reference, `None` when the gallery is empty.
    pub distance: Option<f32>,
    /// Matched identity, only set when `matched` is true.
    pub identity: Option<Identity>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            identity: None,
        }
    }

    pub fn label(&self) -> String {
        match &self.identity {
            Some(identity) if self.matched => identity.label(),
            _ => UNKNOWN_LABEL.to_string(),
        }
    }
}

/// A located face paired with its match outcome.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub face: BoundingBox,
    pub result: MatchResult,
}
