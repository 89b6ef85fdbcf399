//! ArcFace face encoder via ONNX Runtime.
//!
//! Produces L2-normalized 512-dimensional embeddings (w600k_r50) from
//! aligned 112×112 luma crops.

use crate::alignment::{self, Similarity, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
pub const EMBEDDING_DIM: usize = 512;
pub const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}: download w600k_r50.onnx from insightface into the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box is empty")]
    EmptyFace,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can turn a located face into an embedding.
pub trait FaceEncoder {
    fn encode(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError>;
}

/// ArcFace-based face encoder.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract the embedding of one located face.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let crop = face_crop(frame, width, height, face)?;
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding output: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

impl FaceEncoder for FaceRecognizer {
    fn encode(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        self.extract(frame, width, height, face)
    }
}

/// Canonical 112×112 crop of a face.
///
/// Landmark alignment when the locator supplied landmarks; otherwise the box
/// is centred and scaled so its longer side fills the crop.
fn face_crop(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
) -> Result<Vec<u8>, RecognizerError> {
    if let Some(landmarks) = &face.landmarks {
        return Ok(alignment::align_face(frame, width, height, landmarks));
    }

    let side = face.width.max(face.height);
    if side <= 0.0 {
        return Err(RecognizerError::EmptyFace);
    }
    let scale = ALIGNED_SIZE as f32 / side;
    let (cx, cy) = (face.x + face.width / 2.0, face.y + face.height / 2.0);
    let half = ALIGNED_SIZE as f32 / 2.0;
    let transform = Similarity {
        a: scale,
        b: 0.0,
        tx: half - cx * scale,
        ty: half - cy * scale,
    };
    Ok(alignment::warp(frame, width, height, &transform, ALIGNED_SIZE))
}

/// Normalize a crop into the NCHW ArcFace input, replicating luma into RGB.
fn to_tensor(crop: &[u8]) -> Array4<f32> {
    Array4::from_shape_fn((1, 3, ALIGNED_SIZE, ALIGNED_SIZE), |(_, _, y, x)| {
        let pixel = crop.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
        (pixel - ARCFACE_MEAN) / ARCFACE_STD
    })
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_and_channels() {
        let crop = vec![100u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = to_tensor(&crop);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);

        let expected = (100.0 - ARCFACE_MEAN) / ARCFACE_STD;
        for c in 0..3 {
            assert!((tensor[[0, c, 57, 3]] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_box_crop_without_landmarks() {
        // 200×200 frame, bright 50×50 square at (100, 100)
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        for y in 100..150 {
            for x in 100..150 {
                frame[y * w + x] = 200;
            }
        }
        let face = BoundingBox {
            x: 100.0,
            y: 100.0,
            width: 50.0,
            height: 50.0,
            confidence: 0.9,
            landmarks: None,
        };

        let crop = face_crop(&frame, w as u32, h as u32, &face).unwrap();
        assert_eq!(crop.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        // The crop centre is inside the square.
        assert_eq!(crop[56 * ALIGNED_SIZE + 56], 200);
    }

    #[test]
    fn test_empty_box_rejected() {
        let face = BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 0.0,
            height: 0.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert!(matches!(
            face_crop(&[0u8; 400], 20, 20, &face),
            Err(RecognizerError::EmptyFace)
        ));
    }
}
