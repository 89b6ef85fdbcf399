//! SCRFD face locator via ONNX Runtime.
//!
//! Anchor-free decoding over three feature strides followed by greedy
//! non-maximum suppression. Frames are 8-bit luma; the single channel is
//! replicated into the three model input planes.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}: download det_10g.onnx from insightface into the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can find faces in a luma frame.
///
/// Results are ordered by descending confidence.
pub trait FaceLocator {
    fn locate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Scale and padding applied when fitting a frame into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_w: usize,
    scaled_h: usize,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_w = ((width as f32 * scale).round() as usize).min(target);
        let scaled_h = ((height as f32 * scale).round() as usize).min(target);
        Self {
            scale,
            pad_x: (target - scaled_w) as f32 / 2.0,
            pad_y: (target - scaled_h) as f32 / 2.0,
            scaled_w,
            scaled_h,
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face locator.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }

        let outputs = output_layout(&names);
        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");
        tracing::debug!(?outputs, "SCRFD output layout");

        Ok(Self { session, outputs })
    }

    /// Locate faces in a luma frame, best first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let letterbox = Letterbox::fit(width as usize, height as usize, INPUT_SIZE);
        let input = input_tensor(frame, width as usize, height as usize, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let layout = self.outputs[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = extract(layout.score, "scores")?;
            let boxes = extract(layout.bbox, "boxes")?;
            let kps = extract(layout.kps, "landmarks")?;

            decode_stride(scores, boxes, kps, stride, &letterbox, SCORE_THRESHOLD, &mut candidates);
        }

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

impl FaceLocator for FaceDetector {
    fn locate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        self.detect(frame, width, height)
    }
}

/// Pick output positions by tensor name (`score_8`, `bbox_16`, `kps_32`, ...)
/// when the export names them, otherwise the conventional ordering
/// `[scores 8/16/32, boxes 8/16/32, kps 8/16/32]`.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let by_name: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match by_name {
        Some(layout) => [layout[0], layout[1], layout[2]],
        None => std::array::from_fn(|i| StrideOutputs {
            score: i,
            bbox: i + 3,
            kps: i + 6,
        }),
    }
}

/// Build the NCHW input tensor, sampling the frame bilinearly into the
/// letterboxed region. Padding uses the mean so it normalizes to zero.
fn input_tensor(frame: &[u8], width: usize, height: usize, letterbox: &Letterbox) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    if width == 0 || height == 0 || frame.len() < width * height {
        return tensor;
    }

    let x_start = letterbox.pad_x.floor() as usize;
    let y_start = letterbox.pad_y.floor() as usize;
    let inv_scale = 1.0 / letterbox.scale;
    let pixel = |x: usize, y: usize| frame[y * width + x] as f32;

    for ty in 0..INPUT_SIZE {
        for tx in 0..INPUT_SIZE {
            let inside = ty >= y_start
                && ty < y_start + letterbox.scaled_h
                && tx >= x_start
                && tx < x_start + letterbox.scaled_w;

            let value = if inside {
                let sx = ((tx - x_start) as f32 + 0.5) * inv_scale - 0.5;
                let sy = ((ty - y_start) as f32 + 0.5) * inv_scale - 0.5;
                let x0 = (sx.floor().max(0.0) as usize).min(width - 1);
                let y0 = (sy.floor().max(0.0) as usize).min(height - 1);
                let x1 = (x0 + 1).min(width - 1);
                let y1 = (y0 + 1).min(height - 1);
                let fx = (sx - sx.floor()).clamp(0.0, 1.0);
                let fy = (sy - sy.floor()).clamp(0.0, 1.0);

                let top = pixel(x0, y0) * (1.0 - fx) + pixel(x1, y0) * fx;
                let bottom = pixel(x0, y1) * (1.0 - fx) + pixel(x1, y1) * fx;
                top * (1.0 - fy) + bottom * fy
            } else {
                PIXEL_MEAN
            };

            let normalized = (value - PIXEL_MEAN) / PIXEL_STD;
            for channel in 0..3 {
                tensor[[0, channel, ty, tx]] = normalized;
            }
        }
    }

    tensor
}

/// Decode one stride's anchors into frame-space boxes above `threshold`.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
    out: &mut Vec<BoundingBox>,
) {
    let cells = INPUT_SIZE / stride;
    let step = stride as f32;

    for row in 0..cells {
        for col in 0..cells {
            let (cx, cy) = (col as f32 * step, row as f32 * step);

            for anchor in 0..ANCHORS_PER_CELL {
                let idx = (row * cells + col) * ANCHORS_PER_CELL + anchor;
                let Some(&score) = scores.get(idx) else {
                    return;
                };
                if score <= threshold {
                    continue;
                }
                let Some(d) = boxes.get(idx * 4..idx * 4 + 4) else {
                    continue;
                };

                let (x1, y1) = letterbox.unmap(cx - d[0] * step, cy - d[1] * step);
                let (x2, y2) = letterbox.unmap(cx + d[2] * step, cy + d[3] * step);

                let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                    std::array::from_fn(|i| {
                        letterbox.unmap(cx + k[i * 2] * step, cy + k[i * 2 + 1] * step)
                    })
                });

                out.push(BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                    confidence: score,
                    landmarks,
                });
            }
        }
    }
}

/// Greedy NMS; the survivors come back sorted by descending confidence.
fn non_max_suppression(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &bbox(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
        // 5×10 overlap over 150 union
        let half = iou(&a, &bbox(5.0, 0.0, 10.0, 10.0, 1.0));
        assert!((half - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = non_max_suppression(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_unmap() {
        let lb = Letterbox::fit(320, 240, INPUT_SIZE);
        assert_eq!(lb.scaled_w, 640);
        assert_eq!(lb.scaled_h, 480);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);

        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_output_layout_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let layout = output_layout(&names);
        assert_eq!(layout[0], StrideOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(layout[2], StrideOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        let layout = output_layout(&names);
        assert_eq!(layout[1], StrideOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_input_tensor_padding_normalizes_to_zero() {
        let frame = vec![255u8; 320 * 240];
        let lb = Letterbox::fit(320, 240, INPUT_SIZE);
        let tensor = input_tensor(&frame, 320, 240, &lb);

        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        // Top padding band
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        // Image region, uniform input stays uniform
        let expected = (255.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 1, 320, 320]] - expected).abs() < 1e-5);
        assert_eq!(tensor[[0, 0, 320, 320]], tensor[[0, 2, 320, 320]]);
    }

    #[test]
    fn test_decode_single_anchor() {
        let stride = 32;
        let cells = INPUT_SIZE / stride;
        let n = cells * cells * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; n];
        let boxes = vec![1.0f32; n * 4];
        let kps = vec![0.0f32; n * 10];

        // Cell (row 2, col 3), second anchor
        let idx = (2 * cells + 3) * ANCHORS_PER_CELL + 1;
        scores[idx] = 0.95;

        let lb = Letterbox::fit(INPUT_SIZE, INPUT_SIZE, INPUT_SIZE);
        let mut out = Vec::new();
        decode_stride(&scores, &boxes, &kps, stride, &lb, 0.5, &mut out);

        assert_eq!(out.len(), 1);
        let face = &out[0];
        assert_eq!((face.x, face.y), (3.0 * 32.0 - 32.0, 2.0 * 32.0 - 32.0));
        assert_eq!((face.width, face.height), (64.0, 64.0));
        assert_eq!(face.landmarks.unwrap()[0], (96.0, 64.0));
    }
}
