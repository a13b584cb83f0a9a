use image::{imageops, RgbImage};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("No faces detected")]
    NoFaces,
}

const INPUT_SIZE: u32 = 640;

/// SCRFD decodes detections from 3 feature pyramid levels
const FEATURE_STRIDES: [usize; 3] = [8, 16, 32];
const NUM_ANCHORS: usize = 2;
const NMS_IOU_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// 5-point landmarks used downstream for alignment
#[derive(Debug, Clone)]
pub struct FacialLandmarks {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose: (f32, f32),
    pub left_mouth: (f32, f32),
    pub right_mouth: (f32, f32),
}

impl FacialLandmarks {
    fn scaled(&self, sx: f32, sy: f32) -> Self {
        let s = |p: (f32, f32)| (p.0 * sx, p.1 * sy);
        Self {
            left_eye: s(self.left_eye),
            right_eye: s(self.right_eye),
            nose: s(self.nose),
            left_mouth: s(self.left_mouth),
            right_mouth: s(self.right_mouth),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub landmarks: FacialLandmarks,
    pub confidence: f32,
}

pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load an SCRFD detection model (CPU execution).
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        confidence_threshold: f32,
    ) -> Result<Self, DetectionError> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(model_path.as_ref()))
            .map_err(|e| {
                DetectionError::ModelLoad(format!("{:?}: {}", model_path.as_ref(), e))
            })?;

        log::info!("Loaded detection model: {:?}", model_path.as_ref());

        Ok(Self {
            session,
            confidence_threshold,
        })
    }

    /// Detect faces in an image, best first (largest, most confident).
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectionError> {
        let confidence_threshold = self.confidence_threshold;
        let (input_tensor, scale_x, scale_y) = preprocess(image);

        let input_value = Value::from_array(input_tensor)
            .map_err(|e| DetectionError::Inference(format!("Failed to create input tensor: {}", e)))?;

        // SCRFD models expect the input tensor to be named "input.1"
        let outputs = self
            .session
            .run(ort::inputs!["input.1" => input_value])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        // Outputs come in 3 groups of 3: scores (0-2), bboxes (3-5), keypoints (6-8)
        if outputs.len() != 9 {
            log::warn!(
                "Expected 9 outputs (3 strides x 3 tensors), got {}",
                outputs.len()
            );
        }

        let mut detections = Vec::new();

        for (stride_idx, &stride) in FEATURE_STRIDES.iter().enumerate() {
            if stride_idx + 6 >= outputs.len() {
                log::warn!("Missing outputs for stride {}, skipping", stride);
                continue;
            }

            let (_, scores) = outputs[stride_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("scores, stride {}: {}", stride, e)))?;
            let (_, bboxes) = outputs[stride_idx + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("bboxes, stride {}: {}", stride, e)))?;
            let (_, keypoints) = outputs[stride_idx + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("keypoints, stride {}: {}", stride, e)))?;

            decode_stride(
                stride,
                scores,
                bboxes,
                keypoints,
                confidence_threshold,
                scale_x,
                scale_y,
                &mut detections,
            );
        }

        log::debug!("Found {} detections before NMS", detections.len());

        if detections.is_empty() {
            return Err(DetectionError::NoFaces);
        }

        let mut detections = nms(detections, NMS_IOU_THRESHOLD);

        // Prefer larger, more confident faces
        detections.sort_by(|a, b| {
            let score_a = a.confidence * a.bbox.area().sqrt();
            let score_b = b.confidence * b.bbox.area().sqrt();
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(detections)
    }

}

/// Decode all anchor predictions for one pyramid level.
#[allow(clippy::too_many_arguments)]
fn decode_stride(
    stride: usize,
    scores: &[f32],
    bboxes: &[f32],
    keypoints: &[f32],
    confidence_threshold: f32,
    scale_x: f32,
    scale_y: f32,
    detections: &mut Vec<DetectedFace>,
) {
    let feat_size = INPUT_SIZE as usize / stride;

    for (anchor_idx, anchor) in anchor_centers(stride, feat_size).into_iter().enumerate() {
        for anchor_num in 0..NUM_ANCHORS {
            let idx = anchor_idx * NUM_ANCHORS + anchor_num;

            let Some(&raw_score) = scores.get(idx) else {
                continue;
            };
            // Sigmoid converts logits to [0, 1]
            let score = 1.0 / (1.0 + (-raw_score).exp());
            if score < confidence_threshold {
                continue;
            }

            let bbox_offset = idx * 4;
            let kps_offset = idx * 10;
            if bbox_offset + 4 > bboxes.len() || kps_offset + 10 > keypoints.len() {
                continue;
            }

            let (x, y, w, h) = decode_bbox(anchor, &bboxes[bbox_offset..bbox_offset + 4]);
            let landmarks = decode_landmarks(
                anchor,
                &keypoints[kps_offset..kps_offset + 10],
                stride as f32,
            );

            detections.push(DetectedFace {
                bbox: BoundingBox {
                    x: x / scale_x,
                    y: y / scale_y,
                    width: w / scale_x,
                    height: h / scale_y,
                },
                landmarks: landmarks.scaled(1.0 / scale_x, 1.0 / scale_y),
                confidence: score,
            });
        }
    }
}

/// Anchor centers for a given stride, row-major over the feature map.
fn anchor_centers(stride: usize, feat_size: usize) -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(feat_size * feat_size);
    for i in 0..feat_size {
        for j in 0..feat_size {
            let cx = (j as f32 + 0.5) * stride as f32;
            let cy = (i as f32 + 0.5) * stride as f32;
            anchors.push((cx, cy));
        }
    }
    anchors
}

/// Decode anchor-relative box distances (left, top, right, bottom).
fn decode_bbox(anchor: (f32, f32), pred: &[f32]) -> (f32, f32, f32, f32) {
    let (cx, cy) = anchor;
    let x1 = cx - pred[0].abs();
    let y1 = cy - pred[1].abs();
    let x2 = cx + pred[2].abs();
    let y2 = cy + pred[3].abs();
    (x1, y1, x2 - x1, y2 - y1)
}

/// Decode anchor-relative landmark offsets (5 points, stride-scaled).
fn decode_landmarks(anchor: (f32, f32), pred: &[f32], stride: f32) -> FacialLandmarks {
    let (cx, cy) = anchor;
    let point = |i: usize| (cx + pred[i * 2] * stride, cy + pred[i * 2 + 1] * stride);
    FacialLandmarks {
        left_eye: point(0),
        right_eye: point(1),
        nose: point(2),
        left_mouth: point(3),
        right_mouth: point(4),
    }
}

/// Resize to the model input and convert to a normalized NCHW tensor.
fn preprocess(image: &RgbImage) -> (([usize; 4], Vec<f32>), f32, f32) {
    let (orig_width, orig_height) = image.dimensions();

    let resized = imageops::resize(
        image,
        INPUT_SIZE,
        INPUT_SIZE,
        imageops::FilterType::Triangle,
    );

    let scale_x = INPUT_SIZE as f32 / orig_width as f32;
    let scale_y = INPUT_SIZE as f32 / orig_height as f32;

    let mut input_data = Vec::with_capacity((INPUT_SIZE * INPUT_SIZE * 3) as usize);
    for c in 0..3 {
        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                input_data.push(resized.get_pixel(x, y)[c] as f32 / 255.0);
            }
        }
    }

    let shape = [1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
    ((shape, input_data), scale_x, scale_y)
}

/// Non-maximum suppression keyed on IoU.
fn nms(mut detections: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<DetectedFace> = Vec::new();
    for candidate in detections {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(x: f32, y: f32, size: f32, confidence: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x,
                y,
                width: size,
                height: size,
            },
            landmarks: FacialLandmarks {
                left_eye: (0.0, 0.0),
                right_eye: (0.0, 0.0),
                nose: (0.0, 0.0),
                left_mouth: (0.0, 0.0),
                right_mouth: (0.0, 0.0),
            },
            confidence,
        }
    }

    #[test]
    fn test_bbox_area() {
        let bbox = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 20.0,
        };
        assert_eq!(bbox.area(), 200.0);
    }

    #[test]
    fn test_bbox_iou() {
        let bbox1 = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let bbox2 = BoundingBox {
            x: 5.0,
            y: 5.0,
            width: 10.0,
            height: 10.0,
        };

        // Intersection 25, union 175
        let iou = bbox1.iou(&bbox2);
        assert!((iou - 25.0 / 175.0).abs() < 0.01);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let detections = vec![
            face_at(0.0, 0.0, 10.0, 0.9),
            face_at(1.0, 1.0, 10.0, 0.8),
            face_at(100.0, 100.0, 10.0, 0.7),
        ];
        let kept = nms(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decode_bbox_centered() {
        let (x, y, w, h) = decode_bbox((100.0, 100.0), &[10.0, 20.0, 10.0, 20.0]);
        assert_eq!((x, y), (90.0, 80.0));
        assert_eq!((w, h), (20.0, 40.0));
    }

    #[test]
    fn test_anchor_centers_count() {
        let anchors = anchor_centers(32, 20);
        assert_eq!(anchors.len(), 400);
        assert_eq!(anchors[0], (16.0, 16.0));
    }
}
