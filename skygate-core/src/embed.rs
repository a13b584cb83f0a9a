use image::RgbImage;
use ndarray::Array1;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid embedding dimension, expected 512 but got {0}")]
    InvalidDimension(usize),
}

/// ArcFace embedding dimension
pub const EMBEDDING_DIM: usize = 512;

/// ArcFace model input size (aligned face crop)
pub const INPUT_SIZE: u32 = 112;

/// L2-normalized embedding vector
pub type Embedding = Array1<f32>;

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load an ArcFace embedding model (CPU execution).
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self, EmbedError> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(model_path.as_ref()))
            .map_err(|e| EmbedError::ModelLoad(format!("{:?}: {}", model_path.as_ref(), e)))?;

        log::info!("Loaded embedding model: {:?}", model_path.as_ref());

        Ok(Self { session })
    }

    /// Generate an embedding for an aligned 112x112 face crop.
    pub fn embed(&mut self, aligned_face: &RgbImage) -> Result<Embedding, EmbedError> {
        let (width, height) = aligned_face.dimensions();
        if width != INPUT_SIZE || height != INPUT_SIZE {
            return Err(EmbedError::Inference(format!(
                "Input image must be {}x{}, got {}x{}",
                INPUT_SIZE, INPUT_SIZE, width, height
            )));
        }

        let input_value = Value::from_array(preprocess(aligned_face))
            .map_err(|e| EmbedError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("Failed to extract embedding: {}", e)))?;

        if shape.len() != 2 || shape[1] as usize != EMBEDDING_DIM {
            return Err(EmbedError::InvalidDimension(
                shape.get(1).copied().unwrap_or(0) as usize,
            ));
        }

        let embedding = Array1::from_iter(data[..EMBEDDING_DIM].iter().copied());
        Ok(normalize(embedding))
    }
}

/// ArcFace preprocessing: NCHW tensor, (pixel - 127.5) / 128.0
fn preprocess(image: &RgbImage) -> ([usize; 4], Vec<f32>) {
    let size = INPUT_SIZE as usize;
    let mut input_data = Vec::with_capacity(size * size * 3);

    for c in 0..3 {
        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                let value = (image.get_pixel(x, y)[c] as f32 - 127.5) / 128.0;
                input_data.push(value);
            }
        }
    }

    ([1, 3, size, size], input_data)
}

/// L2-normalize an embedding; zero vectors are returned unchanged.
pub fn normalize(mut embedding: Embedding) -> Embedding {
    let norm = embedding.dot(&embedding).sqrt();
    if norm > 0.0 {
        embedding /= norm;
    }
    embedding
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let embedding = Array1::from_vec(vec![3.0, 4.0]);
        let normalized = normalize(embedding);

        let norm = normalized.dot(&normalized).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let embedding = Array1::zeros(EMBEDDING_DIM);
        let normalized = normalize(embedding);
        assert!(normalized.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_preprocess_range() {
        let image = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Rgb([255, 0, 127]));
        let (shape, data) = preprocess(&image);

        assert_eq!(shape, [1, 3, 112, 112]);
        assert_eq!(data.len(), 112 * 112 * 3);
        // Red channel first in CHW order
        assert!((data[0] - (255.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!(data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}
