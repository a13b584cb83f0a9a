pub mod align;
pub mod capture;
pub mod compare;
pub mod config;
pub mod detect;
pub mod embed;
pub mod gallery;
pub mod registry;
pub mod watch;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Camera error: {0}")]
    Capture(#[from] capture::CaptureError),
    #[error("Detection error: {0}")]
    Detection(#[from] detect::DetectionError),
    #[error("Alignment error: {0}")]
    Alignment(#[from] align::AlignmentError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] embed::EmbedError),
    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("{0}")]
    Other(String),
}

/// Outcome of a single-shot identification
#[derive(Debug, Clone)]
pub enum Identification {
    /// No face in the captured frame
    NoFace,
    /// A face was found but nothing in the passenger gallery matched
    NoMatch,
    /// Best passenger gallery match at or above threshold
    Match(gallery::GalleryMatch),
}

/// Camera, recognition models, and both reference galleries, wired
/// together. Construction is eager so that a broken camera or a missing
/// model fails the session up front.
pub struct Recognizer {
    config: config::Config,
    camera: capture::Camera,
    detector: detect::FaceDetector,
    embedder: embed::FaceEmbedder,
    passengers: gallery::Gallery,
    watchlist: gallery::Gallery,
}

impl Recognizer {
    pub fn new(config: config::Config) -> Result<Self, Error> {
        log::info!("Loading face detection model...");
        let mut detector = detect::FaceDetector::new(
            &config.detection.model_path,
            config.detection.confidence_threshold,
        )?;

        log::info!("Loading face embedding model...");
        let mut embedder = embed::FaceEmbedder::new(&config.embedding.model_path)?;

        let passengers = gallery::Gallery::load(
            "passengers",
            &config.gallery.passenger_dir,
            &mut detector,
            &mut embedder,
        );
        let watchlist = gallery::Gallery::load(
            "watchlist",
            &config.gallery.watchlist_dir,
            &mut detector,
            &mut embedder,
        );

        log::info!("Initializing camera...");
        let camera = capture::Camera::new(&config.camera)?;

        Ok(Self {
            config,
            camera,
            detector,
            embedder,
            passengers,
            watchlist,
        })
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    pub fn passengers(&self) -> &gallery::Gallery {
        &self.passengers
    }

    pub fn watchlist(&self) -> &gallery::Gallery {
        &self.watchlist
    }

    /// Capture one frame from the camera. Failures here end the session.
    pub fn capture_frame(&mut self) -> Result<RgbImage, Error> {
        Ok(self.camera.capture_frame()?)
    }

    /// Detect the best face in a frame and embed it.
    /// Returns Ok(None) when the frame contains no face.
    pub fn embed_frame(
        &mut self,
        frame: &RgbImage,
    ) -> Result<Option<(detect::DetectedFace, embed::Embedding)>, Error> {
        let faces = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(detect::DetectionError::NoFaces) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let face = faces[0].clone();
        log::debug!("Detected face with confidence {:.2}", face.confidence);

        let aligned = align::align(frame, &face.landmarks)?;
        let embedding = self.embedder.embed(&aligned)?;
        Ok(Some((face, embedding)))
    }

    /// Single-shot identification against the passenger gallery.
    pub fn identify(&mut self) -> Result<Identification, Error> {
        let frame = self.capture_frame()?;

        let Some((face, embedding)) = self.embed_frame(&frame)? else {
            return Ok(Identification::NoFace);
        };

        if self.config.debug.save_snapshots {
            if let Err(e) = self.save_debug_snapshot(&frame, &face) {
                log::warn!("Failed to save debug snapshot: {}", e);
            }
        }

        match self
            .passengers
            .find_match(&embedding, self.config.matching.threshold)
        {
            Some(matched) => Ok(Identification::Match(matched)),
            None => Ok(Identification::NoMatch),
        }
    }

    /// Save the frame with the detected face overlaid (box and landmarks).
    fn save_debug_snapshot(
        &self,
        frame: &RgbImage,
        face: &detect::DetectedFace,
    ) -> Result<(), Error> {
        let dir = ensure_debug_dir(&self.config.debug.output_dir)?;
        let path = dir.join(debug_filename("identify"));

        let mut annotated = frame.clone();

        let bbox = &face.bbox;
        let rect =
            Rect::at(bbox.x as i32, bbox.y as i32).of_size(bbox.width as u32, bbox.height as u32);
        draw_hollow_rect_mut(&mut annotated, rect, Rgb([0, 255, 0]));

        let red = Rgb([255, 0, 0]);
        let landmarks = &face.landmarks;
        for (x, y) in [
            landmarks.left_eye,
            landmarks.right_eye,
            landmarks.nose,
            landmarks.left_mouth,
            landmarks.right_mouth,
        ] {
            draw_cross_mut(&mut annotated, red, x as i32, y as i32);
        }

        annotated
            .save(&path)
            .map_err(|e| Error::Other(format!("Failed to save debug snapshot: {}", e)))?;
        log::info!("Debug snapshot saved: {}", path.display());
        Ok(())
    }
}

/// Expand a leading ~ and create the debug directory if needed.
fn ensure_debug_dir(debug_dir: &std::path::Path) -> Result<PathBuf, Error> {
    let expanded = match (debug_dir.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => debug_dir.to_path_buf(),
    };

    std::fs::create_dir_all(&expanded)
        .map_err(|e| Error::Other(format!("Failed to create debug directory: {}", e)))?;

    Ok(expanded)
}

fn debug_filename(operation: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}_{}.jpg", operation, timestamp, std::process::id())
}
