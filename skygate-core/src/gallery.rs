use crate::align;
use crate::compare;
use crate::detect::FaceDetector;
use crate::embed::{Embedding, FaceEmbedder};
use std::path::{Path, PathBuf};

/// Image extensions considered reference images
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Best gallery match for a query embedding
#[derive(Debug, Clone)]
pub struct GalleryMatch {
    pub identity: String,
    pub similarity: f32,
}

/// A folder of labeled reference faces, embedded once at load time.
/// Identities are the reference filename stems; filesystem filename
/// uniqueness is the only uniqueness guarantee. `identities[i]` labels
/// `embeddings[i]`.
pub struct Gallery {
    name: String,
    dir: PathBuf,
    identities: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl Gallery {
    /// Load every readable reference image under `dir`. A missing folder
    /// yields an empty gallery; images that fail to decode or contain no
    /// detectable face are skipped with a warning.
    pub fn load<P: AsRef<Path>>(
        name: &str,
        dir: P,
        detector: &mut FaceDetector,
        embedder: &mut FaceEmbedder,
    ) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let mut identities = Vec::new();
        let mut embeddings = Vec::new();

        for path in scan_reference_paths(name, &dir) {
            let Some(identity) = identity_from_path(&path) else {
                continue;
            };

            match embed_reference(&path, detector, embedder) {
                Ok(Some(embedding)) => {
                    log::debug!("Gallery '{}': loaded {}", name, identity);
                    identities.push(identity);
                    embeddings.push(embedding);
                }
                Ok(None) => {
                    log::warn!(
                        "Gallery '{}': no face found in {:?}, skipping",
                        name,
                        path
                    );
                }
                Err(reason) => {
                    log::warn!("Gallery '{}': skipping {:?}: {}", name, path, reason);
                }
            }
        }

        log::info!(
            "Gallery '{}': {} reference faces from {:?}",
            name,
            identities.len(),
            dir
        );

        Self {
            name: name.to_string(),
            dir,
            identities,
            embeddings,
        }
    }

    /// Best entry at or above threshold. An empty gallery matches nothing.
    pub fn find_match(&self, query: &Embedding, threshold: f32) -> Option<GalleryMatch> {
        let result = compare::find_best_match(query, &self.embeddings, threshold)?;
        Some(GalleryMatch {
            identity: self.identities[result.index].clone(),
            similarity: result.similarity,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Collect reference image paths in a stable order. A missing or
/// unreadable folder yields an empty list rather than an error.
fn scan_reference_paths(name: &str, dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        log::warn!(
            "Gallery '{}': folder {:?} does not exist, nothing will match",
            name,
            dir
        );
        return Vec::new();
    }

    let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_reference_image(path))
            .collect(),
        Err(e) => {
            log::warn!("Gallery '{}': failed to read {:?}: {}", name, dir, e);
            Vec::new()
        }
    };
    paths.sort();
    paths
}

/// Identity is the filename with its extension stripped.
fn identity_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}

fn is_reference_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// Detect the best face in a reference image and embed it.
/// Returns Ok(None) when the image decodes but contains no face.
fn embed_reference(
    path: &Path,
    detector: &mut FaceDetector,
    embedder: &mut FaceEmbedder,
) -> Result<Option<Embedding>, String> {
    let image = image::open(path).map_err(|e| e.to_string())?.to_rgb8();

    let faces = match detector.detect(&image) {
        Ok(faces) => faces,
        Err(crate::detect::DetectionError::NoFaces) => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };

    let aligned = align::align(&image, &faces[0].landmarks).map_err(|e| e.to_string())?;
    let embedding = embedder.embed(&aligned).map_err(|e| e.to_string())?;
    Ok(Some(embedding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn gallery_with(entries: Vec<(&str, Embedding)>) -> Gallery {
        let (identities, embeddings) = entries
            .into_iter()
            .map(|(identity, embedding)| (identity.to_string(), embedding))
            .unzip();
        Gallery {
            name: "test".to_string(),
            dir: PathBuf::from("unused"),
            identities,
            embeddings,
        }
    }

    #[test]
    fn test_identity_from_path() {
        assert_eq!(
            identity_from_path(Path::new("known_faces/Jane_Doe.jpg")),
            Some("Jane_Doe".to_string())
        );
        assert_eq!(
            identity_from_path(Path::new("a/b/c.png")),
            Some("c".to_string())
        );
    }

    #[test]
    fn test_is_reference_image_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        let jpg = dir.path().join("face.JPG");
        let txt = dir.path().join("notes.txt");
        std::fs::write(&jpg, b"x").unwrap();
        std::fs::write(&txt, b"x").unwrap();

        assert!(is_reference_image(&jpg));
        assert!(!is_reference_image(&txt));
        assert!(!is_reference_image(dir.path()));
    }

    #[test]
    fn test_find_match_picks_nearest() {
        let gallery = gallery_with(vec![
            ("alice", arr1(&[1.0, 0.0, 0.0])),
            ("bob", arr1(&[0.0, 1.0, 0.0])),
        ]);

        let query = arr1(&[0.95, 0.05, 0.0]);
        let result = gallery.find_match(&query, 0.5).unwrap();
        assert_eq!(result.identity, "alice");
        assert!(result.similarity > 0.9);
    }

    #[test]
    fn test_empty_gallery_matches_nothing() {
        let gallery = gallery_with(vec![]);
        let query = arr1(&[1.0, 0.0, 0.0]);
        assert!(gallery.find_match(&query, 0.0).is_none());
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let gallery = gallery_with(vec![("alice", arr1(&[1.0, 0.0, 0.0]))]);
        let query = arr1(&[0.0, 1.0, 0.0]);
        assert!(gallery.find_match(&query, 0.4).is_none());
    }

    #[test]
    fn test_scan_missing_folder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_folder");
        assert!(scan_reference_paths("test", &missing).is_empty());
    }

    #[test]
    fn test_scan_orders_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["zed.jpg", "amy.png", "readme.md"] {
            std::fs::write(dir.path().join(file), b"x").unwrap();
        }

        let paths = scan_reference_paths("test", dir.path());
        let stems: Vec<_> = paths
            .iter()
            .filter_map(|p| identity_from_path(p))
            .collect();
        assert_eq!(stems, vec!["amy".to_string(), "zed".to_string()]);
    }
}
