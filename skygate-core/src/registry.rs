use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Passenger not found: {0}")]
    NotFound(String),
    #[error("Invalid passenger name: {0:?}")]
    InvalidName(String),
}

/// Travel metadata for one registered passenger. The display name is the
/// registry key, not a record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerRecord {
    pub image: String,
    #[serde(rename = "from")]
    pub origin: String,
    #[serde(rename = "to")]
    pub destination: String,
    pub contact: String,
    pub email: String,
}

/// Flat JSON registry mapping passenger display name to travel metadata,
/// with face images stored beside the other reference images in the
/// passenger gallery folder. Every write is a read-modify-write of the
/// whole file; last writer wins.
pub struct PassengerRegistry {
    data_file: PathBuf,
    image_dir: PathBuf,
}

impl PassengerRegistry {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(data_file: P, image_dir: Q) -> Self {
        Self {
            data_file: data_file.as_ref().to_path_buf(),
            image_dir: image_dir.as_ref().to_path_buf(),
        }
    }

    /// Load the whole registry. A missing file is an empty registry.
    pub fn load(&self) -> Result<BTreeMap<String, PassengerRecord>, RegistryError> {
        if !self.data_file.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.data_file)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Look up one passenger by display name.
    pub fn get(&self, name: &str) -> Result<Option<PassengerRecord>, RegistryError> {
        Ok(self.load()?.remove(name))
    }

    /// Register a passenger: copy the face image into the gallery folder
    /// as `<sanitized>.jpg`, then rewrite the metadata file. The image
    /// write and the metadata write are not atomic as a pair; an
    /// interrupted registration can leave the image without a record.
    pub fn register(
        &self,
        name: &str,
        record_fields: RegistrationFields<'_>,
        image_source: &Path,
    ) -> Result<PassengerRecord, RegistryError> {
        let clean_name = sanitize_name(name);
        if clean_name.chars().all(|c| c == '_') {
            return Err(RegistryError::InvalidName(name.to_string()));
        }

        if !self.image_dir.exists() {
            fs::create_dir_all(&self.image_dir)?;
        }

        let image_filename = format!("{}.jpg", clean_name);
        fs::copy(image_source, self.image_dir.join(&image_filename))?;
        log::info!(
            "Stored face image for {:?} as {:?}",
            name,
            image_filename
        );

        let record = PassengerRecord {
            image: image_filename,
            origin: record_fields.origin.to_string(),
            destination: record_fields.destination.to_string(),
            contact: record_fields.contact.to_string(),
            email: record_fields.email.to_string(),
        };

        let mut registry = self.load()?;
        registry.insert(name.to_string(), record.clone());
        self.save(&registry)?;

        Ok(record)
    }

    /// Remove a passenger record and its gallery image.
    pub fn remove(&self, name: &str) -> Result<(), RegistryError> {
        let mut registry = self.load()?;
        let record = registry
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        self.save(&registry)?;

        let image_path = self.image_dir.join(&record.image);
        if image_path.exists() {
            fs::remove_file(&image_path)?;
        }

        Ok(())
    }

    fn save(&self, registry: &BTreeMap<String, PassengerRecord>) -> Result<(), RegistryError> {
        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(registry)?;
        fs::write(&self.data_file, contents)?;
        Ok(())
    }
}

/// Borrowed registration fields, to keep `register` signatures readable.
pub struct RegistrationFields<'a> {
    pub origin: &'a str,
    pub destination: &'a str,
    pub contact: &'a str,
    pub email: &'a str,
}

/// Replace every non-alphanumeric character with an underscore. Keeps the
/// gallery filename derived from the display name filesystem-safe.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}
