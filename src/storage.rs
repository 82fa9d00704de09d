//! Storage module managing image files keyed by public key and content hash.
//!
//! Files are stored under a per-key directory tree derived from the image
//! identifier. The identifier is computed from the raw bytes, so the same
//! content stored twice under one public key resolves to the same file.

pub use chrono::{DateTime, Utc};
use glob::glob;
use image::GenericImageView;
use std::hash::Hasher;
use std::{
    fmt::Display,
    fs::{self},
    path::PathBuf,
};
use thiserror::Error;
use twox_hash::XxHash64;

#[derive(Debug, Clone)]
pub struct Storage {
    root_path: PathBuf,
}

impl Storage {
    /// Creates a new `Storage` instance with the specified root path.
    ///
    /// # Arguments
    /// * `root` - Root directory path where all files will be stored.
    pub fn new(root: PathBuf) -> Storage {
        Storage { root_path: root }
    }

    /// Stores an image for the given public key.
    ///
    /// The bytes are sniffed for a supported image format, decoded to probe
    /// the pixel dimensions, and written under a directory tree derived from
    /// the content hash. Storing the same bytes twice for the same public key
    /// succeeds and returns the existing identifier.
    ///
    /// # Arguments
    ///
    /// * `public_key` - The key that owns the stored file.
    /// * `bytes` - The raw byte array of the image file.
    ///
    /// # Errors
    /// - `StorageError::InvalidPublicKey` if the key is not filesystem safe.
    /// - `StorageError::UnsupportedFile` if the file type cannot be determined.
    /// - `StorageError::Io` if directory creation or file writing fails.
    /// - `StorageError::Image` if decoding the image fails.
    pub fn store_image(&self, public_key: &str, bytes: &[u8]) -> Result<StoredImage, StorageError> {
        validate_public_key(public_key)?;

        // `image` does not report the container format it decoded from, so the
        // format is guessed independently from the byte content. Bytes that do
        // not sniff as a known image format are rejected before any decoding
        // work.
        let kind = infer::get(bytes).ok_or(StorageError::UnsupportedFile { kind: None })?;
        if !kind.mime_type().starts_with("image/") {
            return Err(StorageError::UnsupportedFile { kind: Some(kind) });
        }

        let img = image::load_from_memory(bytes)?;
        let (width, height) = img.dimensions();

        let identifier = ImageId::compute(bytes);

        let dir_path = self.derive_abs_dir(public_key, &identifier);
        fs::create_dir_all(dir_path.clone())?;

        let stored = StoredImage {
            identifier: identifier.clone(),
            width,
            height,
            size: bytes.len() as u64,
            extension: kind.extension().to_string(),
        };

        // Content-addressed: an existing entry means the exact same bytes were
        // stored before, so the write is skipped.
        if self.find_entry(public_key, &identifier).is_some() {
            return Ok(stored);
        }

        let filename = derive_filename(&identifier, kind.extension());
        fs::write(dir_path.join(filename), bytes)?;

        Ok(stored)
    }

    /// Reads the raw bytes of a stored image.
    ///
    /// # Errors
    /// - `StorageError::FileNotFound` if no file exists for the identifier.
    /// - `StorageError::Io` on read failure.
    pub fn get_image(&self, public_key: &str, id: &ImageId) -> Result<Vec<u8>, StorageError> {
        validate_public_key(public_key)?;

        let path = self
            .find_entry(public_key, id)
            .ok_or_else(|| StorageError::FileNotFound {
                identifier: id.clone(),
            })?;

        Ok(fs::read(path)?)
    }

    /// Returns whether a file exists for the given key and identifier.
    pub fn image_exists(&self, public_key: &str, id: &ImageId) -> bool {
        self.find_entry(public_key, id).is_some()
    }

    /// Ensures that the file associated with the given identifier does not exist.
    ///
    /// If the file exists, it is deleted.
    /// If the file does not exist, this function still succeeds.
    pub fn ensure_deleted(&self, public_key: &str, id: &ImageId) -> Result<(), StorageError> {
        validate_public_key(public_key)?;

        if let Some(path) = self.find_entry(public_key, id) {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Derives a relative directory path from the hash (for indexing).
    /// Example: `some-key/01/23/`
    fn derive_dir(&self, public_key: &str, id: &ImageId) -> PathBuf {
        PathBuf::from(public_key).join(format!("{:02x}/{:02x}/", id.0[0], id.0[1]))
    }

    /// Derives the absolute directory path on the filesystem.
    fn derive_abs_dir(&self, public_key: &str, id: &ImageId) -> PathBuf {
        self.root_path.join(self.derive_dir(public_key, id))
    }

    /// Searches for a file matching the identifier (with any extension).
    fn find_entry(&self, public_key: &str, id: &ImageId) -> Option<PathBuf> {
        let dir = self.derive_abs_dir(public_key, id);
        let filename: String = id.clone().into();

        let glob_pattern = format!("{}.*", dir.join(filename).to_string_lossy());

        for entry in glob(&glob_pattern).ok()? {
            return entry.ok();
        }
        None
    }
}

/// Generates a filename based on the identifier and extension.
fn derive_filename(id: &ImageId, ext: &str) -> PathBuf {
    let id_str: String = id.clone().into();

    PathBuf::from(format!("{}.{}", id_str, ext))
}

/// Public keys become path segments, so anything that could escape the
/// per-key directory is rejected here rather than sanitized.
fn validate_public_key(public_key: &str) -> Result<(), StorageError> {
    let safe = !public_key.is_empty()
        && public_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if safe {
        Ok(())
    } else {
        Err(StorageError::InvalidPublicKey {
            public_key: public_key.to_string(),
        })
    }
}

/// The attributes probed from an image at store time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub identifier: ImageId,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub extension: String,
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Public key contains characters that are not filesystem safe.
    #[error("invalid public key: {public_key}")]
    InvalidPublicKey { public_key: String },

    /// File format could not be determined or is unsupported.
    #[error("unsupported or unrecognized file format")]
    UnsupportedFile { kind: Option<infer::Type> },

    /// No file exists for the identifier.
    #[error("file not found: {identifier}")]
    FileNotFound { identifier: ImageId },

    /// Filesystem IO error.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// A content-derived image identifier: a 64-bit hash of the stored bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId([u8; 8]);

impl ImageId {
    /// Computes the identifier for a byte slice.
    pub fn compute(bytes: &[u8]) -> ImageId {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(bytes);

        ImageId::from(hasher.finish())
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex: String = self.clone().into();
        write!(f, "{}", hex)
    }
}

impl TryFrom<&str> for ImageId {
    type Error = ImageIdParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl TryFrom<String> for ImageId {
    type Error = ImageIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() != 16 {
            return Err(ImageIdParseError::InvalidLength);
        }

        let mut bytes = [0u8; 8];

        for (i, byte) in bytes.iter_mut().enumerate() {
            let chunk = &value[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(chunk, 16).map_err(|_| ImageIdParseError::InvalidHex)?;
        }

        Ok(ImageId(bytes))
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum ImageIdParseError {
    #[error("image identifier must be exactly 16 hexadecimal characters")]
    InvalidLength,

    #[error("image identifier contains invalid hexadecimal characters")]
    InvalidHex,
}

/// Converts an ImageId into a hex string.
impl From<ImageId> for String {
    fn from(value: ImageId) -> Self {
        value.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<ImageId> for u64 {
    fn from(value: ImageId) -> Self {
        u64::from_be_bytes(value.0)
    }
}

impl From<u64> for ImageId {
    fn from(value: u64) -> Self {
        ImageId(value.to_be_bytes())
    }
}
