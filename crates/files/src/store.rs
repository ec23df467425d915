//! Category-scoped blob store implementation
//!
//! This module provides the [`FileStore`] type, the storage gateway behind
//! the signature orchestration core. It manages the byte streams that make up
//! a document's compliance trail: rendered legal documents, signed PDFs,
//! evidence PDFs, assembled final PDFs, and raw cabinet signature images.
//!
//! # Content Addressing
//!
//! Blobs are stored using their SHA-256 hash as the identifier. This provides:
//!
//! - **Deduplication**: identical bytes are stored once, and `save` returns
//!   the existing identifier instead of failing
//! - **Integrity**: blob content can be verified against its identifier
//! - **Immutability**: blobs cannot be modified after creation; re-deriving
//!   an artifact with different bytes yields a new identifier
//!
//! # Security Model
//!
//! - The root path is canonicalised at construction
//! - Category names are validated against a strict character set, so no
//!   caller-supplied value can escape the root
//! - Identifiers are validated as 64 lowercase hex characters before any
//!   path is derived from them

use crate::StorageError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata sidecar for a stored blob
///
/// Written next to the blob as `<hash>.meta.json`. It records storage
/// circumstances without containing any patient or clinical identifiers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Hashing algorithm used (always "sha256" for the current implementation)
    pub hash_algorithm: String,

    /// Hexadecimal digest of the blob content
    pub hash: String,

    /// Category the blob was stored under
    pub category: String,

    /// Size of the blob in bytes
    pub size_bytes: u64,

    /// Human-readable hint supplied by the caller (e.g. an intended filename)
    pub filename_hint: String,

    /// UTC timestamp when the blob was stored
    pub stored_at: DateTime<Utc>,
}

/// Category-scoped, content-addressed blob store
///
/// Implements the storage gateway contract used by the orchestration core:
/// `save(category, filename_hint, bytes) -> identifier`, `exists`, `load`.
/// Identifiers are opaque strings, never reused across categories.
#[derive(Debug)]
pub struct FileStore {
    /// Canonicalised root directory containing all categories
    root_directory: PathBuf,
}

impl FileStore {
    /// Creates a new `FileStore` rooted at `root_directory`.
    ///
    /// The directory is created if it does not exist, then canonicalised.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidRootDirectory` if the path exists but is
    /// not a directory, or cannot be created or canonicalised.
    pub fn new(root_directory: &Path) -> Result<Self, StorageError> {
        if root_directory.exists() && !root_directory.is_dir() {
            return Err(StorageError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        fs::create_dir_all(root_directory).map_err(|e| {
            StorageError::InvalidRootDirectory(format!(
                "Cannot create root directory {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        let root_directory = root_directory.canonicalize().map_err(|e| {
            StorageError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self { root_directory })
    }

    /// Stores a blob under a category and returns its identifier.
    ///
    /// Computes the SHA-256 of `bytes` and stores the blob at a sharded,
    /// content-addressed location within the category. Saving bytes that are
    /// already present returns the existing identifier; artifacts are
    /// re-derived rather than overwritten, so this is not an error.
    ///
    /// # Arguments
    ///
    /// * `category` - Category name (lowercase alphanumerics and `-`)
    /// * `filename_hint` - Human-readable hint recorded in the metadata sidecar
    /// * `bytes` - Blob content
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the category is invalid, directory creation
    /// fails, or the blob or its sidecar cannot be written.
    pub fn save(
        &self,
        category: &str,
        filename_hint: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        validate_category(category)?;

        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hex::encode(hasher.finalize());

        let storage_path = self.blob_path(category, &hash);

        if storage_path.exists() {
            tracing::debug!(category, hash = %hash, "blob already stored, reusing identifier");
            return Ok(hash);
        }

        if let Some(parent) = storage_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&storage_path, bytes)?;

        let metadata = BlobMetadata {
            hash_algorithm: "sha256".to_string(),
            hash: hash.clone(),
            category: category.to_string(),
            size_bytes: bytes.len() as u64,
            filename_hint: filename_hint.to_string(),
            stored_at: Utc::now(),
        };
        let sidecar =
            serde_json::to_vec_pretty(&metadata).map_err(StorageError::MetadataSerialization)?;
        fs::write(self.sidecar_path(category, &hash), sidecar)?;

        Ok(hash)
    }

    /// Returns whether a blob exists under a category.
    ///
    /// Invalid categories or identifiers simply report `false`; this is a
    /// query, not a validation entry point.
    #[must_use]
    pub fn exists(&self, category: &str, identifier: &str) -> bool {
        if validate_category(category).is_err() || validate_identifier(identifier).is_err() {
            return false;
        }
        self.blob_path(category, identifier).is_file()
    }

    /// Retrieves a blob by category and identifier.
    ///
    /// Returns `Ok(None)` when the blob is absent; records referencing a
    /// missing blob are a sweep finding, not an I/O error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the category or identifier is malformed, or
    /// if the blob exists but cannot be read.
    pub fn load(&self, category: &str, identifier: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_category(category)?;
        validate_identifier(identifier)?;

        let storage_path = self.blob_path(category, identifier);
        if !storage_path.is_file() {
            return Ok(None);
        }

        Ok(Some(fs::read(&storage_path)?))
    }

    /// Reads the metadata sidecar for a stored blob, if present.
    pub fn metadata(
        &self,
        category: &str,
        identifier: &str,
    ) -> Result<Option<BlobMetadata>, StorageError> {
        validate_category(category)?;
        validate_identifier(identifier)?;

        let sidecar_path = self.sidecar_path(category, identifier);
        if !sidecar_path.is_file() {
            return Ok(None);
        }

        let bytes = fs::read(&sidecar_path)?;
        match serde_json::from_slice(&bytes) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                tracing::warn!(
                    category,
                    identifier,
                    "unreadable blob metadata sidecar: {}",
                    e
                );
                Ok(None)
            }
        }
    }

    /// Computes the sharded storage path for a blob.
    ///
    /// Example: hash `abcdef123…` in category `consent-signed` produces
    /// `<root>/consent-signed/sha256/ab/cd/abcdef123…`.
    fn blob_path(&self, category: &str, hash_hex: &str) -> PathBuf {
        let shard1 = &hash_hex[0..2];
        let shard2 = &hash_hex[2..4];
        self.root_directory
            .join(category)
            .join("sha256")
            .join(shard1)
            .join(shard2)
            .join(hash_hex)
    }

    /// Path of the metadata sidecar next to a blob.
    fn sidecar_path(&self, category: &str, hash_hex: &str) -> PathBuf {
        let mut path = self.blob_path(category, hash_hex).into_os_string();
        path.push(".meta.json");
        PathBuf::from(path)
    }

    /// Returns the canonicalised storage root.
    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }
}

/// Validates a category name: non-empty, lowercase alphanumerics and `-`.
fn validate_category(category: &str) -> Result<(), StorageError> {
    if category.is_empty()
        || !category
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(StorageError::InvalidCategory(category.to_string()));
    }
    Ok(())
}

/// Validates an identifier as a 64-character lowercase hex SHA-256 digest.
fn validate_identifier(identifier: &str) -> Result<(), StorageError> {
    if identifier.len() != 64
        || !identifier
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(StorageError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(&temp.path().join("artifacts")).unwrap();
        (temp, store)
    }

    #[test]
    fn new_creates_missing_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("does").join("not").join("exist");

        let store = FileStore::new(&root).unwrap();
        assert!(store.root_directory().is_dir());
    }

    #[test]
    fn new_rejects_file_as_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("file.txt");
        fs::write(&root, "not a directory").unwrap();

        let result = FileStore::new(&root);
        assert!(matches!(result, Err(StorageError::InvalidRootDirectory(_))));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let (_temp, store) = store();

        let id = store
            .save("consent-signed", "consent.pdf", b"%PDF-1.5 fake body")
            .unwrap();
        assert_eq!(id.len(), 64);
        assert!(store.exists("consent-signed", &id));

        let loaded = store.load("consent-signed", &id).unwrap();
        assert_eq!(loaded.as_deref(), Some(b"%PDF-1.5 fake body".as_slice()));
    }

    #[test]
    fn save_is_idempotent_for_identical_bytes() {
        let (_temp, store) = store();

        let first = store.save("fees-final", "final.pdf", b"same bytes").unwrap();
        let second = store.save("fees-final", "final.pdf", b"same bytes").unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn different_bytes_produce_different_identifiers() {
        let (_temp, store) = store();

        let a = store.save("fees-final", "final.pdf", b"assembly one").unwrap();
        let b = store.save("fees-final", "final.pdf", b"assembly two").unwrap();

        assert_ne!(a, b);
        assert!(store.exists("fees-final", &a));
        assert!(store.exists("fees-final", &b));
    }

    #[test]
    fn categories_are_isolated() {
        let (_temp, store) = store();

        let id = store.save("consent-signed", "a.pdf", b"shared bytes").unwrap();

        assert!(store.exists("consent-signed", &id));
        assert!(!store.exists("consent-evidence", &id));
        assert_eq!(store.load("consent-evidence", &id).unwrap(), None);
    }

    #[test]
    fn load_missing_blob_returns_none() {
        let (_temp, store) = store();

        let fake = "ab".repeat(32);
        assert_eq!(store.load("consent-signed", &fake).unwrap(), None);
    }

    #[test]
    fn rejects_invalid_category() {
        let (_temp, store) = store();

        let result = store.save("../escape", "a.pdf", b"bytes");
        assert!(matches!(result, Err(StorageError::InvalidCategory(_))));

        let result = store.save("Signed", "a.pdf", b"bytes");
        assert!(matches!(result, Err(StorageError::InvalidCategory(_))));

        let result = store.save("", "a.pdf", b"bytes");
        assert!(matches!(result, Err(StorageError::InvalidCategory(_))));
    }

    #[test]
    fn rejects_invalid_identifier_on_load() {
        let (_temp, store) = store();

        let result = store.load("consent-signed", "../../etc/passwd");
        assert!(matches!(result, Err(StorageError::InvalidIdentifier(_))));

        let result = store.load("consent-signed", "short");
        assert!(matches!(result, Err(StorageError::InvalidIdentifier(_))));
    }

    #[test]
    fn blob_path_uses_two_level_sharding() {
        let (_temp, store) = store();

        let hash = "abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";
        let path = store.blob_path("consent-signed", hash);

        let path_str = path.to_string_lossy();
        assert!(path_str.contains("consent-signed/sha256/ab/cd/"));
        assert!(path_str.ends_with(hash));
    }

    #[test]
    fn metadata_sidecar_written_alongside_blob() {
        let (_temp, store) = store();

        let id = store
            .save("authorization-evidence", "audit.pdf", b"evidence bytes")
            .unwrap();

        let metadata = store
            .metadata("authorization-evidence", &id)
            .unwrap()
            .expect("sidecar present");

        assert_eq!(metadata.hash_algorithm, "sha256");
        assert_eq!(metadata.hash, id);
        assert_eq!(metadata.category, "authorization-evidence");
        assert_eq!(metadata.size_bytes, 14);
        assert_eq!(metadata.filename_hint, "audit.pdf");
    }

    #[test]
    fn metadata_for_missing_blob_is_none() {
        let (_temp, store) = store();

        let fake = "cd".repeat(32);
        assert_eq!(store.metadata("consent-signed", &fake).unwrap(), None);
    }
}
