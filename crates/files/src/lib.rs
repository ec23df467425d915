//! Paraphe artifact storage
//!
//! This crate provides the storage gateway used by the signature orchestration
//! core to persist opaque byte blobs (rendered documents, signed PDFs,
//! evidence PDFs, final compliance PDFs, raw signature images).
//!
//! ## Design Principles
//!
//! - Blobs are grouped by *category* (e.g. `consent-signed`, `fees-final`);
//!   no cross-category namespace exists
//! - Blobs are immutable once stored; re-deriving an artifact produces a new
//!   identifier, never an overwrite
//! - Identifiers are opaque strings from the caller's point of view
//!   (internally, the SHA-256 of the content)
//! - References to blobs are explicit and auditable; records remain valid
//!   even when a referenced blob is absent (integrity is checked by the
//!   verification sweep, not at reference time)
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//! └── <category>/
//!     └── sha256/
//!         └── ab/
//!             └── cd/
//!                 ├── abcd3f9e…            # blob bytes
//!                 └── abcd3f9e….meta.json  # storage metadata sidecar
//! ```
//!
//! ## Content Addressing
//!
//! Files are stored under their SHA-256 hash. This provides deduplication
//! (storing identical bytes twice returns the existing identifier),
//! integrity verification, and deterministic paths.

mod store;

pub use store::{BlobMetadata, FileStore};

/// Errors that can occur during blob storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Root directory does not exist, is not a directory, or cannot be created
    #[error("Invalid storage root: {0}")]
    InvalidRootDirectory(String),

    /// Category name failed validation (empty, or contains characters outside
    /// lowercase alphanumerics and `-`)
    #[error("Invalid storage category: {0}")]
    InvalidCategory(String),

    /// Identifier is not a well-formed content hash
    #[error("Invalid blob identifier: {0}")]
    InvalidIdentifier(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata sidecar could not be serialized
    #[error("Failed to serialize blob metadata: {0}")]
    MetadataSerialization(serde_json::Error),
}
