//! Core runtime configuration.
//!
//! Resolved once at process startup and passed into services by `Arc`.
//! Nothing in the request path reads environment variables; the binaries do
//! that once and build a `SignConfig` from the result.

use crate::{SignatureError, SignatureResult};
use std::path::{Path, PathBuf};

/// Cabinet session lifetime.
const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;
/// Upper bound for an uploaded signature image (500 KiB).
const DEFAULT_MAX_SIGNATURE_IMAGE_BYTES: usize = 500 * 1024;
/// Completed-but-unpurged age before the sweep flags a record.
const DEFAULT_UNPURGED_AFTER_HOURS: i64 = 72;
/// Partially-signed age before the sweep flags a record as stuck.
const DEFAULT_STUCK_PARTIAL_AFTER_HOURS: i64 = 14 * 24;

/// Configuration for the signature core.
#[derive(Clone, Debug)]
pub struct SignConfig {
    data_dir: PathBuf,
    session_ttl_minutes: i64,
    max_signature_image_bytes: usize,
    unpurged_after_hours: i64,
    stuck_partial_after_hours: i64,
}

impl SignConfig {
    pub fn new(data_dir: PathBuf) -> SignatureResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(SignatureError::Validation(
                "data_dir cannot be empty".into(),
            ));
        }

        Ok(Self {
            data_dir,
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            max_signature_image_bytes: DEFAULT_MAX_SIGNATURE_IMAGE_BYTES,
            unpurged_after_hours: DEFAULT_UNPURGED_AFTER_HOURS,
            stuck_partial_after_hours: DEFAULT_STUCK_PARTIAL_AFTER_HOURS,
        })
    }

    pub fn with_session_ttl_minutes(mut self, minutes: i64) -> Self {
        self.session_ttl_minutes = minutes;
        self
    }

    pub fn with_max_image_bytes(mut self, bytes: usize) -> Self {
        self.max_signature_image_bytes = bytes;
        self
    }

    pub fn with_sweep_thresholds(mut self, unpurged_hours: i64, stuck_hours: i64) -> Self {
        self.unpurged_after_hours = unpurged_hours;
        self.stuck_partial_after_hours = stuck_hours;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Root of the per-document signature records.
    pub fn signatures_dir(&self) -> PathBuf {
        self.data_dir.join("signatures")
    }

    /// Root of the document-id and request-id lookup indexes.
    pub fn indexes_dir(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }

    /// Cabinet session leases, one file per hashed token.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Append-only cabinet signature audit records.
    pub fn audits_dir(&self) -> PathBuf {
        self.data_dir.join("audits")
    }

    /// Case records maintained by the practice-management side.
    pub fn cases_dir(&self) -> PathBuf {
        self.data_dir.join("cases")
    }

    /// Blob storage root handed to the file store.
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_ttl_minutes)
    }

    pub fn max_signature_image_bytes(&self) -> usize {
        self.max_signature_image_bytes
    }

    pub fn unpurged_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.unpurged_after_hours)
    }

    pub fn stuck_partial_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stuck_partial_after_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = SignConfig::new(PathBuf::from("/tmp/paraphe")).unwrap();
        assert_eq!(config.session_ttl(), chrono::Duration::minutes(30));
        assert_eq!(config.max_signature_image_bytes(), 512_000);
        assert_eq!(config.signatures_dir(), Path::new("/tmp/paraphe/signatures"));
    }

    #[test]
    fn empty_data_dir_is_rejected() {
        assert!(SignConfig::new(PathBuf::new()).is_err());
    }
}
