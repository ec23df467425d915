//! Case directory boundary.
//!
//! Case CRUD belongs to the practice-management side; initiation only needs
//! to look a case up, check signer contact details, and find the rendered
//! base documents. That read surface is the [`CaseDirectory`] trait, with a
//! JSON-file-backed implementation for production and tests alike.

use crate::config::SignConfig;
use crate::error::{SignatureError, SignatureResult};
use crate::model::{DocumentKind, SignerRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Contact details of one signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactDetails {
    /// A signer is reachable when at least one contact channel is present.
    pub fn reachable(&self) -> bool {
        let has = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        has(&self.email) || has(&self.phone)
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One case as the signature core sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: Uuid,
    /// Display label for the child, used in cabinet session metadata.
    pub child_label: String,
    pub parent1: ContactDetails,
    pub parent2: ContactDetails,
    /// Blob identifiers of the rendered base legal documents, keyed by
    /// document kind code. Maintained by the template renderer.
    pub rendered_documents: BTreeMap<String, String>,
}

impl CaseRecord {
    pub fn contact(&self, role: SignerRole) -> &ContactDetails {
        match role {
            SignerRole::Parent1 => &self.parent1,
            SignerRole::Parent2 => &self.parent2,
        }
    }

    pub fn rendered_document(&self, kind: DocumentKind) -> Option<&str> {
        self.rendered_documents.get(kind.code()).map(String::as_str)
    }
}

/// Read access to the case directory.
pub trait CaseDirectory: Send + Sync {
    fn case(&self, case_id: Uuid) -> SignatureResult<Option<CaseRecord>>;
}

/// Case directory backed by one JSON file per case under
/// `<data_dir>/cases/`.
pub struct FileCaseDirectory {
    dir: PathBuf,
}

impl FileCaseDirectory {
    pub fn new(config: &Arc<SignConfig>) -> Self {
        Self {
            dir: config.cases_dir(),
        }
    }

    fn case_path(&self, case_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", case_id.simple()))
    }

    /// Writes a case record. The management side owns case content; this
    /// entry point exists for seeding and admin tooling.
    pub fn put(&self, case: &CaseRecord) -> SignatureResult<()> {
        fs::create_dir_all(&self.dir).map_err(SignatureError::FileWrite)?;
        let body = serde_json::to_vec_pretty(case).map_err(SignatureError::Serialization)?;
        fs::write(self.case_path(case.id), body).map_err(SignatureError::FileWrite)
    }
}

impl CaseDirectory for FileCaseDirectory {
    fn case(&self, case_id: Uuid) -> SignatureResult<Option<CaseRecord>> {
        let body = match fs::read(self.case_path(case_id)) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SignatureError::FileRead(e)),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(SignatureError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn contact(email: Option<&str>, phone: Option<&str>) -> ContactDetails {
        ContactDetails {
            first_name: "Jeanne".to_string(),
            last_name: "Martin".to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
        }
    }

    #[test]
    fn reachability_requires_a_non_blank_channel() {
        assert!(contact(Some("j@example.org"), None).reachable());
        assert!(contact(None, Some("+33600000001")).reachable());
        assert!(!contact(None, None).reachable());
        assert!(!contact(Some("   "), None).reachable());
    }

    #[test]
    fn file_directory_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(SignConfig::new(dir.path().to_path_buf()).unwrap());
        let directory = FileCaseDirectory::new(&config);

        let case = CaseRecord {
            id: Uuid::new_v4(),
            child_label: "Case A".to_string(),
            parent1: contact(Some("p1@example.org"), None),
            parent2: contact(None, Some("+33600000002")),
            rendered_documents: BTreeMap::from([(
                "consent".to_string(),
                "deadbeef".to_string(),
            )]),
        };
        directory.put(&case).unwrap();

        let loaded = directory.case(case.id).unwrap().unwrap();
        assert_eq!(loaded.child_label, "Case A");
        assert_eq!(loaded.rendered_document(DocumentKind::Consent), Some("deadbeef"));
        assert_eq!(loaded.rendered_document(DocumentKind::Fees), None);

        assert!(directory.case(Uuid::new_v4()).unwrap().is_none());
    }
}
