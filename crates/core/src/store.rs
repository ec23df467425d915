//! JSON-file persistence for signature records, cabinet sessions, and
//! cabinet audit records.
//!
//! Layout under the configured data directory:
//!
//! ```text
//! signatures/<s1>/<s2>/<case_id>/<kind>.json   one record per (case, kind)
//! indexes/by_document/<s1>/<s2>/<doc_id>.json  document id -> (case, kind)
//! indexes/by_request/<s1>/<s2>/<sha256>.json   request id -> (case, kind)
//! sessions/<token_sha256>.json                 cabinet session leases
//! audits/<doc_id>/<token_sha256>.json          append-only capture records
//! ```
//!
//! `<s1>/<s2>` are the first four hex characters of the identifier, which
//! keeps directory fan-out bounded. Uniqueness of (case, kind) falls out of
//! the record path.
//!
//! All record mutation goes through [`SignatureStore::update_with`], which
//! serializes read-modify-write cycles behind a store-level mutex. Two
//! near-simultaneous completions for different roles on the same document
//! must observe each other, or "both signed" would be computed from a stale
//! snapshot and the record could stay `partially_signed` forever.

use crate::config::SignConfig;
use crate::error::{SignatureError, SignatureResult};
use crate::model::{CabinetAudit, CabinetSession, DocumentKind, DocumentSignature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Pointer stored in the lookup indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordPointer {
    case_id: Uuid,
    kind: DocumentKind,
}

pub struct SignatureStore {
    config: Arc<SignConfig>,
    /// Guards every record read-modify-write cycle. Held only across
    /// synchronous filesystem work, never across an await point.
    write_lock: Mutex<()>,
}

impl SignatureStore {
    pub fn new(config: Arc<SignConfig>) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock only means another thread panicked mid-write;
        // the guard itself is still safe to take.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sharded(root: PathBuf, id: &str) -> PathBuf {
        root.join(&id[0..2]).join(&id[2..4])
    }

    fn record_path(&self, case_id: Uuid, kind: DocumentKind) -> PathBuf {
        let case = case_id.simple().to_string();
        Self::sharded(self.config.signatures_dir(), &case)
            .join(case)
            .join(format!("{}.json", kind.code()))
    }

    fn document_index_path(&self, document_id: Uuid) -> PathBuf {
        let id = document_id.simple().to_string();
        Self::sharded(self.config.indexes_dir().join("by_document"), &id)
            .join(format!("{id}.json"))
    }

    fn request_index_path(&self, request_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(request_id.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self::sharded(self.config.indexes_dir().join("by_request"), &digest)
            .join(format!("{digest}.json"))
    }

    fn session_path(&self, token_hash: &str) -> PathBuf {
        self.config.sessions_dir().join(format!("{token_hash}.json"))
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> SignatureResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SignatureError::FileWrite)?;
        }
        let body = serde_json::to_vec_pretty(value).map_err(SignatureError::Serialization)?;
        fs::write(path, body).map_err(SignatureError::FileWrite)
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> SignatureResult<Option<T>> {
        let body = match fs::read(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SignatureError::FileRead(e)),
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(SignatureError::Deserialization)
    }

    /// Loads the record for a (case, kind) pair.
    pub fn load(
        &self,
        case_id: Uuid,
        kind: DocumentKind,
    ) -> SignatureResult<Option<DocumentSignature>> {
        Self::read_json(&self.record_path(case_id, kind))
    }

    /// Loads a record through the document-id index.
    pub fn load_by_document(
        &self,
        document_id: Uuid,
    ) -> SignatureResult<Option<DocumentSignature>> {
        let pointer: Option<RecordPointer> =
            Self::read_json(&self.document_index_path(document_id))?;
        match pointer {
            Some(pointer) => self.load(pointer.case_id, pointer.kind),
            None => Ok(None),
        }
    }

    /// Loads a record through the provider-request-id index.
    pub fn load_by_request(
        &self,
        request_id: &str,
    ) -> SignatureResult<Option<DocumentSignature>> {
        let pointer: Option<RecordPointer> =
            Self::read_json(&self.request_index_path(request_id))?;
        match pointer {
            Some(pointer) => self.load(pointer.case_id, pointer.kind),
            None => Ok(None),
        }
    }

    /// Returns the existing record for (case, kind), creating a draft one
    /// on first call.
    pub fn get_or_create(
        &self,
        case_id: Uuid,
        kind: DocumentKind,
    ) -> SignatureResult<DocumentSignature> {
        let _guard = self.lock();
        if let Some(existing) = self.load(case_id, kind)? {
            return Ok(existing);
        }

        let record = DocumentSignature::new(case_id, kind);
        Self::write_json(&self.record_path(case_id, kind), &record)?;
        Self::write_json(
            &self.document_index_path(record.id),
            &RecordPointer { case_id, kind },
        )?;
        tracing::debug!(
            document_id = %record.id,
            case_id = %case_id,
            kind = kind.code(),
            "created draft signature record"
        );
        Ok(record)
    }

    /// Runs a read-modify-write transaction against one record.
    ///
    /// The closure observes the freshest persisted state and must stay
    /// synchronous. If it errors the record is not written. A provider
    /// request id set by the closure is indexed on commit.
    pub fn update_with<T>(
        &self,
        document_id: Uuid,
        f: impl FnOnce(&mut DocumentSignature) -> SignatureResult<T>,
    ) -> SignatureResult<T> {
        let _guard = self.lock();
        let mut record = self.load_by_document(document_id)?.ok_or_else(|| {
            SignatureError::NotFound(format!("no signature record for document {document_id}"))
        })?;

        let outcome = f(&mut record)?;
        record.updated_at = chrono::Utc::now();
        Self::write_json(&self.record_path(record.case_id, record.kind), &record)?;

        if let Some(request_id) = record.provider_request_id.as_deref() {
            let index_path = self.request_index_path(request_id);
            if !index_path.exists() {
                Self::write_json(
                    &index_path,
                    &RecordPointer {
                        case_id: record.case_id,
                        kind: record.kind,
                    },
                )?;
            }
        }
        Ok(outcome)
    }

    /// Walks every persisted record. Used by the verification sweep.
    pub fn list_all(&self) -> SignatureResult<Vec<DocumentSignature>> {
        let mut records = Vec::new();
        let root = self.config.signatures_dir();
        if !root.is_dir() {
            return Ok(records);
        }

        for shard1 in read_dirs(&root)? {
            for shard2 in read_dirs(&shard1)? {
                for case_dir in read_dirs(&shard2)? {
                    for entry in
                        fs::read_dir(&case_dir).map_err(SignatureError::FileRead)?
                    {
                        let path = entry.map_err(SignatureError::FileRead)?.path();
                        if path.extension().and_then(|e| e.to_str()) == Some("json") {
                            if let Some(record) = Self::read_json(&path)? {
                                records.push(record);
                            }
                        }
                    }
                }
            }
        }
        Ok(records)
    }

    pub fn save_session(&self, session: &CabinetSession) -> SignatureResult<()> {
        Self::write_json(&self.session_path(&session.token_hash), session)
    }

    pub fn load_session(&self, token_hash: &str) -> SignatureResult<Option<CabinetSession>> {
        Self::read_json(&self.session_path(token_hash))
    }

    /// Atomically claims a session for completion. The freshest persisted
    /// state is re-checked and the marker written under the store lock, so
    /// two concurrent uploads of the same token cannot both succeed.
    pub fn complete_session(
        &self,
        token_hash: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SignatureResult<CabinetSession> {
        let _guard = self.lock();
        let mut session = self.load_session(token_hash)?.ok_or_else(|| {
            SignatureError::NotFound("unknown cabinet session".to_string())
        })?;
        if session.completed_at.is_some() {
            return Err(SignatureError::Conflict(
                "cabinet session is already completed".to_string(),
            ));
        }
        session.completed_at = Some(now);
        self.save_session(&session)?;
        Ok(session)
    }

    /// Persists an immutable cabinet capture record. One file per session;
    /// a session completes at most once, so nothing is ever overwritten.
    pub fn append_audit(&self, audit: &CabinetAudit) -> SignatureResult<()> {
        let path = self
            .config
            .audits_dir()
            .join(audit.document_id.simple().to_string())
            .join(format!("{}.json", audit.session_token_hash));
        Self::write_json(&path, audit)
    }
}

fn read_dirs(path: &Path) -> SignatureResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path).map_err(SignatureError::FileRead)? {
        let path = entry.map_err(SignatureError::FileRead)?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}
