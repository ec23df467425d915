//! In-person signature capture.
//!
//! A practitioner issues a short-lived session for one (document, role);
//! the plaintext token travels to a supervised device and is never
//! persisted, only its SHA-256 hash. The device uploads a raster signature
//! which is stamped onto the base PDF together with an audit strip, an
//! evidence PDF is rendered locally, and the completion funnels into the
//! same state machine as the remote channel. This path never touches the
//! provider and carries no purge obligation.
//!
//! Only the most recently issued token per (document, role) is valid: the
//! signer record points at the latest token hash, and older sessions are
//! implicitly superseded.

use crate::cases::{CaseDirectory, CaseRecord};
use crate::config::SignConfig;
use crate::error::{SignatureError, SignatureResult};
use crate::model::{
    ArtifactKind, CabinetAudit, CabinetSession, CompletionMethod, DocumentKind,
    DocumentSignature, RoleStatus, SignerRole,
};
use crate::orchestrator::{SignatureOrchestrator, SignedArtifacts};
use crate::store::SignatureStore;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use paraphe_files::FileStore;
use paraphe_pdf::SignatureStamp;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Raw signature images are stored apart from the per-kind artifact
/// categories; they are audit evidence, not documents.
const IMAGE_CATEGORY: &str = "cabinet-images";

/// Length of the token prefix drawn on the audit strip.
const TOKEN_REFERENCE_LEN: usize = 8;

/// A freshly issued session. The token appears here and nowhere else.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub document_id: Uuid,
    pub role: SignerRole,
    pub expires_at: DateTime<Utc>,
}

/// Session metadata shown to the tablet while it polls.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub document_id: Uuid,
    pub kind: DocumentKind,
    pub role: SignerRole,
    pub document_title: &'static str,
    pub child_label: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// One upload from the supervised device.
#[derive(Debug, Clone)]
pub struct CabinetUpload {
    pub image: Vec<u8>,
    pub consent_confirmed: bool,
    pub device_id: String,
    pub requester_ip: String,
    pub user_agent: Option<String>,
}

pub struct CabinetCaptureFlow {
    config: Arc<SignConfig>,
    store: Arc<SignatureStore>,
    files: Arc<FileStore>,
    cases: Arc<dyn CaseDirectory>,
    orchestrator: Arc<SignatureOrchestrator>,
}

impl CabinetCaptureFlow {
    pub fn new(
        config: Arc<SignConfig>,
        store: Arc<SignatureStore>,
        files: Arc<FileStore>,
        cases: Arc<dyn CaseDirectory>,
        orchestrator: Arc<SignatureOrchestrator>,
    ) -> Self {
        Self {
            config,
            store,
            files,
            cases,
            orchestrator,
        }
    }

    /// Issues a single-use session for (document, role). The returned
    /// plaintext token is handed out exactly once; creating a new session
    /// supersedes any previous one for the same pair.
    pub fn create_session(
        &self,
        document_id: Uuid,
        role: SignerRole,
        practitioner: &str,
    ) -> SignatureResult<IssuedSession> {
        let doc = self.store.load_by_document(document_id)?.ok_or_else(|| {
            SignatureError::NotFound(format!("no signature record for document {document_id}"))
        })?;
        if doc.signer(role).status == RoleStatus::Signed {
            return Err(SignatureError::Conflict(format!(
                "{} has already signed this document",
                role.code()
            )));
        }

        let case = self.cases.case(doc.case_id)?.ok_or_else(|| {
            SignatureError::NotFound(format!("unknown case {}", doc.case_id))
        })?;
        let base = self.load_base_document(&doc, &case)?;
        let document_hash = hex_sha256(&base);

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw);
        let token_hash = hex_sha256(token.as_bytes());

        let issued_at = Utc::now();
        let session = CabinetSession {
            token_hash: token_hash.clone(),
            document_id,
            role,
            practitioner: practitioner.to_string(),
            document_hash,
            issued_at,
            expires_at: issued_at + self.config.session_ttl(),
            completed_at: None,
        };
        self.store.save_session(&session)?;

        self.store.update_with(document_id, |record| {
            record.signer_mut(role).cabinet_token_hash = Some(token_hash.clone());
            Ok(())
        })?;

        tracing::info!(
            document_id = %document_id,
            role = role.code(),
            practitioner,
            expires_at = %session.expires_at,
            "cabinet session issued"
        );
        Ok(IssuedSession {
            token,
            document_id,
            role,
            expires_at: session.expires_at,
        })
    }

    /// Validity check plus display metadata for the device.
    pub fn session_status(&self, token: &str) -> SignatureResult<SessionStatus> {
        let (session, doc) = self.resolve_active_session(token)?;
        let child_label = self
            .cases
            .case(doc.case_id)?
            .map(|case| case.child_label);

        Ok(SessionStatus {
            document_id: session.document_id,
            kind: doc.kind,
            role: session.role,
            document_title: doc.kind.title(),
            child_label,
            expires_at: session.expires_at,
        })
    }

    /// Accepts the signature image, stamps it into the base PDF, renders
    /// the evidence PDF, and applies the signed transition with
    /// `method = cabinet`.
    pub async fn upload_signature(
        &self,
        token: &str,
        upload: CabinetUpload,
    ) -> SignatureResult<DocumentSignature> {
        let (session, doc) = self.resolve_active_session(token)?;
        let role = session.role;

        if !upload.consent_confirmed {
            return Err(SignatureError::Validation(
                "consent must be confirmed before signing".into(),
            ));
        }
        let is_png = infer::get(&upload.image)
            .map(|t| t.mime_type() == "image/png")
            .unwrap_or(false);
        if !is_png {
            return Err(SignatureError::Validation(
                "signature image must be a PNG".into(),
            ));
        }
        if upload.image.len() > self.config.max_signature_image_bytes() {
            return Err(SignatureError::Validation(format!(
                "signature image exceeds {} bytes",
                self.config.max_signature_image_bytes()
            )));
        }

        let case = self.cases.case(doc.case_id)?.ok_or_else(|| {
            SignatureError::NotFound(format!("unknown case {}", doc.case_id))
        })?;
        let base = self.load_base_document(&doc, &case)?;
        let document_hash = hex_sha256(&base);
        if document_hash != session.document_hash {
            return Err(SignatureError::Conflict(
                "document content changed since the session was issued".into(),
            ));
        }

        let signed_at = Utc::now();
        let signer_label = format!("{} - {}", role.label(), case.contact(role).display_name());
        let token_reference = token.chars().take(TOKEN_REFERENCE_LEN).collect::<String>();

        let stamp = SignatureStamp {
            signer_label: signer_label.clone(),
            signed_at,
            requester_ip: upload.requester_ip.clone(),
            session_reference: token_reference.clone(),
        };
        let signed_pdf = paraphe_pdf::stamp_signature(&base, &upload.image, &stamp)
            .map_err(|e| SignatureError::Validation(format!("could not embed signature: {e}")))?;

        let signed_pdf_id = self.files.save(
            &ArtifactKind::Signed.category(doc.kind),
            "signed.pdf",
            &signed_pdf,
        )?;
        let image_id = self
            .files
            .save(IMAGE_CATEGORY, "signature.png", &upload.image)?;
        let image_hash = hex_sha256(&upload.image);

        let evidence_pdf = self.render_evidence(
            &doc,
            &signer_label,
            &upload,
            signed_at,
            &document_hash,
            &image_hash,
            &token_reference,
        )?;
        let evidence_pdf_id = self.files.save(
            &ArtifactKind::Evidence.category(doc.kind),
            "evidence.pdf",
            &evidence_pdf,
        )?;

        // Two concurrent uploads of the same token can both pass
        // resolve_active_session; only one wins the claim, the other gets
        // Conflict before any audit write or state transition.
        let completed = self.store.complete_session(&session.token_hash, signed_at)?;

        self.store.append_audit(&CabinetAudit {
            session_token_hash: completed.token_hash.clone(),
            document_id: doc.id,
            role,
            image_id,
            image_hash,
            document_hash,
            consent_confirmed: upload.consent_confirmed,
            device_id: upload.device_id.clone(),
            requester_ip: upload.requester_ip.clone(),
            user_agent: upload.user_agent.clone(),
            signed_at,
        })?;

        self.orchestrator
            .apply_signature_event(
                doc.id,
                role,
                signed_at,
                CompletionMethod::Cabinet,
                SignedArtifacts::Stored {
                    signed_pdf_id,
                    evidence_pdf_id,
                },
            )
            .await
    }

    /// Resolves a plaintext token to its session and document, rejecting
    /// completed, expired, and superseded sessions. Expiry acts as a lease
    /// deadline: past it the session is permanently invalid.
    fn resolve_active_session(
        &self,
        token: &str,
    ) -> SignatureResult<(CabinetSession, DocumentSignature)> {
        let token_hash = hex_sha256(token.as_bytes());
        let session = self.store.load_session(&token_hash)?.ok_or_else(|| {
            SignatureError::NotFound("unknown session token".into())
        })?;

        if session.completed_at.is_some() {
            return Err(SignatureError::Conflict(
                "session has already been completed".into(),
            ));
        }
        if session.is_expired(Utc::now()) {
            return Err(SignatureError::Gone("session has expired".into()));
        }

        let doc = self
            .store
            .load_by_document(session.document_id)?
            .ok_or_else(|| {
                SignatureError::NotFound(format!(
                    "no signature record for document {}",
                    session.document_id
                ))
            })?;

        let latest = doc.signer(session.role).cabinet_token_hash.as_deref();
        if latest != Some(token_hash.as_str()) {
            return Err(SignatureError::Gone(
                "session was superseded by a newer one".into(),
            ));
        }
        if doc.signer(session.role).status == RoleStatus::Signed {
            return Err(SignatureError::Conflict(format!(
                "{} has already signed this document",
                session.role.code()
            )));
        }

        Ok((session, doc))
    }

    fn load_base_document(
        &self,
        doc: &DocumentSignature,
        case: &CaseRecord,
    ) -> SignatureResult<Vec<u8>> {
        let base_id = case.rendered_document(doc.kind).ok_or_else(|| {
            SignatureError::Validation(format!(
                "case has no rendered {} document",
                doc.kind.code()
            ))
        })?;
        self.files
            .load(&ArtifactKind::Base.category(doc.kind), base_id)?
            .ok_or_else(|| {
                SignatureError::Validation(format!(
                    "rendered base document blob {base_id} is missing"
                ))
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn render_evidence(
        &self,
        doc: &DocumentSignature,
        signer_label: &str,
        upload: &CabinetUpload,
        signed_at: DateTime<Utc>,
        document_hash: &str,
        image_hash: &str,
        token_reference: &str,
    ) -> SignatureResult<Vec<u8>> {
        let lines = vec![
            format!("Document: {} (v{})", doc.kind.title(), doc.catalog_version),
            format!("Signer: {signer_label}"),
            format!("Signed in person on {}", signed_at.format("%Y-%m-%d %H:%M:%S UTC")),
            format!("Device: {}", upload.device_id),
            format!("Requester IP: {}", upload.requester_ip),
            format!(
                "User agent: {}",
                upload.user_agent.as_deref().unwrap_or("unknown")
            ),
            format!("Consent confirmed: {}", upload.consent_confirmed),
            format!("Document SHA-256: {document_hash}"),
            format!("Signature image SHA-256: {image_hash}"),
            format!("Session reference: {token_reference}"),
        ];
        paraphe_pdf::render_report("In-person signature record", &lines)
            .map_err(|e| SignatureError::Validation(format!("evidence rendering failed: {e}")))
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
