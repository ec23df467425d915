//! Persisted domain records and their invariants.
//!
//! A [`DocumentSignature`] exists per (case, document kind) and is the row
//! every transition funnels through. Its overall status is monotonic:
//! recomputation can only move it forward, never back, and `completed`
//! holds exactly when both signer roles are `signed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed catalog of signable legal documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Authorization,
    Consent,
    Fees,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::Authorization,
        DocumentKind::Consent,
        DocumentKind::Fees,
    ];

    /// Stable code used in storage paths and the REST surface.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentKind::Authorization => "authorization",
            DocumentKind::Consent => "consent",
            DocumentKind::Fees => "fees",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn title(&self) -> &'static str {
        match self {
            DocumentKind::Authorization => "Care authorization",
            DocumentKind::Consent => "Informed consent",
            DocumentKind::Fees => "Fee quote",
        }
    }

    /// Acknowledgement text for the derivative document sent to the
    /// provider. Deliberately free of patient-identifying content.
    pub fn acknowledgement_lines(&self) -> Vec<String> {
        let subject = match self {
            DocumentKind::Authorization => "the care authorization presented at the practice",
            DocumentKind::Consent => "the informed consent presented at the practice",
            DocumentKind::Fees => "the fee quote presented at the practice",
        };
        vec![
            format!("The undersigned acknowledges having read {subject}"),
            "and agrees to its terms by signing this acknowledgement.".to_string(),
        ]
    }
}

/// Artifact families a document accumulates over its lifecycle. Each maps
/// to its own blob storage category so identifiers are never reused across
/// families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Rendered base legal document, produced by the template renderer.
    Base,
    /// Signed document (provider download or cabinet stamping).
    Signed,
    /// Audit trail / evidence PDF.
    Evidence,
    /// Assembled compliance PDF (base + evidence + signed).
    Final,
}

impl ArtifactKind {
    pub fn category(&self, kind: DocumentKind) -> String {
        let suffix = match self {
            ArtifactKind::Base => "base",
            ArtifactKind::Signed => "signed",
            ArtifactKind::Evidence => "evidence",
            ArtifactKind::Final => "final",
        };
        format!("{}-{}", kind.code(), suffix)
    }
}

/// The two signer roles. Fixed, not extensible in the current catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    Parent1,
    Parent2,
}

impl SignerRole {
    pub const BOTH: [SignerRole; 2] = [SignerRole::Parent1, SignerRole::Parent2];

    pub fn code(&self) -> &'static str {
        match self {
            SignerRole::Parent1 => "parent1",
            SignerRole::Parent2 => "parent2",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::BOTH.into_iter().find(|role| role.code() == code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SignerRole::Parent1 => "Parent 1",
            SignerRole::Parent2 => "Parent 2",
        }
    }
}

/// Per-role signing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    Pending,
    Sent,
    Signed,
}

/// How a role reached `signed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMethod {
    Remote,
    Cabinet,
}

/// Document-level status. Ordered; transitions never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Draft,
    Sent,
    PartiallySigned,
    Completed,
}

impl OverallStatus {
    fn rank(&self) -> u8 {
        match self {
            OverallStatus::Draft => 0,
            OverallStatus::Sent => 1,
            OverallStatus::PartiallySigned => 2,
            OverallStatus::Completed => 3,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OverallStatus::Draft => "draft",
            OverallStatus::Sent => "sent",
            OverallStatus::PartiallySigned => "partially_signed",
            OverallStatus::Completed => "completed",
        }
    }
}

/// Signing progress of one role on one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerProgress {
    pub provider_signer_id: Option<String>,
    /// Hosted signing link, resolved through the retrieval fallback chain.
    pub signature_link: Option<String>,
    pub status: RoleStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub method: Option<CompletionMethod>,
    /// Hash of the most recently issued cabinet session token. Only this
    /// token is valid; older sessions are implicitly superseded.
    pub cabinet_token_hash: Option<String>,
}

impl Default for RoleStatus {
    fn default() -> Self {
        RoleStatus::Pending
    }
}

/// One signature workflow: a (case, document kind) pair and everything it
/// accumulates until completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSignature {
    pub id: Uuid,
    pub case_id: Uuid,
    pub kind: DocumentKind,
    pub catalog_version: u32,
    /// Set once at initiation, immutable thereafter.
    pub provider_request_id: Option<String>,
    pub parent1: SignerProgress,
    pub parent2: SignerProgress,
    pub overall_status: OverallStatus,
    /// Artifact identifiers. Blobs are content-addressed and never
    /// overwritten; re-derivation stores a new blob and re-points these.
    pub signed_pdf_id: Option<String>,
    pub evidence_pdf_id: Option<String>,
    pub final_pdf_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only after a successful provider purge call.
    pub purged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentSignature {
    pub fn new(case_id: Uuid, kind: DocumentKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            case_id,
            kind,
            catalog_version: 1,
            provider_request_id: None,
            parent1: SignerProgress::default(),
            parent2: SignerProgress::default(),
            overall_status: OverallStatus::Draft,
            signed_pdf_id: None,
            evidence_pdf_id: None,
            final_pdf_id: None,
            completed_at: None,
            purged_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn signer(&self, role: SignerRole) -> &SignerProgress {
        match role {
            SignerRole::Parent1 => &self.parent1,
            SignerRole::Parent2 => &self.parent2,
        }
    }

    pub fn signer_mut(&mut self, role: SignerRole) -> &mut SignerProgress {
        match role {
            SignerRole::Parent1 => &mut self.parent1,
            SignerRole::Parent2 => &mut self.parent2,
        }
    }

    pub fn both_signed(&self) -> bool {
        self.parent1.status == RoleStatus::Signed && self.parent2.status == RoleStatus::Signed
    }

    /// Was this document initiated through the remote provider? Only such
    /// documents carry a purge obligation.
    pub fn is_remote(&self) -> bool {
        self.provider_request_id.is_some()
    }

    /// Resolves a provider signer id to its role.
    pub fn role_for_provider_signer(&self, signer_id: &str) -> Option<SignerRole> {
        SignerRole::BOTH.into_iter().find(|role| {
            self.signer(*role)
                .provider_signer_id
                .as_deref()
                .map(|id| id == signer_id)
                .unwrap_or(false)
        })
    }

    /// Recomputes overall status from the role statuses. Monotonic: the
    /// status only advances. Returns true when it changed.
    pub fn recompute_overall(&mut self, now: DateTime<Utc>) -> bool {
        let computed = if self.both_signed() {
            OverallStatus::Completed
        } else if self.parent1.status == RoleStatus::Signed
            || self.parent2.status == RoleStatus::Signed
        {
            OverallStatus::PartiallySigned
        } else if self.parent1.status == RoleStatus::Sent
            || self.parent2.status == RoleStatus::Sent
        {
            OverallStatus::Sent
        } else {
            OverallStatus::Draft
        };

        if computed.rank() <= self.overall_status.rank() {
            return false;
        }

        self.overall_status = computed;
        if computed == OverallStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        true
    }
}

/// Ephemeral lease for an in-person signing session.
///
/// Only the token hash is persisted; the plaintext is returned to the
/// caller exactly once at issuance. Never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CabinetSession {
    pub token_hash: String,
    pub document_id: Uuid,
    pub role: SignerRole,
    pub practitioner: String,
    /// Content hash of the base document at issuance, for stale-document
    /// conflict detection.
    pub document_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CabinetSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Append-only record of one completed cabinet capture. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CabinetAudit {
    pub session_token_hash: String,
    pub document_id: Uuid,
    pub role: SignerRole,
    /// Identifier of the raw signature image blob.
    pub image_id: String,
    pub image_hash: String,
    pub document_hash: String,
    pub consent_confirmed: bool,
    pub device_id: String,
    pub requester_ip: String,
    pub user_agent: Option<String>,
    pub signed_at: DateTime<Utc>,
}
