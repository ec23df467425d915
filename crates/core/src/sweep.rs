//! Read-only integrity audit over signature records.
//!
//! Run periodically by an external scheduler or on demand by an operator.
//! Produces five independent anomaly classes and performs no writes; repair
//! belongs to manual tooling such as
//! [`crate::orchestrator::SignatureOrchestrator::retry_purge`].

use crate::config::SignConfig;
use crate::error::SignatureResult;
use crate::model::{ArtifactKind, DocumentKind, DocumentSignature, OverallStatus};
use crate::store::SignatureStore;
use chrono::{DateTime, Utc};
use paraphe_files::FileStore;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// One anomaly on one record.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub document_id: Uuid,
    pub case_id: Uuid,
    pub kind: DocumentKind,
    pub detail: String,
}

impl Finding {
    fn on(doc: &DocumentSignature, detail: String) -> Self {
        Self {
            document_id: doc.id,
            case_id: doc.case_id,
            kind: doc.kind,
            detail,
        }
    }
}

/// Sweep output, one list per anomaly class.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Completed records missing an artifact identifier.
    pub missing_identifiers: Vec<Finding>,
    /// Artifact identifiers whose blob is absent from storage.
    pub missing_blobs: Vec<Finding>,
    /// Completed remote records never purged past the threshold age.
    pub unpurged: Vec<Finding>,
    /// Partially signed records stuck past the threshold age.
    pub stuck_partial: Vec<Finding>,
    /// Stored final PDFs failing the magic-header check.
    pub corrupt_finals: Vec<Finding>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.missing_identifiers.is_empty()
            && self.missing_blobs.is_empty()
            && self.unpurged.is_empty()
            && self.stuck_partial.is_empty()
            && self.corrupt_finals.is_empty()
    }
}

pub struct VerificationSweep {
    store: Arc<SignatureStore>,
    files: Arc<FileStore>,
    config: Arc<SignConfig>,
}

impl VerificationSweep {
    pub fn new(store: Arc<SignatureStore>, files: Arc<FileStore>, config: Arc<SignConfig>) -> Self {
        Self {
            store,
            files,
            config,
        }
    }

    /// Audits every record against `now`.
    pub fn run(&self, now: DateTime<Utc>) -> SignatureResult<SweepReport> {
        let mut report = SweepReport::default();

        for doc in self.store.list_all()? {
            match doc.overall_status {
                OverallStatus::Completed => self.audit_completed(&doc, now, &mut report),
                OverallStatus::PartiallySigned => {
                    let age_limit = now - self.config.stuck_partial_after();
                    if doc.updated_at < age_limit {
                        report.stuck_partial.push(Finding::on(
                            &doc,
                            format!("partially signed since {}", doc.updated_at),
                        ));
                    }
                }
                OverallStatus::Draft | OverallStatus::Sent => {}
            }
        }

        if !report.is_clean() {
            tracing::warn!(
                missing_identifiers = report.missing_identifiers.len(),
                missing_blobs = report.missing_blobs.len(),
                unpurged = report.unpurged.len(),
                stuck_partial = report.stuck_partial.len(),
                corrupt_finals = report.corrupt_finals.len(),
                "verification sweep found anomalies"
            );
        }
        Ok(report)
    }

    fn audit_completed(
        &self,
        doc: &DocumentSignature,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let artifacts = [
            (ArtifactKind::Signed, &doc.signed_pdf_id, "signed PDF"),
            (ArtifactKind::Evidence, &doc.evidence_pdf_id, "evidence PDF"),
            (ArtifactKind::Final, &doc.final_pdf_id, "final PDF"),
        ];

        for (kind, id, label) in artifacts {
            match id.as_deref() {
                None => report.missing_identifiers.push(Finding::on(
                    doc,
                    format!("completed record has no {label} identifier"),
                )),
                Some(id) => {
                    if !self.files.exists(&kind.category(doc.kind), id) {
                        report.missing_blobs.push(Finding::on(
                            doc,
                            format!("{label} blob {id} is missing from storage"),
                        ));
                    }
                }
            }
        }

        if doc.is_remote() && doc.purged_at.is_none() {
            let completed_at = doc.completed_at.unwrap_or(doc.updated_at);
            if completed_at < now - self.config.unpurged_after() {
                report.unpurged.push(Finding::on(
                    doc,
                    format!("provider request not purged since completion at {completed_at}"),
                ));
            }
        }

        if let Some(final_id) = doc.final_pdf_id.as_deref() {
            match self
                .files
                .load(&ArtifactKind::Final.category(doc.kind), final_id)
            {
                Ok(Some(bytes)) => {
                    if !paraphe_pdf::has_pdf_magic(&bytes) {
                        report.corrupt_finals.push(Finding::on(
                            doc,
                            format!("final PDF {final_id} fails the magic-header check"),
                        ));
                    }
                }
                // Absence already lands in missing_blobs.
                Ok(None) => {}
                Err(e) => report.corrupt_finals.push(Finding::on(
                    doc,
                    format!("final PDF {final_id} is unreadable: {e}"),
                )),
            }
        }
    }
}
