//! Artifact pipeline: download signed and evidence PDFs from the provider,
//! store them as content-addressed blobs, and assemble the final compliance
//! PDF.
//!
//! Everything here is best effort. Download and storage failures are logged
//! with enough context for the verification sweep or a manual repair script
//! to find them, and never propagate to the state machine.

use crate::model::{ArtifactKind, DocumentSignature, SignerRole};
use paraphe_files::FileStore;
use paraphe_provider::SignatureProvider;
use std::sync::Arc;

/// Artifact URLs carried by a webhook payload. When present they are
/// preferred over the request-level download endpoints.
#[derive(Debug, Clone, Default)]
pub struct ArtifactUrls {
    pub signed_file_url: Option<String>,
    pub evidence_url: Option<String>,
}

/// Identifiers of freshly stored artifacts. `None` means that artifact
/// could not be captured this time; an existing identifier on the record
/// is left alone in that case.
#[derive(Debug, Clone, Default)]
pub struct StoredArtifacts {
    pub signed_pdf_id: Option<String>,
    pub evidence_pdf_id: Option<String>,
}

pub struct ArtifactPipeline {
    files: Arc<FileStore>,
    provider: Arc<dyn SignatureProvider>,
}

impl ArtifactPipeline {
    pub fn new(files: Arc<FileStore>, provider: Arc<dyn SignatureProvider>) -> Self {
        Self { files, provider }
    }

    /// Downloads the signed document and the audit trail for a document and
    /// stores both. With a `role_hint` the audit trail is fetched for that
    /// signer only (partial capture); without one it covers all signers.
    ///
    /// Never fails: each artifact that cannot be fetched or stored is
    /// logged and reported as `None`.
    pub async fn download_and_store(
        &self,
        document: &DocumentSignature,
        role_hint: Option<SignerRole>,
        urls: &ArtifactUrls,
    ) -> StoredArtifacts {
        let request_id = match document.provider_request_id.as_deref() {
            Some(id) => id,
            None => {
                tracing::warn!(
                    document_id = %document.id,
                    "artifact download requested for a document without a provider request"
                );
                return StoredArtifacts::default();
            }
        };

        let signed_bytes = match urls.signed_file_url.as_deref() {
            Some(url) => self.provider.download_url(url).await,
            None => self.provider.download_signed_document(request_id).await,
        };
        let signed_pdf_id = match signed_bytes {
            Ok(bytes) => self.store(document, ArtifactKind::Signed, "signed.pdf", &bytes),
            Err(e) => {
                tracing::warn!(
                    document_id = %document.id,
                    request_id,
                    error = %e,
                    "failed to download signed document"
                );
                None
            }
        };

        let signer_hint = role_hint
            .and_then(|role| document.signer(role).provider_signer_id.clone());
        let evidence_bytes = match urls.evidence_url.as_deref() {
            Some(url) => self.provider.download_url(url).await,
            None => {
                self.provider
                    .download_audit_trail(request_id, signer_hint.as_deref())
                    .await
            }
        };
        let evidence_pdf_id = match evidence_bytes {
            Ok(bytes) => self.store(document, ArtifactKind::Evidence, "evidence.pdf", &bytes),
            Err(e) => {
                tracing::warn!(
                    document_id = %document.id,
                    request_id,
                    error = %e,
                    "failed to download audit trail"
                );
                None
            }
        };

        StoredArtifacts {
            signed_pdf_id,
            evidence_pdf_id,
        }
    }

    /// Merges base document, evidence PDF, and signed overlay, in that
    /// order, skipping whatever is missing. Requires the base document;
    /// returns `None` without side effects when it is absent.
    ///
    /// The final artifact is recomputed on every call because its inputs
    /// may have changed; the returned identifier is always fresh.
    pub fn assemble_final(
        &self,
        document: &DocumentSignature,
        base_document_id: &str,
    ) -> Option<String> {
        let base = match self.load(document, ArtifactKind::Base, base_document_id) {
            Some(bytes) => bytes,
            None => {
                tracing::warn!(
                    document_id = %document.id,
                    base_document_id,
                    "final assembly skipped, base document blob is missing"
                );
                return None;
            }
        };

        let mut parts = vec![base];
        for (kind, id, label) in [
            (ArtifactKind::Evidence, &document.evidence_pdf_id, "evidence"),
            (ArtifactKind::Signed, &document.signed_pdf_id, "signed overlay"),
        ] {
            match id.as_deref() {
                Some(id) => match self.load(document, kind, id) {
                    Some(bytes) => parts.push(bytes),
                    None => tracing::warn!(
                        document_id = %document.id,
                        artifact_id = id,
                        "final assembly continues without {label}, blob is missing"
                    ),
                },
                None => tracing::debug!(
                    document_id = %document.id,
                    "final assembly continues without {label}"
                ),
            }
        }

        let merged = match paraphe_pdf::merge(&parts) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(
                    document_id = %document.id,
                    error = %e,
                    "final PDF assembly failed"
                );
                return None;
            }
        };

        self.store(document, ArtifactKind::Final, "final.pdf", &merged)
    }

    fn store(
        &self,
        document: &DocumentSignature,
        kind: ArtifactKind,
        hint: &str,
        bytes: &[u8],
    ) -> Option<String> {
        let category = kind.category(document.kind);
        match self.files.save(&category, hint, bytes) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(
                    document_id = %document.id,
                    category,
                    error = %e,
                    "failed to store artifact"
                );
                None
            }
        }
    }

    fn load(
        &self,
        document: &DocumentSignature,
        kind: ArtifactKind,
        id: &str,
    ) -> Option<Vec<u8>> {
        let category = kind.category(document.kind);
        match self.files.load(&category, id) {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(
                    document_id = %document.id,
                    category,
                    artifact_id = id,
                    error = %e,
                    "failed to load artifact"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentKind;
    use paraphe_provider::MockProvider;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn pipeline() -> (TempDir, Arc<FileStore>, Arc<MockProvider>, ArtifactPipeline) {
        let dir = TempDir::new().unwrap();
        let files = Arc::new(FileStore::new(dir.path()).unwrap());
        let provider = Arc::new(MockProvider::new());
        let pipeline = ArtifactPipeline::new(files.clone(), provider.clone());
        (dir, files, provider, pipeline)
    }

    fn remote_document(request_id: &str) -> DocumentSignature {
        let mut doc = DocumentSignature::new(Uuid::new_v4(), DocumentKind::Consent);
        doc.provider_request_id = Some(request_id.to_string());
        doc
    }

    #[tokio::test]
    async fn download_and_store_captures_both_artifacts() {
        let (_dir, files, provider, pipeline) = pipeline();
        let request_id = provider
            .create_request("consent", paraphe_provider::DeliveryMode::None)
            .await
            .unwrap();
        let doc = remote_document(&request_id);

        let stored = pipeline
            .download_and_store(&doc, None, &ArtifactUrls::default())
            .await;

        let signed_id = stored.signed_pdf_id.unwrap();
        let evidence_id = stored.evidence_pdf_id.unwrap();
        assert!(files.exists("consent-signed", &signed_id));
        assert!(files.exists("consent-evidence", &evidence_id));
    }

    #[tokio::test]
    async fn download_failures_are_reported_as_none() {
        let (_dir, _files, provider, pipeline) = pipeline();
        let request_id = provider
            .create_request("consent", paraphe_provider::DeliveryMode::None)
            .await
            .unwrap();
        provider.delete_request(&request_id, true).await.unwrap();

        let doc = remote_document(&request_id);
        let stored = pipeline
            .download_and_store(&doc, None, &ArtifactUrls::default())
            .await;
        assert!(stored.signed_pdf_id.is_none());
        assert!(stored.evidence_pdf_id.is_none());
    }

    #[tokio::test]
    async fn assemble_final_with_base_and_signed_only() {
        let (_dir, files, _provider, pipeline) = pipeline();
        let mut doc = remote_document("req");

        let base = paraphe_pdf::render_report("Consent", &["body".to_string()]).unwrap();
        let signed = paraphe_pdf::render_report("Signed", &["overlay".to_string()]).unwrap();
        let base_id = files.save("consent-base", "base.pdf", &base).unwrap();
        doc.signed_pdf_id = Some(files.save("consent-signed", "signed.pdf", &signed).unwrap());

        let final_id = pipeline.assemble_final(&doc, &base_id).unwrap();
        let final_bytes = files.load("consent-final", &final_id).unwrap().unwrap();
        assert!(paraphe_pdf::has_pdf_magic(&final_bytes));
    }

    #[tokio::test]
    async fn assemble_final_requires_the_base_document() {
        let (_dir, _files, _provider, pipeline) = pipeline();
        let doc = remote_document("req");
        assert!(pipeline.assemble_final(&doc, "0".repeat(64).as_str()).is_none());
    }

    #[tokio::test]
    async fn reassembly_reuses_identifier_only_for_identical_inputs() {
        let (_dir, files, _provider, pipeline) = pipeline();
        let mut doc = remote_document("req");

        let base = paraphe_pdf::render_report("Consent", &["body".to_string()]).unwrap();
        let base_id = files.save("consent-base", "base.pdf", &base).unwrap();

        let first = pipeline.assemble_final(&doc, &base_id).unwrap();

        let signed = paraphe_pdf::render_report("Signed", &["overlay".to_string()]).unwrap();
        doc.signed_pdf_id = Some(files.save("consent-signed", "signed.pdf", &signed).unwrap());
        let second = pipeline.assemble_final(&doc, &base_id).unwrap();

        // Content addressing: a different input set yields a new identifier.
        assert_ne!(first, second);
    }
}
