//! Initiation and the document signature state machine.
//!
//! Both completion channels funnel through
//! [`SignatureOrchestrator::apply_signature_event`]. The transition itself
//! runs inside a [`crate::store::SignatureStore::update_with`] transaction
//! so that two near-simultaneous role completions are serialized; artifact
//! capture, final assembly, and the provider purge run after the commit and
//! never revert it.

use crate::artifacts::{ArtifactPipeline, ArtifactUrls, StoredArtifacts};
use crate::cases::CaseDirectory;
use crate::error::{SignatureError, SignatureResult};
use crate::model::{
    CompletionMethod, DocumentKind, DocumentSignature, OverallStatus, RoleStatus, SignerRole,
};
use crate::notify::{SignatureInvitation, SignatureNotifier};
use crate::store::SignatureStore;
use chrono::{DateTime, Utc};
use paraphe_files::FileStore;
use paraphe_provider::{
    DeliveryMode, FieldPosition, ProviderSigner, SignatureProvider, SignerAuthMode,
    SignerEnrollment,
};
use std::sync::Arc;
use uuid::Uuid;

/// Visible signature field geometry on the derivative document.
const FIELD_WIDTH: u32 = 150;
const FIELD_HEIGHT: u32 = 56;
const FIELD_Y: u32 = 80;

/// Artifacts accompanying a signature event.
#[derive(Debug, Clone)]
pub enum SignedArtifacts {
    /// Nothing supplied; artifacts are downloaded from the provider.
    None,
    /// URLs carried by a webhook payload, preferred over the download
    /// endpoints.
    FromProvider(ArtifactUrls),
    /// Already-stored blobs, produced locally by the cabinet flow.
    Stored {
        signed_pdf_id: String,
        evidence_pdf_id: String,
    },
}

/// Outcome of the transition transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    AlreadySigned,
    RoleSigned,
    Completed,
}

pub struct SignatureOrchestrator {
    store: Arc<SignatureStore>,
    provider: Arc<dyn SignatureProvider>,
    cases: Arc<dyn CaseDirectory>,
    notifier: Arc<dyn SignatureNotifier>,
    pipeline: ArtifactPipeline,
}

impl SignatureOrchestrator {
    pub fn new(
        store: Arc<SignatureStore>,
        files: Arc<FileStore>,
        provider: Arc<dyn SignatureProvider>,
        cases: Arc<dyn CaseDirectory>,
        notifier: Arc<dyn SignatureNotifier>,
    ) -> Self {
        let pipeline = ArtifactPipeline::new(files, provider.clone());
        Self {
            store,
            provider,
            cases,
            notifier,
            pipeline,
        }
    }

    pub fn store(&self) -> &Arc<SignatureStore> {
        &self.store
    }

    /// Starts the signing workflow for a (case, kind) pair.
    ///
    /// Idempotent: if a provider request already exists the current record
    /// is returned unchanged. On first call this builds the PHI-free
    /// derivative document, enrolls both signers, activates the request,
    /// resolves hosted links through the fallback chain, persists the
    /// `sent` state, and hands invitations to the notifier.
    pub async fn initiate(
        &self,
        case_id: Uuid,
        kind: DocumentKind,
        in_person: bool,
    ) -> SignatureResult<DocumentSignature> {
        let case = self
            .cases
            .case(case_id)?
            .ok_or_else(|| SignatureError::NotFound(format!("unknown case {case_id}")))?;

        if !case.parent1.reachable() && !case.parent2.reachable() {
            return Err(SignatureError::Validation(
                "neither signer has usable contact details".into(),
            ));
        }

        let record = self.store.get_or_create(case_id, kind)?;
        if record.provider_request_id.is_some() {
            tracing::debug!(
                document_id = %record.id,
                kind = kind.code(),
                "initiation is a no-op, request already exists"
            );
            return Ok(record);
        }

        let derivative =
            paraphe_pdf::render_report(kind.title(), &kind.acknowledgement_lines()).map_err(
                |e| SignatureError::Unavailable(format!("derivative rendering failed: {e}")),
            )?;

        let request_name = format!("{} {}", kind.code(), case_id.simple());
        let request_id = self
            .provider
            .create_request(&request_name, DeliveryMode::None)
            .await
            .map_err(|e| SignatureError::provider_unavailable("request creation", e))?;
        let provider_document_id = self
            .provider
            .upload_document(&request_id, "document.pdf", &derivative)
            .await
            .map_err(|e| SignatureError::provider_unavailable("document upload", e))?;

        let auth_mode = if in_person {
            SignerAuthMode::None
        } else {
            SignerAuthMode::OtpSms
        };

        let mut enrolled: Vec<(SignerRole, ProviderSigner)> = Vec::new();
        for role in SignerRole::BOTH {
            let contact = case.contact(role);
            let enrollment = SignerEnrollment {
                first_name: contact.first_name.clone(),
                last_name: contact.last_name.clone(),
                email: contact.email.clone(),
                phone: contact.phone.clone(),
                auth_mode,
                field: field_position(role),
            };
            let signer = self
                .provider
                .add_signer(&request_id, &provider_document_id, &enrollment)
                .await
                .map_err(|e| SignatureError::provider_unavailable("signer enrollment", e))?;
            enrolled.push((role, signer));
        }

        let activated = self
            .provider
            .activate_request(&request_id)
            .await
            .map_err(|e| SignatureError::provider_unavailable("activation", e))?;

        self.resolve_links(&request_id, &mut enrolled, activated.signers)
            .await;

        let sent_at = Utc::now();
        let (won, updated) = self.store.update_with(record.id, |doc| {
            // Re-checked inside the transaction: a concurrent initiation may
            // have committed its own request since the fast-path check above.
            // The request id is set once and immutable thereafter.
            if doc.provider_request_id.is_some() {
                return Ok((false, doc.clone()));
            }
            doc.provider_request_id = Some(request_id.clone());
            for (role, signer) in &enrolled {
                let progress = doc.signer_mut(*role);
                progress.provider_signer_id = Some(signer.id.clone());
                progress.signature_link = signer.link.clone();
                progress.status = RoleStatus::Sent;
                progress.sent_at = Some(sent_at);
            }
            doc.recompute_overall(sent_at);
            Ok((true, doc.clone()))
        })?;

        if !won {
            tracing::warn!(
                document_id = %updated.id,
                request_id = %request_id,
                "lost an initiation race, abandoning the duplicate provider request"
            );
            if let Err(e) = self.provider.delete_request(&request_id, true).await {
                tracing::warn!(
                    request_id = %request_id,
                    error = %e,
                    "could not purge the abandoned provider request"
                );
            }
            return Ok(updated);
        }

        for (role, signer) in &enrolled {
            let contact = case.contact(*role);
            match signer.link.as_ref() {
                Some(link) if contact.reachable() => {
                    self.notifier.notify(&SignatureInvitation {
                        case_id,
                        document_id: updated.id,
                        kind,
                        role: *role,
                        recipient: contact.clone(),
                        link: link.clone(),
                    });
                }
                Some(_) => tracing::warn!(
                    document_id = %updated.id,
                    role = role.code(),
                    "signer has a link but no contact channel, invitation skipped"
                ),
                None => tracing::warn!(
                    document_id = %updated.id,
                    role = role.code(),
                    "no hosted link after the retrieval fallback chain"
                ),
            }
        }

        tracing::info!(
            document_id = %updated.id,
            request_id = %request_id,
            kind = kind.code(),
            in_person,
            "signature request initiated"
        );
        Ok(updated)
    }

    /// Link-retrieval fallback chain. Activation responses inconsistently
    /// include links; a signer still missing one is fetched from the signer
    /// list, then individually. A link absent after all three steps is
    /// tolerated, the signer just cannot be notified.
    async fn resolve_links(
        &self,
        request_id: &str,
        enrolled: &mut [(SignerRole, ProviderSigner)],
        activation_signers: Vec<ProviderSigner>,
    ) {
        for (_, signer) in enrolled.iter_mut() {
            if signer.link.is_none() {
                if let Some(found) = activation_signers
                    .iter()
                    .find(|s| s.id == signer.id && s.link.is_some())
                {
                    signer.link = found.link.clone();
                }
            }
        }

        if enrolled.iter().all(|(_, s)| s.link.is_some()) {
            return;
        }

        match self.provider.list_signers(request_id).await {
            Ok(listed) => {
                for (_, signer) in enrolled.iter_mut() {
                    if signer.link.is_none() {
                        if let Some(found) =
                            listed.iter().find(|s| s.id == signer.id && s.link.is_some())
                        {
                            signer.link = found.link.clone();
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(request_id, error = %e, "signer list fetch failed"),
        }

        for (role, signer) in enrolled.iter_mut() {
            if signer.link.is_some() {
                continue;
            }
            match self.provider.fetch_signer(request_id, &signer.id).await {
                Ok(found) => signer.link = found.link,
                Err(e) => tracing::warn!(
                    request_id,
                    role = role.code(),
                    error = %e,
                    "individual signer fetch failed"
                ),
            }
        }
    }

    /// Marks one role as signed and recomputes the overall status.
    ///
    /// Idempotent: a role already `signed` short-circuits with zero side
    /// effects. The transition runs inside a single read-modify-write
    /// transaction; artifact capture, final assembly, and purge follow the
    /// commit. Purge failure is logged and never alters the outcome.
    pub async fn apply_signature_event(
        &self,
        document_id: Uuid,
        role: SignerRole,
        signed_at: DateTime<Utc>,
        method: CompletionMethod,
        artifacts: SignedArtifacts,
    ) -> SignatureResult<DocumentSignature> {
        let urls = match &artifacts {
            SignedArtifacts::FromProvider(urls) => urls.clone(),
            _ => ArtifactUrls::default(),
        };
        let stored_locally = matches!(artifacts, SignedArtifacts::Stored { .. });

        let (transition, mut doc) = self.store.update_with(document_id, |doc| {
            if doc.signer(role).status == RoleStatus::Signed {
                return Ok((Transition::AlreadySigned, doc.clone()));
            }

            let progress = doc.signer_mut(role);
            progress.status = RoleStatus::Signed;
            progress.signed_at = Some(signed_at);
            progress.method = Some(method);

            if let SignedArtifacts::Stored {
                signed_pdf_id,
                evidence_pdf_id,
            } = &artifacts
            {
                doc.signed_pdf_id = Some(signed_pdf_id.clone());
                doc.evidence_pdf_id = Some(evidence_pdf_id.clone());
            }

            doc.recompute_overall(Utc::now());
            let transition = if doc.overall_status == OverallStatus::Completed {
                Transition::Completed
            } else {
                Transition::RoleSigned
            };
            Ok((transition, doc.clone()))
        })?;

        match transition {
            Transition::AlreadySigned => {
                tracing::debug!(
                    document_id = %doc.id,
                    role = role.code(),
                    "duplicate signature event ignored"
                );
                Ok(doc)
            }
            Transition::RoleSigned => {
                tracing::info!(
                    document_id = %doc.id,
                    role = role.code(),
                    status = doc.overall_status.code(),
                    "role signed"
                );
                if doc.is_remote() && !stored_locally {
                    let stored = self.pipeline.download_and_store(&doc, Some(role), &urls).await;
                    doc = self.record_artifacts(doc.id, stored)?;
                }
                Ok(doc)
            }
            Transition::Completed => {
                tracing::info!(document_id = %doc.id, "both roles signed, document completed");
                // The full capture runs for every remote document, even when
                // the final event came from the cabinet with its own stored
                // artifacts: the provider copies carry the other signer's
                // signature and the purge below makes them unretrievable.
                if doc.is_remote() {
                    let stored = self.pipeline.download_and_store(&doc, None, &urls).await;
                    doc = self.record_artifacts(doc.id, stored)?;
                }
                doc = self.refresh_final(doc)?;
                if doc.is_remote() {
                    doc = self.try_purge(doc).await?;
                }
                Ok(doc)
            }
        }
    }

    /// Re-points artifact identifiers at freshly stored blobs. Fields for
    /// artifacts that failed to download keep their previous value.
    fn record_artifacts(
        &self,
        document_id: Uuid,
        stored: StoredArtifacts,
    ) -> SignatureResult<DocumentSignature> {
        self.store.update_with(document_id, |doc| {
            if let Some(id) = &stored.signed_pdf_id {
                doc.signed_pdf_id = Some(id.clone());
            }
            if let Some(id) = &stored.evidence_pdf_id {
                doc.evidence_pdf_id = Some(id.clone());
            }
            Ok(doc.clone())
        })
    }

    /// Recomputes the final compliance PDF. Best effort: a missing base
    /// document or failed merge leaves the previous identifier in place.
    fn refresh_final(&self, doc: DocumentSignature) -> SignatureResult<DocumentSignature> {
        let base_id = match self.cases.case(doc.case_id)? {
            Some(case) => case.rendered_document(doc.kind).map(str::to_string),
            None => None,
        };
        let base_id = match base_id {
            Some(id) => id,
            None => {
                tracing::warn!(
                    document_id = %doc.id,
                    kind = doc.kind.code(),
                    "no rendered base document, final assembly skipped"
                );
                return Ok(doc);
            }
        };

        match self.pipeline.assemble_final(&doc, &base_id) {
            Some(final_id) => self.store.update_with(doc.id, |record| {
                record.final_pdf_id = Some(final_id.clone());
                Ok(record.clone())
            }),
            None => Ok(doc),
        }
    }

    /// Single purge attempt after completion. `purged_at` is set only when
    /// the provider confirmed the deletion; a failure is logged for the
    /// sweep and the manual retry path to pick up.
    async fn try_purge(&self, doc: DocumentSignature) -> SignatureResult<DocumentSignature> {
        let request_id = match doc.provider_request_id.as_deref() {
            Some(id) => id.to_string(),
            None => return Ok(doc),
        };

        match self.provider.delete_request(&request_id, true).await {
            Ok(()) => {
                let purged_at = Utc::now();
                tracing::info!(document_id = %doc.id, request_id = %request_id, "provider data purged");
                self.store.update_with(doc.id, |record| {
                    record.purged_at = Some(purged_at);
                    Ok(record.clone())
                })
            }
            Err(e) => {
                tracing::error!(
                    document_id = %doc.id,
                    request_id = %request_id,
                    error = %e,
                    "provider purge failed, flagged for manual retry"
                );
                Ok(doc)
            }
        }
    }

    /// Manual repair entry point for documents the sweep flags as
    /// unpurged. Invoked explicitly by operator tooling, never scheduled.
    pub async fn retry_purge(&self, document_id: Uuid) -> SignatureResult<DocumentSignature> {
        let doc = self.store.load_by_document(document_id)?.ok_or_else(|| {
            SignatureError::NotFound(format!("no signature record for document {document_id}"))
        })?;

        if doc.overall_status != OverallStatus::Completed {
            return Err(SignatureError::Conflict(
                "purge applies to completed documents only".into(),
            ));
        }
        let request_id = doc.provider_request_id.clone().ok_or_else(|| {
            SignatureError::Validation(
                "document was completed in person, nothing to purge".into(),
            )
        })?;
        if doc.purged_at.is_some() {
            return Ok(doc);
        }

        self.provider
            .delete_request(&request_id, true)
            .await
            .map_err(|e| SignatureError::provider_unavailable("purge", e))?;

        let purged_at = Utc::now();
        self.store.update_with(document_id, |record| {
            record.purged_at = Some(purged_at);
            Ok(record.clone())
        })
    }

    /// Re-reads provider-side state for a request and folds it into the
    /// record: refreshes missing links and applies signed transitions for
    /// signers the provider reports as done. Used when a webhook cannot be
    /// attributed to a specific role.
    pub async fn poll_and_refresh(&self, request_id: &str) -> SignatureResult<DocumentSignature> {
        let doc = self.store.load_by_request(request_id)?.ok_or_else(|| {
            SignatureError::NotFound(format!("no signature record for request {request_id}"))
        })?;

        let signers = self
            .provider
            .list_signers(request_id)
            .await
            .map_err(|e| SignatureError::provider_unavailable("signer poll", e))?;

        let mut current = self.store.update_with(doc.id, |record| {
            for signer in &signers {
                if let Some(role) = record.role_for_provider_signer(&signer.id) {
                    let progress = record.signer_mut(role);
                    if progress.signature_link.is_none() && signer.link.is_some() {
                        progress.signature_link = signer.link.clone();
                    }
                }
            }
            Ok(record.clone())
        })?;

        for signer in &signers {
            if !signer_reports_signed(signer.status.as_deref()) {
                continue;
            }
            let role = match current.role_for_provider_signer(&signer.id) {
                Some(role) => role,
                None => {
                    tracing::warn!(
                        request_id,
                        signer_id = %signer.id,
                        "provider reports an unknown signer as signed"
                    );
                    continue;
                }
            };
            if current.signer(role).status != RoleStatus::Signed {
                current = self
                    .apply_signature_event(
                        current.id,
                        role,
                        Utc::now(),
                        CompletionMethod::Remote,
                        SignedArtifacts::None,
                    )
                    .await?;
            }
        }

        Ok(current)
    }
}

fn signer_reports_signed(status: Option<&str>) -> bool {
    matches!(status, Some("done") | Some("signed") | Some("success"))
}

fn field_position(role: SignerRole) -> FieldPosition {
    let x = match role {
        SignerRole::Parent1 => 60,
        SignerRole::Parent2 => 320,
    };
    FieldPosition {
        page: 1,
        x,
        y: FIELD_Y,
        width: FIELD_WIDTH,
        height: FIELD_HEIGHT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;
    use async_trait::async_trait;
    use paraphe_provider::{ActivatedRequest, MockProvider, ProviderError};

    #[tokio::test]
    async fn initiate_unknown_case_is_not_found() {
        let fx = Fixture::new();
        let result = fx
            .orchestrator
            .initiate(Uuid::new_v4(), DocumentKind::Consent, false)
            .await;
        assert!(matches!(result, Err(SignatureError::NotFound(_))));
    }

    #[tokio::test]
    async fn initiate_without_any_contact_is_rejected() {
        let fx = Fixture::new();
        let case = fx.seed_unreachable_case();
        let result = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await;
        assert!(matches!(result, Err(SignatureError::Validation(_))));
    }

    #[tokio::test]
    async fn initiate_sends_both_invitations() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Consent]);

        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();

        assert_eq!(doc.overall_status, OverallStatus::Sent);
        assert!(doc.provider_request_id.is_some());
        for role in SignerRole::BOTH {
            let progress = doc.signer(role);
            assert_eq!(progress.status, RoleStatus::Sent);
            assert!(progress.signature_link.is_some());
            assert!(progress.sent_at.is_some());
        }
        assert_eq!(fx.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn initiate_is_idempotent() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Fees]);

        let first = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Fees, false)
            .await
            .unwrap();
        let second = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Fees, false)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.provider_request_id, second.provider_request_id);
        // No second round of invitations.
        assert_eq!(fx.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn remote_flow_completes_with_one_purge_and_all_artifacts() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Consent]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();
        let request_id = doc.provider_request_id.clone().unwrap();

        let after_first = fx
            .orchestrator
            .apply_signature_event(
                doc.id,
                SignerRole::Parent1,
                Utc::now(),
                CompletionMethod::Remote,
                SignedArtifacts::None,
            )
            .await
            .unwrap();
        assert_eq!(after_first.overall_status, OverallStatus::PartiallySigned);
        assert_eq!(fx.provider.purge_attempts(&request_id), 0);

        let after_second = fx
            .orchestrator
            .apply_signature_event(
                doc.id,
                SignerRole::Parent2,
                Utc::now(),
                CompletionMethod::Remote,
                SignedArtifacts::None,
            )
            .await
            .unwrap();

        assert_eq!(after_second.overall_status, OverallStatus::Completed);
        assert!(after_second.completed_at.is_some());
        assert!(after_second.signed_pdf_id.is_some());
        assert!(after_second.evidence_pdf_id.is_some());
        assert!(after_second.final_pdf_id.is_some());
        assert!(after_second.purged_at.is_some());
        assert_eq!(fx.provider.purge_attempts(&request_id), 1);
    }

    #[tokio::test]
    async fn duplicate_events_change_nothing_and_download_nothing() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Consent]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();

        let signed_at = Utc::now();
        let first = fx
            .orchestrator
            .apply_signature_event(
                doc.id,
                SignerRole::Parent1,
                signed_at,
                CompletionMethod::Remote,
                SignedArtifacts::None,
            )
            .await
            .unwrap();
        let downloads_after_first = fx.provider.download_calls();

        let second = fx
            .orchestrator
            .apply_signature_event(
                doc.id,
                SignerRole::Parent1,
                Utc::now(),
                CompletionMethod::Remote,
                SignedArtifacts::None,
            )
            .await
            .unwrap();

        assert_eq!(
            first.signer(SignerRole::Parent1).signed_at,
            second.signer(SignerRole::Parent1).signed_at
        );
        assert_eq!(second.overall_status, OverallStatus::PartiallySigned);
        assert_eq!(fx.provider.download_calls(), downloads_after_first);
    }

    #[tokio::test]
    async fn retry_purge_rejects_incomplete_documents() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Fees]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Fees, false)
            .await
            .unwrap();

        let result = fx.orchestrator.retry_purge(doc.id).await;
        assert!(matches!(result, Err(SignatureError::Conflict(_))));
    }

    /// Provider that commits a rival request id to the record during
    /// activation, landing between the fast-path idempotency check and the
    /// commit the way a concurrent initiation would.
    struct RivalCommitDuringActivation {
        inner: MockProvider,
        created: std::sync::Mutex<Option<String>>,
        target: std::sync::Mutex<Option<(Arc<SignatureStore>, Uuid)>>,
    }

    impl RivalCommitDuringActivation {
        fn new() -> Self {
            Self {
                inner: MockProvider::new(),
                created: std::sync::Mutex::new(None),
                target: std::sync::Mutex::new(None),
            }
        }

        fn arm(&self, store: Arc<SignatureStore>, document_id: Uuid) {
            *self.target.lock().unwrap() = Some((store, document_id));
        }
    }

    #[async_trait]
    impl SignatureProvider for RivalCommitDuringActivation {
        async fn create_request(
            &self,
            name: &str,
            delivery: DeliveryMode,
        ) -> Result<String, ProviderError> {
            let id = self.inner.create_request(name, delivery).await?;
            *self.created.lock().unwrap() = Some(id.clone());
            Ok(id)
        }

        async fn upload_document(
            &self,
            request_id: &str,
            filename: &str,
            pdf: &[u8],
        ) -> Result<String, ProviderError> {
            self.inner.upload_document(request_id, filename, pdf).await
        }

        async fn add_signer(
            &self,
            request_id: &str,
            document_id: &str,
            enrollment: &SignerEnrollment,
        ) -> Result<ProviderSigner, ProviderError> {
            self.inner.add_signer(request_id, document_id, enrollment).await
        }

        async fn activate_request(
            &self,
            request_id: &str,
        ) -> Result<ActivatedRequest, ProviderError> {
            let target = self.target.lock().unwrap().clone();
            if let Some((store, document_id)) = target {
                store
                    .update_with(document_id, |doc| {
                        doc.provider_request_id = Some("req-rival".to_string());
                        Ok(())
                    })
                    .unwrap();
            }
            self.inner.activate_request(request_id).await
        }

        async fn list_signers(
            &self,
            request_id: &str,
        ) -> Result<Vec<ProviderSigner>, ProviderError> {
            self.inner.list_signers(request_id).await
        }

        async fn fetch_signer(
            &self,
            request_id: &str,
            signer_id: &str,
        ) -> Result<ProviderSigner, ProviderError> {
            self.inner.fetch_signer(request_id, signer_id).await
        }

        async fn download_signed_document(
            &self,
            request_id: &str,
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.download_signed_document(request_id).await
        }

        async fn download_audit_trail(
            &self,
            request_id: &str,
            signer_id: Option<&str>,
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.download_audit_trail(request_id, signer_id).await
        }

        async fn download_url(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
            self.inner.download_url(url).await
        }

        async fn delete_request(
            &self,
            request_id: &str,
            permanent: bool,
        ) -> Result<(), ProviderError> {
            self.inner.delete_request(request_id, permanent).await
        }

        async fn request_exists(&self, request_id: &str) -> Result<bool, ProviderError> {
            self.inner.request_exists(request_id).await
        }
    }

    #[tokio::test]
    async fn initiation_race_keeps_the_first_request_id() {
        let provider = Arc::new(RivalCommitDuringActivation::new());
        let fx = Fixture::with_provider(provider.clone());
        let case = fx.seed_case(&[DocumentKind::Consent]);
        let record = fx.store.get_or_create(case.id, DocumentKind::Consent).unwrap();
        provider.arm(fx.store.clone(), record.id);

        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();

        // The earlier commit wins; this call's freshly created request is
        // abandoned, purged, and never announced to the signers.
        assert_eq!(doc.provider_request_id.as_deref(), Some("req-rival"));
        let abandoned = provider.created.lock().unwrap().clone().unwrap();
        assert_eq!(provider.inner.purge_attempts(&abandoned), 1);
        assert!(fx.notifier.sent().is_empty());
    }

    /// Provider whose activation and signer list omit links, forcing the
    /// fallback chain down to individual signer fetches.
    struct LinklessUntilFetched;

    #[async_trait]
    impl SignatureProvider for LinklessUntilFetched {
        async fn create_request(
            &self,
            _name: &str,
            _delivery: DeliveryMode,
        ) -> Result<String, ProviderError> {
            Ok("req-linkless".to_string())
        }

        async fn upload_document(
            &self,
            _request_id: &str,
            _filename: &str,
            _pdf: &[u8],
        ) -> Result<String, ProviderError> {
            Ok("doc-linkless".to_string())
        }

        async fn add_signer(
            &self,
            _request_id: &str,
            _document_id: &str,
            enrollment: &SignerEnrollment,
        ) -> Result<ProviderSigner, ProviderError> {
            Ok(ProviderSigner {
                id: format!("sig-{}", enrollment.first_name.to_lowercase()),
                link: None,
                status: Some("initiated".to_string()),
            })
        }

        async fn activate_request(
            &self,
            _request_id: &str,
        ) -> Result<ActivatedRequest, ProviderError> {
            Ok(ActivatedRequest { signers: Vec::new() })
        }

        async fn list_signers(
            &self,
            _request_id: &str,
        ) -> Result<Vec<ProviderSigner>, ProviderError> {
            Ok(Vec::new())
        }

        async fn fetch_signer(
            &self,
            request_id: &str,
            signer_id: &str,
        ) -> Result<ProviderSigner, ProviderError> {
            Ok(ProviderSigner {
                id: signer_id.to_string(),
                link: Some(format!("https://esign.invalid/{request_id}/{signer_id}")),
                status: Some("notified".to_string()),
            })
        }

        async fn download_signed_document(
            &self,
            _request_id: &str,
        ) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::NotConfigured)
        }

        async fn download_audit_trail(
            &self,
            _request_id: &str,
            _signer_id: Option<&str>,
        ) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::NotConfigured)
        }

        async fn download_url(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::NotConfigured)
        }

        async fn delete_request(
            &self,
            _request_id: &str,
            _permanent: bool,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn request_exists(&self, _request_id: &str) -> Result<bool, ProviderError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn link_fallback_reaches_individual_signer_fetch() {
        let fx = Fixture::with_provider(Arc::new(LinklessUntilFetched));
        let case = fx.seed_case(&[DocumentKind::Authorization]);

        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Authorization, false)
            .await
            .unwrap();

        for role in SignerRole::BOTH {
            let link = doc.signer(role).signature_link.as_deref().unwrap();
            assert!(link.starts_with("https://esign.invalid/req-linkless/"));
        }
    }
}
