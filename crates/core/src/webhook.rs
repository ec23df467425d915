//! Provider webhook reconciliation.
//!
//! Delivery is at-least-once, so duplicates and out-of-order arrival are
//! normal. Processing never raises past this boundary: anything the event
//! cannot be mapped to is logged and acknowledged so the provider does not
//! retry forever.

use crate::artifacts::ArtifactUrls;
use crate::error::SignatureError;
use crate::model::CompletionMethod;
use crate::orchestrator::{SignatureOrchestrator, SignedArtifacts};
use crate::store::SignatureStore;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

/// Inbound provider event. The provider owns this schema, so parsing is
/// tolerant: unknown fields are ignored and every part is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub signature_request: Option<EventResource>,
    #[serde(default)]
    pub signer: Option<EventResource>,
    #[serde(default)]
    pub signed_file_url: Option<String>,
    #[serde(default)]
    pub evidence_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventResource {
    #[serde(default)]
    pub id: Option<String>,
}

/// What the reconciler did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A signer-signed transition was applied.
    Applied,
    /// The event could not be attributed to one role; provider-side state
    /// was polled and folded in instead.
    Refreshed,
    /// Unknown request, unknown event class, or unusable payload.
    Ignored,
}

pub struct WebhookReconciler {
    store: Arc<SignatureStore>,
    orchestrator: Arc<SignatureOrchestrator>,
}

impl WebhookReconciler {
    pub fn new(store: Arc<SignatureStore>, orchestrator: Arc<SignatureOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Maps one event onto the state machine. Idempotent and infallible;
    /// every failure path degrades to [`WebhookOutcome::Ignored`] with a
    /// log entry.
    pub async fn process(&self, event: ProviderEvent) -> WebhookOutcome {
        let event_name = event.event_name.as_deref().unwrap_or("");
        let request_id = match event
            .signature_request
            .as_ref()
            .and_then(|r| r.id.as_deref())
        {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!(event_name, "webhook event carries no request id, ignored");
                return WebhookOutcome::Ignored;
            }
        };

        let doc = match self.store.load_by_request(&request_id) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                tracing::info!(
                    event_name,
                    request_id = %request_id,
                    "webhook event for an unknown request, ignored"
                );
                return WebhookOutcome::Ignored;
            }
            Err(e) => {
                tracing::error!(
                    event_name,
                    request_id = %request_id,
                    error = %e,
                    "webhook lookup failed, event ignored"
                );
                return WebhookOutcome::Ignored;
            }
        };

        if is_signer_signed_event(event_name) {
            let signer_id = event.signer.as_ref().and_then(|s| s.id.as_deref());
            let role = signer_id.and_then(|id| doc.role_for_provider_signer(id));

            match role {
                Some(role) => {
                    let urls = ArtifactUrls {
                        signed_file_url: event.signed_file_url.clone(),
                        evidence_url: event.evidence_url.clone(),
                    };
                    match self
                        .orchestrator
                        .apply_signature_event(
                            doc.id,
                            role,
                            Utc::now(),
                            CompletionMethod::Remote,
                            SignedArtifacts::FromProvider(urls),
                        )
                        .await
                    {
                        Ok(_) => WebhookOutcome::Applied,
                        Err(e) => self.log_and_ignore(event_name, &request_id, e),
                    }
                }
                None => {
                    tracing::info!(
                        event_name,
                        request_id = %request_id,
                        signer_id = signer_id.unwrap_or("<absent>"),
                        "signer could not be mapped to a role, polling request state"
                    );
                    self.refresh(event_name, &request_id).await
                }
            }
        } else if is_request_completed_event(event_name) {
            self.refresh(event_name, &request_id).await
        } else {
            tracing::debug!(event_name, request_id = %request_id, "uninteresting event class");
            WebhookOutcome::Ignored
        }
    }

    async fn refresh(&self, event_name: &str, request_id: &str) -> WebhookOutcome {
        match self.orchestrator.poll_and_refresh(request_id).await {
            Ok(_) => WebhookOutcome::Refreshed,
            Err(e) => self.log_and_ignore(event_name, request_id, e),
        }
    }

    fn log_and_ignore(
        &self,
        event_name: &str,
        request_id: &str,
        error: SignatureError,
    ) -> WebhookOutcome {
        tracing::error!(
            event_name,
            request_id = %request_id,
            error = %error,
            "webhook reconciliation failed, event acknowledged anyway"
        );
        WebhookOutcome::Ignored
    }
}

fn is_signer_signed_event(name: &str) -> bool {
    name.starts_with("signer.") && (name.ends_with(".done") || name.ends_with(".signed"))
}

fn is_request_completed_event(name: &str) -> bool {
    name.starts_with("signature_request.")
        && (name.ends_with(".done") || name.ends_with(".completed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentKind, OverallStatus, RoleStatus, SignerRole};
    use crate::testutil::Fixture;

    fn signer_done(request_id: &str, signer_id: &str) -> ProviderEvent {
        serde_json::from_value(serde_json::json!({
            "event_name": "signer.done",
            "signature_request": { "id": request_id, "status": "ongoing" },
            "signer": { "id": signer_id, "extra": true },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn signer_done_applies_the_matching_role() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Consent]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();
        let request_id = doc.provider_request_id.clone().unwrap();
        let signer1 = doc
            .signer(SignerRole::Parent1)
            .provider_signer_id
            .clone()
            .unwrap();

        let outcome = fx
            .reconciler()
            .process(signer_done(&request_id, &signer1))
            .await;
        assert_eq!(outcome, WebhookOutcome::Applied);

        let updated = fx.store.load_by_document(doc.id).unwrap().unwrap();
        assert_eq!(updated.signer(SignerRole::Parent1).status, RoleStatus::Signed);
        assert_eq!(updated.overall_status, OverallStatus::PartiallySigned);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_no_op() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Consent]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();
        let request_id = doc.provider_request_id.clone().unwrap();
        let signer1 = doc
            .signer(SignerRole::Parent1)
            .provider_signer_id
            .clone()
            .unwrap();
        let reconciler = fx.reconciler();

        reconciler.process(signer_done(&request_id, &signer1)).await;
        let after_first = fx.store.load_by_document(doc.id).unwrap().unwrap();
        let downloads = fx.provider.download_calls();

        reconciler.process(signer_done(&request_id, &signer1)).await;
        let after_second = fx.store.load_by_document(doc.id).unwrap().unwrap();

        assert_eq!(
            after_first.signer(SignerRole::Parent1).signed_at,
            after_second.signer(SignerRole::Parent1).signed_at
        );
        assert_eq!(after_second.overall_status, OverallStatus::PartiallySigned);
        assert_eq!(fx.provider.download_calls(), downloads);
    }

    #[tokio::test]
    async fn both_signers_complete_the_document() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Consent]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();
        let request_id = doc.provider_request_id.clone().unwrap();
        let reconciler = fx.reconciler();

        for role in SignerRole::BOTH {
            let signer_id = doc.signer(role).provider_signer_id.clone().unwrap();
            let outcome = reconciler.process(signer_done(&request_id, &signer_id)).await;
            assert_eq!(outcome, WebhookOutcome::Applied);
        }

        let updated = fx.store.load_by_document(doc.id).unwrap().unwrap();
        assert_eq!(updated.overall_status, OverallStatus::Completed);
        assert_eq!(fx.provider.purge_attempts(&request_id), 1);
    }

    #[tokio::test]
    async fn unknown_request_is_acknowledged_and_ignored() {
        let fx = Fixture::new();
        let outcome = fx
            .reconciler()
            .process(signer_done("req-never-seen", "sig-x"))
            .await;
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn unknown_signer_falls_back_to_polling() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Fees]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Fees, false)
            .await
            .unwrap();
        let request_id = doc.provider_request_id.clone().unwrap();

        let outcome = fx
            .reconciler()
            .process(signer_done(&request_id, "sig-unrecognized"))
            .await;
        assert_eq!(outcome, WebhookOutcome::Refreshed);

        // The poll found nobody newly signed; state is unchanged.
        let updated = fx.store.load_by_document(doc.id).unwrap().unwrap();
        assert_eq!(updated.overall_status, OverallStatus::Sent);
    }

    #[tokio::test]
    async fn request_completed_event_triggers_a_refresh() {
        let fx = Fixture::new();
        let case = fx.seed_case(&[DocumentKind::Consent]);
        let doc = fx
            .orchestrator
            .initiate(case.id, DocumentKind::Consent, false)
            .await
            .unwrap();
        let request_id = doc.provider_request_id.clone().unwrap();

        let event: ProviderEvent = serde_json::from_value(serde_json::json!({
            "event_name": "signature_request.done",
            "signature_request": { "id": request_id },
        }))
        .unwrap();
        let outcome = fx.reconciler().process(event).await;
        assert_eq!(outcome, WebhookOutcome::Refreshed);
    }

    #[tokio::test]
    async fn malformed_payloads_are_ignored() {
        let fx = Fixture::new();
        let event: ProviderEvent =
            serde_json::from_value(serde_json::json!({ "event_name": "signer.done" })).unwrap();
        assert_eq!(fx.reconciler().process(event).await, WebhookOutcome::Ignored);

        let event: ProviderEvent = serde_json::from_value(serde_json::json!({
            "unrelated": {"nested": [1, 2, 3]},
        }))
        .unwrap();
        assert_eq!(fx.reconciler().process(event).await, WebhookOutcome::Ignored);
    }
}
