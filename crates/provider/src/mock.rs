//! Deterministic provider stand-in for unconfigured environments.
//!
//! Selected at construction when no provider credential is present.
//! Identifiers and links are derived from the inputs, so repeated runs
//! produce identical values and every state transition can be exercised
//! locally without network access. The mock records enrollments and purge
//! calls so tests can assert on provider-side effects.

use crate::{
    ActivatedRequest, DeliveryMode, ProviderError, ProviderSigner, SignatureProvider,
    SignerEnrollment,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    /// Enrolled signers per request id, in enrollment order.
    signers: HashMap<String, Vec<ProviderSigner>>,
    /// Purge call count per request id.
    purges: HashMap<String, usize>,
    /// Download call count across all requests.
    downloads: usize,
}

/// Pure-local [`SignatureProvider`] with deterministic identifiers.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short stable digest used to derive identifiers from inputs.
    fn short_digest(input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hex::encode(&hasher.finalize()[..6])
    }

    /// Number of purge calls recorded for a request.
    pub fn purge_attempts(&self, request_id: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.purges.get(request_id).copied().unwrap_or(0)
    }

    /// Number of artifact downloads served across all requests.
    pub fn download_calls(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.downloads
    }

    fn is_purged(&self, request_id: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.purges.get(request_id).copied().unwrap_or(0) > 0
    }

    fn fake_pdf(&self, title: &str, detail: &str) -> Result<Vec<u8>, ProviderError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.downloads += 1;
        }
        paraphe_pdf::render_report(title, &[detail.to_string()])
            .map_err(|e| ProviderError::UnexpectedPayload(e.to_string()))
    }
}

#[async_trait]
impl SignatureProvider for MockProvider {
    async fn create_request(
        &self,
        name: &str,
        delivery: DeliveryMode,
    ) -> Result<String, ProviderError> {
        let request_id = format!(
            "mock-req-{}",
            Self::short_digest(&format!("{name}:{}", delivery.as_str()))
        );
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.signers.entry(request_id.clone()).or_default();
        tracing::debug!(request_id = %request_id, "mock provider created request");
        Ok(request_id)
    }

    async fn upload_document(
        &self,
        request_id: &str,
        filename: &str,
        pdf: &[u8],
    ) -> Result<String, ProviderError> {
        let mut hasher = Sha256::new();
        hasher.update(pdf);
        let content = hex::encode(&hasher.finalize()[..6]);
        Ok(format!(
            "mock-doc-{}",
            Self::short_digest(&format!("{request_id}:{filename}:{content}"))
        ))
    }

    async fn add_signer(
        &self,
        request_id: &str,
        _document_id: &str,
        enrollment: &SignerEnrollment,
    ) -> Result<ProviderSigner, ProviderError> {
        let contact = enrollment
            .email
            .clone()
            .or_else(|| enrollment.phone.clone())
            .unwrap_or_else(|| format!("{} {}", enrollment.first_name, enrollment.last_name));
        let signer_id = format!(
            "mock-sig-{}",
            Self::short_digest(&format!("{request_id}:{contact}"))
        );
        let signer = ProviderSigner {
            id: signer_id.clone(),
            // Links exist from enrollment in mock mode; activation keeps them.
            link: Some(format!(
                "https://esign.invalid/procedures/{request_id}/sign/{signer_id}"
            )),
            status: Some("initiated".to_string()),
        };

        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let signers = state.signers.entry(request_id.to_string()).or_default();
        if !signers.iter().any(|s| s.id == signer.id) {
            signers.push(signer.clone());
        }
        Ok(signer)
    }

    async fn activate_request(&self, request_id: &str) -> Result<ActivatedRequest, ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let signers = state
            .signers
            .get_mut(request_id)
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("unknown request {request_id}"),
            })?;
        for signer in signers.iter_mut() {
            signer.status = Some("notified".to_string());
        }
        Ok(ActivatedRequest {
            signers: signers.clone(),
        })
    }

    async fn list_signers(&self, request_id: &str) -> Result<Vec<ProviderSigner>, ProviderError> {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state
            .signers
            .get(request_id)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("unknown request {request_id}"),
            })
    }

    async fn fetch_signer(
        &self,
        request_id: &str,
        signer_id: &str,
    ) -> Result<ProviderSigner, ProviderError> {
        let signers = self.list_signers(request_id).await?;
        signers
            .into_iter()
            .find(|s| s.id == signer_id)
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("unknown signer {signer_id}"),
            })
    }

    async fn download_signed_document(&self, request_id: &str) -> Result<Vec<u8>, ProviderError> {
        if self.is_purged(request_id) {
            return Err(ProviderError::Api {
                status: 404,
                message: format!("request {request_id} was purged"),
            });
        }
        self.fake_pdf("Signed document", &format!("request {request_id}"))
    }

    async fn download_audit_trail(
        &self,
        request_id: &str,
        signer_id: Option<&str>,
    ) -> Result<Vec<u8>, ProviderError> {
        if self.is_purged(request_id) {
            return Err(ProviderError::Api {
                status: 404,
                message: format!("request {request_id} was purged"),
            });
        }
        let detail = match signer_id {
            Some(signer_id) => format!("request {request_id}, signer {signer_id}"),
            None => format!("request {request_id}, all signers"),
        };
        self.fake_pdf("Audit trail", &detail)
    }

    async fn download_url(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        self.fake_pdf("Fetched artifact", url)
    }

    async fn delete_request(
        &self,
        request_id: &str,
        _permanent: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state.purges.entry(request_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn request_exists(&self, request_id: &str) -> Result<bool, ProviderError> {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(state.signers.contains_key(request_id)
            && state.purges.get(request_id).copied().unwrap_or(0) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldPosition, SignerAuthMode};

    fn enrollment(email: &str) -> SignerEnrollment {
        SignerEnrollment {
            first_name: "Jeanne".to_string(),
            last_name: "Martin".to_string(),
            email: Some(email.to_string()),
            phone: None,
            auth_mode: SignerAuthMode::OtpSms,
            field: FieldPosition {
                page: 1,
                x: 60,
                y: 80,
                width: 150,
                height: 56,
            },
        }
    }

    #[tokio::test]
    async fn identifiers_are_deterministic() {
        let a = MockProvider::new();
        let b = MockProvider::new();

        let req_a = a.create_request("consent (case 1)", DeliveryMode::None).await.unwrap();
        let req_b = b.create_request("consent (case 1)", DeliveryMode::None).await.unwrap();
        assert_eq!(req_a, req_b);

        let signer_a = a.add_signer(&req_a, "doc", &enrollment("p1@example.org")).await.unwrap();
        let signer_b = b.add_signer(&req_b, "doc", &enrollment("p1@example.org")).await.unwrap();
        assert_eq!(signer_a.id, signer_b.id);
        assert!(signer_a.link.is_some());
    }

    #[tokio::test]
    async fn distinct_cases_get_distinct_requests() {
        let provider = MockProvider::new();
        let one = provider.create_request("consent (case 1)", DeliveryMode::None).await.unwrap();
        let two = provider.create_request("consent (case 2)", DeliveryMode::None).await.unwrap();
        assert_ne!(one, two);
    }

    #[tokio::test]
    async fn activation_returns_enrolled_signers() {
        let provider = MockProvider::new();
        let request_id = provider.create_request("fees (case 9)", DeliveryMode::None).await.unwrap();
        provider.add_signer(&request_id, "doc", &enrollment("p1@example.org")).await.unwrap();
        provider.add_signer(&request_id, "doc", &enrollment("p2@example.org")).await.unwrap();

        let activated = provider.activate_request(&request_id).await.unwrap();
        assert_eq!(activated.signers.len(), 2);
        assert!(activated.signers.iter().all(|s| s.link.is_some()));
    }

    #[tokio::test]
    async fn downloads_fail_after_purge() {
        let provider = MockProvider::new();
        let request_id = provider.create_request("authorization (case 3)", DeliveryMode::None).await.unwrap();

        assert!(provider.download_signed_document(&request_id).await.is_ok());

        provider.delete_request(&request_id, true).await.unwrap();
        assert_eq!(provider.purge_attempts(&request_id), 1);
        assert!(!provider.request_exists(&request_id).await.unwrap());

        let result = provider.download_signed_document(&request_id).await;
        assert!(matches!(result, Err(ProviderError::Api { status: 404, .. })));
    }

    #[tokio::test]
    async fn downloaded_artifacts_are_pdfs() {
        let provider = MockProvider::new();
        let request_id = provider.create_request("consent (case 4)", DeliveryMode::None).await.unwrap();

        let signed = provider.download_signed_document(&request_id).await.unwrap();
        let trail = provider.download_audit_trail(&request_id, None).await.unwrap();

        assert!(signed.starts_with(b"%PDF"));
        assert!(trail.starts_with(b"%PDF"));
        assert_eq!(provider.download_calls(), 2);
    }
}
