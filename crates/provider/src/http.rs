//! HTTP client for the hosted e-signature provider.

use crate::{
    ActivatedRequest, DeliveryMode, FieldPosition, ProviderError, ProviderSigner,
    SignatureProvider, SignerEnrollment,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for ordinary API calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Longer timeout for document upload and activation, which the provider
/// processes synchronously.
const SLOW_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for the provider's v3 API.
///
/// Holds a connection pool and the bearer credential; cheap to share behind
/// an `Arc`. Built once at startup when credentials are configured.
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct CreateRequestBody<'a> {
    name: &'a str,
    delivery_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: String,
}

#[derive(Debug, Serialize)]
struct SignerInfoBody<'a> {
    first_name: &'a str,
    last_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SignatureFieldBody<'a> {
    #[serde(rename = "type")]
    field_type: &'a str,
    document_id: &'a str,
    page: u32,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct AddSignerBody<'a> {
    info: SignerInfoBody<'a>,
    signature_authentication_mode: &'a str,
    fields: Vec<SignatureFieldBody<'a>>,
}

#[derive(Debug, Deserialize)]
struct SignerResponse {
    id: String,
    #[serde(default)]
    signature_link: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActivateResponse {
    #[serde(default)]
    signers: Vec<SignerResponse>,
}

impl From<SignerResponse> for ProviderSigner {
    fn from(signer: SignerResponse) -> Self {
        ProviderSigner {
            id: signer.id,
            link: signer.signature_link,
            status: signer.status,
        }
    }
}

impl HttpProvider {
    /// Builds a client for `base_url` authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotConfigured` if either value is blank, or
    /// `ProviderError::Transport` if the underlying client cannot be built.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ProviderError> {
        if base_url.trim().is_empty() || api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured);
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CALL_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SignatureProvider for HttpProvider {
    async fn create_request(
        &self,
        name: &str,
        delivery: DeliveryMode,
    ) -> Result<String, ProviderError> {
        let body = CreateRequestBody {
            name,
            delivery_mode: delivery.as_str(),
        };
        let created: CreatedResource = self
            .post_json("/v3/signature_requests", &body, CALL_TIMEOUT)
            .await?;
        tracing::debug!(request_id = %created.id, "created provider signature request");
        Ok(created.id)
    }

    async fn upload_document(
        &self,
        request_id: &str,
        filename: &str,
        pdf: &[u8],
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.url(&format!(
                "/v3/signature_requests/{request_id}/documents"
            )))
            .bearer_auth(&self.api_key)
            .timeout(SLOW_CALL_TIMEOUT)
            .query(&[("nature", "signable_document"), ("filename", filename)])
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(pdf.to_vec())
            .send()
            .await?;
        let created: CreatedResource = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn add_signer(
        &self,
        request_id: &str,
        document_id: &str,
        enrollment: &SignerEnrollment,
    ) -> Result<ProviderSigner, ProviderError> {
        let FieldPosition {
            page,
            x,
            y,
            width,
            height,
        } = enrollment.field;
        let body = AddSignerBody {
            info: SignerInfoBody {
                first_name: &enrollment.first_name,
                last_name: &enrollment.last_name,
                email: enrollment.email.as_deref(),
                phone_number: enrollment.phone.as_deref(),
            },
            signature_authentication_mode: enrollment.auth_mode.as_str(),
            fields: vec![SignatureFieldBody {
                field_type: "signature",
                document_id,
                page,
                x,
                y,
                width,
                height,
            }],
        };
        let signer: SignerResponse = self
            .post_json(
                &format!("/v3/signature_requests/{request_id}/signers"),
                &body,
                CALL_TIMEOUT,
            )
            .await?;
        Ok(signer.into())
    }

    async fn activate_request(&self, request_id: &str) -> Result<ActivatedRequest, ProviderError> {
        let response: ActivateResponse = self
            .post_json(
                &format!("/v3/signature_requests/{request_id}/activate"),
                &serde_json::json!({}),
                SLOW_CALL_TIMEOUT,
            )
            .await?;
        Ok(ActivatedRequest {
            signers: response.signers.into_iter().map(Into::into).collect(),
        })
    }

    async fn list_signers(&self, request_id: &str) -> Result<Vec<ProviderSigner>, ProviderError> {
        let signers: Vec<SignerResponse> = self
            .get_json(&format!("/v3/signature_requests/{request_id}/signers"))
            .await?;
        Ok(signers.into_iter().map(Into::into).collect())
    }

    async fn fetch_signer(
        &self,
        request_id: &str,
        signer_id: &str,
    ) -> Result<ProviderSigner, ProviderError> {
        let signer: SignerResponse = self
            .get_json(&format!(
                "/v3/signature_requests/{request_id}/signers/{signer_id}"
            ))
            .await?;
        Ok(signer.into())
    }

    async fn download_signed_document(&self, request_id: &str) -> Result<Vec<u8>, ProviderError> {
        self.get_bytes(&format!(
            "/v3/signature_requests/{request_id}/documents/download"
        ))
        .await
    }

    async fn download_audit_trail(
        &self,
        request_id: &str,
        signer_id: Option<&str>,
    ) -> Result<Vec<u8>, ProviderError> {
        let path = match signer_id {
            Some(signer_id) => format!(
                "/v3/signature_requests/{request_id}/signers/{signer_id}/audit_trails/download"
            ),
            None => format!("/v3/signature_requests/{request_id}/audit_trails/download"),
        };
        self.get_bytes(&path).await
    }

    async fn download_url(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }

    async fn delete_request(&self, request_id: &str, permanent: bool) -> Result<(), ProviderError> {
        let mut request = self
            .client
            .delete(self.url(&format!("/v3/signature_requests/{request_id}")))
            .bearer_auth(&self.api_key);
        if permanent {
            request = request.query(&[("permanent", "true")]);
        }
        let response = request.send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn request_exists(&self, request_id: &str) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/v3/signature_requests/{request_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_blank_credentials() {
        assert!(matches!(
            HttpProvider::new("", "key"),
            Err(ProviderError::NotConfigured)
        ));
        assert!(matches!(
            HttpProvider::new("https://api.esign.example", "  "),
            Err(ProviderError::NotConfigured)
        ));
    }

    #[test]
    fn base_url_is_normalised() {
        let provider = HttpProvider::new("https://api.esign.example/", "key").unwrap();
        assert_eq!(
            provider.url("/v3/signature_requests"),
            "https://api.esign.example/v3/signature_requests"
        );
    }
}
