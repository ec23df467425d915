//! E-signature provider client.
//!
//! The orchestration core never talks HTTP directly; it goes through the
//! [`SignatureProvider`] capability, selected once at construction:
//!
//! - [`HttpProvider`] - the real hosted provider, driven over REST with
//!   bounded timeouts
//! - [`MockProvider`] - a deterministic local stand-in used when no
//!   credentials are configured, producing fully exercised state
//!   transitions without network access
//!
//! Failure semantics follow the orchestration contract: errors from request
//! creation and signer enrollment surface to the caller (initiation fails),
//! while download and purge failures are caught and logged by the caller,
//! never propagated past the state machine.

mod http;
mod mock;

pub use http::HttpProvider;
pub use mock::MockProvider;

use async_trait::async_trait;

/// Errors from provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credentials are absent or incomplete; the client cannot be built.
    #[error("provider is not configured")]
    NotConfigured,

    /// Transport-level failure (connect, timeout, TLS, body read).
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The provider answered 2xx but the payload was not usable.
    #[error("unexpected provider payload: {0}")]
    UnexpectedPayload(String),
}

/// How the provider itself contacts signers.
///
/// Paraphe sends its own notifications, so requests are normally created
/// with `None` and signers receive links out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    None,
    Email,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::None => "none",
            DeliveryMode::Email => "email",
        }
    }
}

/// Authentication strength asked of a signer.
///
/// Remote signing uses OTP over SMS; in-person (cabinet-supervised) signing
/// on the provider's hosted UI uses no challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerAuthMode {
    None,
    OtpSms,
}

impl SignerAuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerAuthMode::None => "no_otp",
            SignerAuthMode::OtpSms => "otp_sms",
        }
    }
}

/// Placement of the visible signature field on the uploaded document.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct FieldPosition {
    pub page: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One signer to register on a signature request.
#[derive(Debug, Clone)]
pub struct SignerEnrollment {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub auth_mode: SignerAuthMode,
    pub field: FieldPosition,
}

/// A signer as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSigner {
    pub id: String,
    /// Hosted signing link; providers populate this inconsistently, which
    /// is why the caller runs a retrieval fallback chain.
    pub link: Option<String>,
    pub status: Option<String>,
}

/// Result of activating a request: the signers as returned by the
/// activation response (links possibly absent).
#[derive(Debug, Clone)]
pub struct ActivatedRequest {
    pub signers: Vec<ProviderSigner>,
}

/// Capability covering the provider's REST surface.
///
/// All calls are blocking units of work with bounded timeouts and no
/// automatic retry; retry policy belongs to maintenance scripts, not the
/// request path.
#[async_trait]
pub trait SignatureProvider: Send + Sync {
    /// Creates a signature request and returns its identifier.
    async fn create_request(
        &self,
        name: &str,
        delivery: DeliveryMode,
    ) -> Result<String, ProviderError>;

    /// Uploads the signable document for a request; returns the document id.
    async fn upload_document(
        &self,
        request_id: &str,
        filename: &str,
        pdf: &[u8],
    ) -> Result<String, ProviderError>;

    /// Registers a signer on a request; the returned link may be absent
    /// until activation.
    async fn add_signer(
        &self,
        request_id: &str,
        document_id: &str,
        enrollment: &SignerEnrollment,
    ) -> Result<ProviderSigner, ProviderError>;

    /// Activates the request; hosted links become usable from this point.
    async fn activate_request(&self, request_id: &str) -> Result<ActivatedRequest, ProviderError>;

    /// Fetches all signers for a request (link fallback, poll-and-refresh).
    async fn list_signers(&self, request_id: &str) -> Result<Vec<ProviderSigner>, ProviderError>;

    /// Fetches a single signer (last step of the link fallback chain).
    async fn fetch_signer(
        &self,
        request_id: &str,
        signer_id: &str,
    ) -> Result<ProviderSigner, ProviderError>;

    /// Downloads the signed document for a request.
    async fn download_signed_document(&self, request_id: &str) -> Result<Vec<u8>, ProviderError>;

    /// Downloads the audit trail PDF, either for all signers or one.
    async fn download_audit_trail(
        &self,
        request_id: &str,
        signer_id: Option<&str>,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Fetches an artifact from a URL supplied in a webhook payload.
    async fn download_url(&self, url: &str) -> Result<Vec<u8>, ProviderError>;

    /// Deletes/purges a request at the provider. `permanent` asks for
    /// unrecoverable deletion.
    async fn delete_request(&self, request_id: &str, permanent: bool) -> Result<(), ProviderError>;

    /// Best-effort existence check after a purge.
    async fn request_exists(&self, request_id: &str) -> Result<bool, ProviderError>;
}
