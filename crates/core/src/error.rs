/// Errors surfaced by the signature core.
///
/// The first five variants form the client-facing taxonomy; the wire layer
/// maps them to HTTP statuses (404, 400, 409, 410, 503). The remaining
/// variants are infrastructure failures and map to 500.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Unknown case, document, session, or token. Not retryable.
    #[error("not found: {0}")]
    NotFound(String),
    /// Rejected input (missing contacts, bad image, refused consent).
    #[error("invalid input: {0}")]
    Validation(String),
    /// State moved under the caller; re-fetch before retrying.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Expired or superseded session token; never valid again.
    #[error("gone: {0}")]
    Gone(String),
    /// Provider misconfigured or unreachable during synchronous initiation.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read signature record: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write signature record: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
    #[error("blob storage error: {0}")]
    Storage(#[from] paraphe_files::StorageError),
}

pub type SignatureResult<T> = Result<T, SignatureError>;

impl SignatureError {
    /// Wraps a provider failure that surfaced during synchronous
    /// initiation. Download and purge failures never go through here; they
    /// are logged and recovered locally.
    pub fn provider_unavailable(stage: &str, source: paraphe_provider::ProviderError) -> Self {
        SignatureError::Unavailable(format!("provider {stage} failed: {source}"))
    }
}
