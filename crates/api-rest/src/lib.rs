//! # API REST
//!
//! REST surface of the Paraphe signature core.
//!
//! Handles:
//! - HTTP endpoints with axum (initiation, provider webhook, cabinet
//!   sessions, verification sweep)
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS, error-to-status
//!   mapping)
//!
//! The domain error taxonomy maps onto HTTP statuses here and nowhere
//! else: NotFound 404, Validation 400, Conflict 409, Gone 410,
//! Unavailable 503, everything else 500.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use chrono::Utc;
use paraphe_core::cabinet::{CabinetCaptureFlow, CabinetUpload};
use paraphe_core::cases::{CaseDirectory, FileCaseDirectory};
use paraphe_core::model::{DocumentKind, DocumentSignature, SignerRole};
use paraphe_core::notify::LogNotifier;
use paraphe_core::orchestrator::SignatureOrchestrator;
use paraphe_core::store::SignatureStore;
use paraphe_core::sweep::{Finding, SweepReport, VerificationSweep};
use paraphe_core::webhook::{ProviderEvent, WebhookOutcome, WebhookReconciler};
use paraphe_core::{SignConfig, SignatureError, SignatureResult};
use paraphe_files::FileStore;
use paraphe_provider::{HttpProvider, MockProvider, SignatureProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

/// Provider credentials as read from the environment. Both absent selects
/// the deterministic mock provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<SignatureStore>,
    orchestrator: Arc<SignatureOrchestrator>,
    cabinet: Arc<CabinetCaptureFlow>,
    reconciler: Arc<WebhookReconciler>,
    sweep: Arc<VerificationSweep>,
}

/// Wires the full service stack from configuration.
pub fn build_state(
    config: SignConfig,
    provider_settings: ProviderSettings,
) -> SignatureResult<AppState> {
    let config = Arc::new(config);
    let files = Arc::new(FileStore::new(&config.blobs_dir())?);
    let store = Arc::new(SignatureStore::new(config.clone()));
    let cases: Arc<dyn CaseDirectory> = Arc::new(FileCaseDirectory::new(&config));

    let provider: Arc<dyn SignatureProvider> =
        match (provider_settings.base_url, provider_settings.api_key) {
            (Some(base_url), Some(api_key)) => {
                tracing::info!(base_url = %base_url, "using HTTP signature provider");
                Arc::new(HttpProvider::new(&base_url, &api_key).map_err(|e| {
                    SignatureError::Unavailable(format!("provider configuration rejected: {e}"))
                })?)
            }
            _ => {
                tracing::warn!("no provider credentials, using the deterministic mock provider");
                Arc::new(MockProvider::new())
            }
        };

    let orchestrator = Arc::new(SignatureOrchestrator::new(
        store.clone(),
        files.clone(),
        provider,
        cases.clone(),
        Arc::new(LogNotifier),
    ));
    let cabinet = Arc::new(CabinetCaptureFlow::new(
        config.clone(),
        store.clone(),
        files.clone(),
        cases,
        orchestrator.clone(),
    ));
    let reconciler = Arc::new(WebhookReconciler::new(store.clone(), orchestrator.clone()));
    let sweep = Arc::new(VerificationSweep::new(store.clone(), files, config));

    Ok(AppState {
        store,
        orchestrator,
        cabinet,
        reconciler,
        sweep,
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        initiate_signature,
        get_signature,
        provider_webhook,
        create_cabinet_session,
        cabinet_session_status,
        upload_cabinet_signature,
        run_sweep,
    ),
    components(schemas(
        HealthRes,
        InitiateReq,
        SignerRes,
        DocumentSignatureRes,
        WebhookAck,
        CreateSessionReq,
        CreateSessionRes,
        SessionStatusRes,
        CabinetUploadReq,
        FindingRes,
        SweepRes,
        ErrorRes,
    ))
)]
pub struct ApiDoc;

/// Builds the application router with every endpoint and the Swagger UI.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/cases/:case_id/signatures/:kind/initiate",
            post(initiate_signature),
        )
        .route("/cases/:case_id/signatures/:kind", get(get_signature))
        .route("/webhooks/provider", post(provider_webhook))
        .route("/cabinet/sessions", post(create_cabinet_session))
        .route("/cabinet/sessions/:token", get(cabinet_session_status))
        .route(
            "/cabinet/sessions/:token/signature",
            post(upload_cabinet_signature),
        )
        .route("/admin/sweep", get(run_sweep))
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---- wire types ----

#[derive(Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct InitiateReq {
    /// Weak signer authentication for supervised in-person signing.
    #[serde(default)]
    pub in_person: bool,
}

#[derive(Serialize, ToSchema)]
pub struct SignerRes {
    pub role: String,
    pub status: String,
    pub signature_link: Option<String>,
    pub sent_at: Option<String>,
    pub signed_at: Option<String>,
    pub method: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct DocumentSignatureRes {
    pub document_id: String,
    pub case_id: String,
    pub kind: String,
    pub overall_status: String,
    pub signers: Vec<SignerRes>,
    pub signed_pdf_id: Option<String>,
    pub evidence_pdf_id: Option<String>,
    pub final_pdf_id: Option<String>,
    pub completed_at: Option<String>,
    pub purged_at: Option<String>,
}

impl From<DocumentSignature> for DocumentSignatureRes {
    fn from(doc: DocumentSignature) -> Self {
        let signers = SignerRole::BOTH
            .into_iter()
            .map(|role| {
                let progress = doc.signer(role);
                SignerRes {
                    role: role.code().to_string(),
                    status: format!("{:?}", progress.status).to_lowercase(),
                    signature_link: progress.signature_link.clone(),
                    sent_at: progress.sent_at.map(|t| t.to_rfc3339()),
                    signed_at: progress.signed_at.map(|t| t.to_rfc3339()),
                    method: progress.method.map(|m| format!("{m:?}").to_lowercase()),
                }
            })
            .collect();

        Self {
            document_id: doc.id.simple().to_string(),
            case_id: doc.case_id.simple().to_string(),
            kind: doc.kind.code().to_string(),
            overall_status: doc.overall_status.code().to_string(),
            signers,
            signed_pdf_id: doc.signed_pdf_id,
            evidence_pdf_id: doc.evidence_pdf_id,
            final_pdf_id: doc.final_pdf_id,
            completed_at: doc.completed_at.map(|t| t.to_rfc3339()),
            purged_at: doc.purged_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionReq {
    pub document_id: String,
    pub role: String,
    pub practitioner: String,
}

#[derive(Serialize, ToSchema)]
pub struct CreateSessionRes {
    /// One-time plaintext token; shown here and never again.
    pub token: String,
    pub document_id: String,
    pub role: String,
    pub expires_at: String,
}

#[derive(Serialize, ToSchema)]
pub struct SessionStatusRes {
    pub document_id: String,
    pub kind: String,
    pub role: String,
    pub document_title: String,
    pub child_label: Option<String>,
    pub expires_at: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CabinetUploadReq {
    /// Base64-encoded PNG.
    pub image: String,
    pub consent_confirmed: bool,
    pub device_id: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct FindingRes {
    pub document_id: String,
    pub case_id: String,
    pub kind: String,
    pub detail: String,
}

impl From<Finding> for FindingRes {
    fn from(finding: Finding) -> Self {
        Self {
            document_id: finding.document_id.simple().to_string(),
            case_id: finding.case_id.simple().to_string(),
            kind: finding.kind.code().to_string(),
            detail: finding.detail,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SweepRes {
    pub clean: bool,
    pub missing_identifiers: Vec<FindingRes>,
    pub missing_blobs: Vec<FindingRes>,
    pub unpurged: Vec<FindingRes>,
    pub stuck_partial: Vec<FindingRes>,
    pub corrupt_finals: Vec<FindingRes>,
}

impl From<SweepReport> for SweepRes {
    fn from(report: SweepReport) -> Self {
        let clean = report.is_clean();
        let convert = |findings: Vec<Finding>| findings.into_iter().map(FindingRes::from).collect();
        Self {
            clean,
            missing_identifiers: convert(report.missing_identifiers),
            missing_blobs: convert(report.missing_blobs),
            unpurged: convert(report.unpurged),
            stuck_partial: convert(report.stuck_partial),
            corrupt_finals: convert(report.corrupt_finals),
        }
    }
}

// ---- error mapping ----

type ApiError = (StatusCode, Json<ErrorRes>);

fn error_response(err: SignatureError) -> ApiError {
    let status = match &err {
        SignatureError::NotFound(_) => StatusCode::NOT_FOUND,
        SignatureError::Validation(_) => StatusCode::BAD_REQUEST,
        SignatureError::Conflict(_) => StatusCode::CONFLICT,
        SignatureError::Gone(_) => StatusCode::GONE,
        SignatureError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "internal error on the REST surface");
    }
    (
        status,
        Json(ErrorRes {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(SignatureError::Validation(message.into()))
}

fn parse_case_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| bad_request(format!("invalid case id {raw}")))
}

fn parse_kind(raw: &str) -> Result<DocumentKind, ApiError> {
    DocumentKind::parse(raw).ok_or_else(|| bad_request(format!("unknown document kind {raw}")))
}

fn parse_role(raw: &str) -> Result<SignerRole, ApiError> {
    SignerRole::parse(raw).ok_or_else(|| bad_request(format!("unknown signer role {raw}")))
}

// ---- handlers ----

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Paraphe REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/cases/{case_id}/signatures/{kind}/initiate",
    request_body = InitiateReq,
    params(
        ("case_id" = String, Path, description = "Case identifier"),
        ("kind" = String, Path, description = "Document kind: authorization, consent or fees"),
    ),
    responses(
        (status = 200, description = "Signature workflow initiated (idempotent)", body = DocumentSignatureRes),
        (status = 400, description = "Unknown kind or unusable signer contacts", body = ErrorRes),
        (status = 404, description = "Unknown case", body = ErrorRes),
        (status = 503, description = "Provider unavailable", body = ErrorRes),
    )
)]
/// Starts (or returns the already started) signing workflow for one
/// document of a case.
#[axum::debug_handler]
async fn initiate_signature(
    State(state): State<AppState>,
    AxumPath((case_id, kind)): AxumPath<(String, String)>,
    Json(req): Json<InitiateReq>,
) -> Result<Json<DocumentSignatureRes>, ApiError> {
    let case_id = parse_case_id(&case_id)?;
    let kind = parse_kind(&kind)?;

    let doc = state
        .orchestrator
        .initiate(case_id, kind, req.in_person)
        .await
        .map_err(error_response)?;
    Ok(Json(doc.into()))
}

#[utoipa::path(
    get,
    path = "/cases/{case_id}/signatures/{kind}",
    params(
        ("case_id" = String, Path, description = "Case identifier"),
        ("kind" = String, Path, description = "Document kind"),
    ),
    responses(
        (status = 200, description = "Current signature record", body = DocumentSignatureRes),
        (status = 404, description = "No record for this case and kind", body = ErrorRes),
    )
)]
#[axum::debug_handler]
async fn get_signature(
    State(state): State<AppState>,
    AxumPath((case_id, kind)): AxumPath<(String, String)>,
) -> Result<Json<DocumentSignatureRes>, ApiError> {
    let case_id = parse_case_id(&case_id)?;
    let kind = parse_kind(&kind)?;

    let doc = state
        .store
        .load(case_id, kind)
        .map_err(error_response)?
        .ok_or_else(|| {
            error_response(SignatureError::NotFound(format!(
                "no {} signature for case {case_id}",
                kind.code()
            )))
        })?;
    Ok(Json(doc.into()))
}

#[utoipa::path(
    post,
    path = "/webhooks/provider",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged, applied or not", body = WebhookAck)
    )
)]
/// Inbound provider events. Delivery is at-least-once with possible
/// duplicates; this endpoint acknowledges everything, including payloads
/// it cannot use, to avoid provider retry storms.
#[axum::debug_handler]
async fn provider_webhook(State(state): State<AppState>, body: String) -> Json<WebhookAck> {
    let outcome = match serde_json::from_str::<ProviderEvent>(&body) {
        Ok(event) => state.reconciler.process(event).await,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable webhook payload acknowledged");
            WebhookOutcome::Ignored
        }
    };

    let outcome = match outcome {
        WebhookOutcome::Applied => "applied",
        WebhookOutcome::Refreshed => "refreshed",
        WebhookOutcome::Ignored => "ignored",
    };
    Json(WebhookAck {
        received: true,
        outcome: outcome.to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/cabinet/sessions",
    request_body = CreateSessionReq,
    responses(
        (status = 200, description = "Session issued, token shown once", body = CreateSessionRes),
        (status = 404, description = "Unknown document", body = ErrorRes),
        (status = 409, description = "Role has already signed", body = ErrorRes),
    )
)]
#[axum::debug_handler]
async fn create_cabinet_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionReq>,
) -> Result<Json<CreateSessionRes>, ApiError> {
    let document_id = Uuid::parse_str(&req.document_id)
        .map_err(|_| bad_request(format!("invalid document id {}", req.document_id)))?;
    let role = parse_role(&req.role)?;

    let issued = state
        .cabinet
        .create_session(document_id, role, &req.practitioner)
        .map_err(error_response)?;
    Ok(Json(CreateSessionRes {
        token: issued.token,
        document_id: issued.document_id.simple().to_string(),
        role: issued.role.code().to_string(),
        expires_at: issued.expires_at.to_rfc3339(),
    }))
}

#[utoipa::path(
    get,
    path = "/cabinet/sessions/{token}",
    params(("token" = String, Path, description = "Plaintext session token")),
    responses(
        (status = 200, description = "Session is valid", body = SessionStatusRes),
        (status = 404, description = "Unknown token", body = ErrorRes),
        (status = 409, description = "Session already completed", body = ErrorRes),
        (status = 410, description = "Session expired or superseded", body = ErrorRes),
    )
)]
#[axum::debug_handler]
async fn cabinet_session_status(
    State(state): State<AppState>,
    AxumPath(token): AxumPath<String>,
) -> Result<Json<SessionStatusRes>, ApiError> {
    let status = state
        .cabinet
        .session_status(&token)
        .map_err(error_response)?;
    Ok(Json(SessionStatusRes {
        document_id: status.document_id.simple().to_string(),
        kind: status.kind.code().to_string(),
        role: status.role.code().to_string(),
        document_title: status.document_title.to_string(),
        child_label: status.child_label,
        expires_at: status.expires_at.to_rfc3339(),
    }))
}

#[utoipa::path(
    post,
    path = "/cabinet/sessions/{token}/signature",
    request_body = CabinetUploadReq,
    params(("token" = String, Path, description = "Plaintext session token")),
    responses(
        (status = 200, description = "Signature captured", body = DocumentSignatureRes),
        (status = 400, description = "Refused consent, bad image, or oversized image", body = ErrorRes),
        (status = 404, description = "Unknown token", body = ErrorRes),
        (status = 409, description = "Session completed or document changed", body = ErrorRes),
        (status = 410, description = "Session expired or superseded", body = ErrorRes),
    )
)]
#[axum::debug_handler]
async fn upload_cabinet_signature(
    State(state): State<AppState>,
    AxumPath(token): AxumPath<String>,
    headers: HeaderMap,
    Json(req): Json<CabinetUploadReq>,
) -> Result<Json<DocumentSignatureRes>, ApiError> {
    let image = base64::engine::general_purpose::STANDARD
        .decode(req.image.as_bytes())
        .map_err(|_| bad_request("image is not valid base64"))?;

    let requester_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string();

    let doc = state
        .cabinet
        .upload_signature(
            &token,
            CabinetUpload {
                image,
                consent_confirmed: req.consent_confirmed,
                device_id: req.device_id,
                requester_ip,
                user_agent: req.user_agent,
            },
        )
        .await
        .map_err(error_response)?;
    Ok(Json(doc.into()))
}

#[utoipa::path(
    get,
    path = "/admin/sweep",
    responses(
        (status = 200, description = "Verification sweep findings", body = SweepRes),
        (status = 500, description = "Sweep could not run", body = ErrorRes),
    )
)]
/// Runs the read-only integrity sweep and returns its findings.
#[axum::debug_handler]
async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepRes>, ApiError> {
    let report = state.sweep.run(Utc::now()).map_err(error_response)?;
    Ok(Json(report.into()))
}
