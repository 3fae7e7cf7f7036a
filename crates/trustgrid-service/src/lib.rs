#![deny(unsafe_code)]

pub mod auth;

use auth::AuthenticatedOrg;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use trustgrid_adapters::{HttpAdvisoryClient, HttpAdvisoryConfig, KeywordPolicyAdvisory};
use trustgrid_core::{
    AccessOutcome, AdvisoryError, AdvisoryService, CategoryFieldPolicy, Citizen, ConsentDecision,
    ConsentRecord, Credential, CredentialConfig, EngineConfig, IssuedCredential, Organization,
    ProfileField, ProfileUpdate, ResponseOutcome, RevokeOutcome, StatusReport, StorageConfig,
    TrustGridEngine, TrustGridError, VerificationOutcome, VerificationSubmission,
};
use uuid::Uuid;

/// Where advisory verdicts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryBackend {
    /// Remote identity + policy service.
    Http { base_url: String },
    /// Offline keyword policy reader; identity verification is unavailable.
    Keyword,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub advisory: AdvisoryBackend,
    pub advisory_timeout: Duration,
    pub allow_list: CategoryFieldPolicy,
    pub hash_cost: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            advisory: AdvisoryBackend::Keyword,
            advisory_timeout: Duration::from_secs(20),
            allow_list: CategoryFieldPolicy::default(),
            hash_cost: CredentialConfig::default().hash_cost,
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<TrustGridEngine>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            storage,
            advisory,
            advisory_timeout,
            allow_list,
            hash_cost,
        } = config;

        let advisory: Arc<dyn AdvisoryService> = match advisory {
            AdvisoryBackend::Http { base_url } => Arc::new(HttpAdvisoryClient::new(
                HttpAdvisoryConfig::new(base_url, advisory_timeout),
            )?),
            AdvisoryBackend::Keyword => {
                warn!(
                    "No advisory url configured; identity verification will reject every \
                     submission"
                );
                Arc::new(KeywordPolicyAdvisory)
            }
        };

        let engine_config = EngineConfig {
            credentials: CredentialConfig {
                hash_cost,
                ..CredentialConfig::default()
            },
            advisory_timeout,
            allow_list,
            storage,
        };
        let engine = TrustGridEngine::bootstrap(engine_config, advisory).await?;

        Ok(Self::with_engine(engine))
    }

    pub fn with_engine(engine: TrustGridEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/org/register", post(register_organization))
        .route("/v1/org/me", get(current_organization))
        .route(
            "/v1/org/submit-for-verification",
            post(submit_for_verification),
        )
        .route("/v1/org/policy", post(update_policy))
        .route("/v1/org/log", get(organization_log))
        .route("/v1/org/api-keys", get(list_api_keys).post(create_api_key))
        .route("/v1/org/api-keys/:key_id/revoke", post(revoke_api_key))
        .route("/v1/request-data", post(request_data))
        .route("/v1/request-status/:request_id", get(request_status))
        .route("/v1/citizen/register", post(register_citizen))
        .route("/v1/citizen/:username/profile", put(update_citizen_profile))
        .route("/v1/citizen/:username/requests", get(citizen_pending_requests))
        .route("/v1/citizen/:username/log", get(citizen_log))
        .route("/v1/citizen/respond", post(citizen_respond))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] TrustGridError),
    #[error("advisory setup error: {0}")]
    Advisory(#[from] AdvisoryError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] TrustGridError),
}

impl ApiError {
    fn unauthorized(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn status_for(err: &TrustGridError) -> StatusCode {
    match err {
        TrustGridError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        TrustGridError::Forbidden(_) => StatusCode::FORBIDDEN,
        TrustGridError::NotFound(_) => StatusCode::NOT_FOUND,
        TrustGridError::Conflict(_) => StatusCode::CONFLICT,
        TrustGridError::BadRequest(_) => StatusCode::BAD_REQUEST,
        TrustGridError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => {
                let status = status_for(&err);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    warn!(error = %err, "Request failed with internal error");
                }
                (status, Json(serde_json::json!({ "error": err.reason() }))).into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
    advisory_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "trustgrid-service",
        storage_backend: state.engine.storage_backend(),
        advisory_backend: state.engine.advisory_backend(),
    })
}

#[derive(Debug, Clone, Serialize)]
struct ItemsResponse<T> {
    items: Vec<T>,
}

// organizations

#[derive(Debug, Clone, Deserialize)]
struct RegisterOrganizationRequest {
    name: String,
}

#[derive(Debug, Clone, Serialize)]
struct RegisterOrganizationResponse {
    organization: Organization,
    /// Shown exactly once.
    api_key: String,
    credential: Credential,
}

async fn register_organization(
    State(state): State<ServiceState>,
    Json(request): Json<RegisterOrganizationRequest>,
) -> Result<(StatusCode, Json<RegisterOrganizationResponse>), ApiError> {
    let registration = state.engine.register_organization(&request.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterOrganizationResponse {
            organization: registration.organization,
            api_key: registration.api_key.plaintext,
            credential: registration.api_key.credential,
        }),
    ))
}

async fn current_organization(AuthenticatedOrg(org): AuthenticatedOrg) -> Json<Organization> {
    Json(org)
}

async fn submit_for_verification(
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
    Json(submission): Json<VerificationSubmission>,
) -> Result<Json<VerificationOutcome>, ApiError> {
    Ok(Json(
        state
            .engine
            .submit_for_verification(org.id, submission)
            .await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyRequest {
    policy_text: String,
}

async fn update_policy(
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
    Json(request): Json<PolicyRequest>,
) -> Result<Json<Organization>, ApiError> {
    Ok(Json(
        state
            .engine
            .update_policy(org.id, &request.policy_text)
            .await?,
    ))
}

async fn organization_log(
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
) -> Result<Json<ItemsResponse<ConsentRecord>>, ApiError> {
    Ok(Json(ItemsResponse {
        items: state.engine.organization_log(org.id).await?,
    }))
}

// credentials

async fn list_api_keys(
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
) -> Result<Json<ItemsResponse<Credential>>, ApiError> {
    Ok(Json(ItemsResponse {
        items: state.engine.list_credentials(org.id).await?,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct CreateApiKeyRequest {
    #[serde(default)]
    name: String,
}

async fn create_api_key(
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<IssuedCredential>), ApiError> {
    let issued = state.engine.issue_credential(org.id, &request.name).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

#[derive(Debug, Clone, Serialize)]
struct RevokeResponse {
    key_id: Uuid,
    outcome: RevokeOutcome,
}

async fn revoke_api_key(
    Path(key_id): Path<Uuid>,
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
) -> Result<Json<RevokeResponse>, ApiError> {
    let outcome = state.engine.revoke_credential(key_id, org.id).await?;
    Ok(Json(RevokeResponse { key_id, outcome }))
}

// data requests

#[derive(Debug, Clone, Deserialize)]
struct DataRequest {
    citizen_username: String,
    data_field: String,
    purpose: String,
}

async fn request_data(
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
    Json(request): Json<DataRequest>,
) -> Result<(StatusCode, Json<AccessOutcome>), ApiError> {
    let outcome = state
        .engine
        .request_access(
            &org,
            &request.citizen_username,
            &request.data_field,
            &request.purpose,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

async fn request_status(
    Path(request_id): Path<Uuid>,
    State(state): State<ServiceState>,
    AuthenticatedOrg(org): AuthenticatedOrg,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(state.engine.get_status(request_id, org.id).await?))
}

// citizens

fn parse_profile(
    raw: BTreeMap<String, String>,
) -> Result<BTreeMap<ProfileField, String>, ApiError> {
    raw.into_iter()
        .map(|(name, value)| -> Result<_, ApiError> {
            Ok((name.parse::<ProfileField>()?, value))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
struct RegisterCitizenRequest {
    username: String,
    #[serde(default)]
    profile: BTreeMap<String, String>,
    #[serde(default)]
    manual_approval_required: bool,
}

async fn register_citizen(
    State(state): State<ServiceState>,
    Json(request): Json<RegisterCitizenRequest>,
) -> Result<(StatusCode, Json<Citizen>), ApiError> {
    let profile = parse_profile(request.profile)?;
    let citizen = state
        .engine
        .register_citizen(&request.username, profile, request.manual_approval_required)
        .await?;
    Ok((StatusCode::CREATED, Json(citizen)))
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileUpdateRequest {
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    manual_approval_required: Option<bool>,
}

async fn update_citizen_profile(
    Path(username): Path<String>,
    State(state): State<ServiceState>,
    Json(request): Json<ProfileUpdateRequest>,
) -> Result<Json<Citizen>, ApiError> {
    let update = ProfileUpdate {
        fields: parse_profile(request.fields)?,
        manual_approval_required: request.manual_approval_required,
    };
    Ok(Json(
        state
            .engine
            .update_citizen_profile(&username, update)
            .await?,
    ))
}

async fn citizen_pending_requests(
    Path(username): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<ItemsResponse<ConsentRecord>>, ApiError> {
    Ok(Json(ItemsResponse {
        items: state.engine.pending_requests(&username).await?,
    }))
}

async fn citizen_log(
    Path(username): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<ItemsResponse<ConsentRecord>>, ApiError> {
    Ok(Json(ItemsResponse {
        items: state.engine.citizen_log(&username).await?,
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct RespondRequest {
    request_id: Uuid,
    decision: String,
}

async fn citizen_respond(
    State(state): State<ServiceState>,
    Json(request): Json<RespondRequest>,
) -> Result<Json<ResponseOutcome>, ApiError> {
    let decision: ConsentDecision = request
        .decision
        .parse()
        .map_err(|err: TrustGridError| ApiError::bad_request(err.reason()))?;
    Ok(Json(state.engine.respond(request.request_id, decision).await?))
}
