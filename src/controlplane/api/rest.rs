//! REST API Handlers
//!
//! Read access to claim provisioning state, plus claim submission and
//! deletion for runs without a cluster.

use crate::controlplane::reconciler::{ClaimEvent, Reconciler};
use crate::domain::capacity::parse_capacity;
use crate::domain::ports::{ClaimId, ClaimStatus, ProvisionPhase, ProvisionRecord, VolumeClaimRequest};
use crate::error::Error;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_WAIT_SECS: u64 = 30;
const MAX_WAIT_SECS: u64 = 300;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Claim submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitClaimRequest {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: Option<String>,
    pub storage_class: String,
    /// Capacity (e.g., "50Gi", "1T")
    pub capacity: String,
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Storage class parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Provisioning state of a claim
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimInfoResponse {
    pub namespace: String,
    pub name: String,
    pub phase: ProvisionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<ProvisionPhase>,
    pub mode: String,
    pub availability_domain: Option<String>,
    pub mount_target_id: Option<String>,
    pub export_id: Option<String>,
    pub export_path: Option<String>,
    pub volume_name: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProvisionRecord> for ClaimInfoResponse {
    fn from(record: ProvisionRecord) -> Self {
        let status = record.status();
        Self {
            namespace: record.claim.namespace,
            name: record.claim.name,
            phase: record.phase,
            failed_in: record.failed_in,
            mode: record.admitted.parameters.to_string(),
            availability_domain: record.availability_domain,
            mount_target_id: record.mount_target_id,
            export_id: record.export_id,
            export_path: record.export_path,
            volume_name: status.volume_name,
            last_error: record.last_error,
            retry_count: record.retry_count,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Query for waiting on a phase
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    pub phase: ProvisionPhase,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    reconciler: Arc<Reconciler>,
}

impl RestRouter {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            reconciler: self.reconciler,
        };

        Router::new()
            .route("/v1/claims", get(list_claims).post(submit_claim))
            .route(
                "/v1/claims/:namespace/:name",
                get(get_claim).delete(delete_claim),
            )
            .route("/v1/claims/:namespace/:name/wait", get(wait_for_claim))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List every claim with a provision record
async fn list_claims(State(state): State<AppState>) -> Response {
    match state.reconciler.records().await {
        Ok(records) => {
            let claims: Vec<ClaimInfoResponse> = records.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(claims)).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "list_failed", &e),
    }
}

/// Get one claim's provision record
async fn get_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let claim = ClaimId::new(namespace, name);
    match state.reconciler.record(&claim).await {
        Ok(Some(record)) => (StatusCode::OK, Json(ClaimInfoResponse::from(record))).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &Error::not_found("Claim", claim.to_string()),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "get_failed", &e),
    }
}

/// Queue a claim for provisioning
async fn submit_claim(
    State(state): State<AppState>,
    Json(request): Json<SubmitClaimRequest>,
) -> Response {
    let capacity_bytes = match parse_capacity(&request.capacity) {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_capacity", &e),
    };

    let claim = ClaimId::new(request.namespace, request.name);
    info!(claim = %claim, "Claim submitted over the API");
    state.reconciler.submit(ClaimEvent::Upsert(VolumeClaimRequest {
        id: claim.clone(),
        uid: request.uid,
        storage_class: request.storage_class,
        capacity_bytes,
        access_modes: request.access_modes,
        zone: request.zone,
        annotations: request.annotations,
        parameters: request.parameters,
    }));

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "claim": claim.to_string(), "status": "queued" })),
    )
        .into_response()
}

/// Queue a claim for release
async fn delete_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let claim = ClaimId::new(namespace, name);
    info!(claim = %claim, "Claim deletion submitted over the API");
    state.reconciler.submit(ClaimEvent::Delete(claim));
    StatusCode::ACCEPTED.into_response()
}

/// Block until a claim reaches a phase (or fails)
async fn wait_for_claim(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(query): Query<WaitQuery>,
) -> Response {
    let claim = ClaimId::new(namespace, name);
    let timeout = Duration::from_secs(
        query
            .timeout_secs
            .unwrap_or(DEFAULT_WAIT_SECS)
            .min(MAX_WAIT_SECS),
    );
    debug!(claim = %claim, phase = %query.phase, ?timeout, "Waiting for claim phase");

    match state
        .reconciler
        .wait_for_phase(&claim, query.phase, timeout)
        .await
    {
        Ok(status) => (StatusCode::OK, Json::<ClaimStatus>(status)).into_response(),
        Err(e @ Error::WaitTimeout { .. }) => {
            error_response(StatusCode::REQUEST_TIMEOUT, "wait_timeout", &e)
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "wait_failed", &e),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.reconciler.backend_healthy().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "backend unavailable")
    }
}

fn error_response(status: StatusCode, code: &str, error: &Error) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: code.into(),
            message: error.to_string(),
        }),
    )
        .into_response()
}
