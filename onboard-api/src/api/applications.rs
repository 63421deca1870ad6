//! Application submission and retrieval endpoints

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use onboard_common::validation::validate_submission;
use onboard_common::CanonicalRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tracing::info;

use crate::db::{self, ApplicationSummary, AuditContext, PersistenceError};
use crate::error::{ApiError, ApiResult};
use crate::pagination::{PageRequest, Pagination};
use crate::AppState;

pub const SUBMITTED_MESSAGE: &str = "Application submitted successfully!";
pub const DUPLICATE_CIF_MESSAGE: &str = "An application with this CIF already exists.";

/// Submission acknowledgement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub message: &'static str,
    pub application_id: String,
    pub status: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub applications: Vec<ApplicationSummary>,
    pub pagination: Pagination,
}

/// Client address and agent for the audit trail
///
/// The first `X-Forwarded-For` hop is preferred over the socket peer.
fn audit_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> AuditContext {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    AuditContext {
        ip_address: forwarded.or_else(|| peer.map(|addr| addr.ip().to_string())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// POST /api/v2/submit-application
pub async fn submit_application(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let record = CanonicalRecord::from_json(body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let record = validate_submission(record)?;

    let audit = audit_context(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    let id = db::create_application(&state.db, &record, &audit)
        .await
        .map_err(|e| match e {
            PersistenceError::DuplicateKey { .. } => {
                ApiError::Conflict(DUPLICATE_CIF_MESSAGE.to_string())
            }
            other => ApiError::from(other),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            message: SUBMITTED_MESSAGE,
            application_id: id.to_string(),
            status: db::applications::STATUS_PENDING,
        }),
    ))
}

/// GET /api/v2/applications
pub async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let page = PageRequest::new(query.page, query.limit);
    let status = query.status.as_deref().filter(|s| !s.trim().is_empty());

    let (applications, total) = db::list_applications(&state.db, status, page).await?;
    info!(page = page.page, total, "Listing applications");

    Ok(Json(ListResponse {
        applications,
        pagination: page.with_total(total),
    }))
}

/// GET /api/v2/applications/:id
pub async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    db::get_application(&state.db, &id)
        .await?
        .map(|stored| Json(stored.to_json()))
        .ok_or_else(|| ApiError::NotFound(format!("Application {}", id)))
}

pub fn application_routes() -> Router<AppState> {
    Router::new()
        .route("/submit-application", post(submit_application))
        .route("/applications", get(list_applications))
        .route("/applications/:id", get(get_application))
}
