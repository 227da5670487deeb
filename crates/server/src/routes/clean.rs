// crates/server/src/routes/clean.rs
//! Evaluation cleanup endpoint.

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use evalhub_core::{CleanupStatus, JobId};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_cleanup;
use crate::state::AppState;

/// Body of a cleanup request, accepted as a form or as JSON.
#[derive(Debug, Default, Deserialize)]
pub struct CleanRequest {
    #[serde(default)]
    pub evaluation_id: Option<String>,
}

pub fn status_for(status: CleanupStatus) -> StatusCode {
    match status {
        CleanupStatus::Success => StatusCode::OK,
        CleanupStatus::StillRunning => StatusCode::ACCEPTED,
        CleanupStatus::NotFound => StatusCode::NOT_FOUND,
        CleanupStatus::PartialFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /evaluations/clean - Remove a finished evaluation's records and artifacts.
///
/// The body must carry `evaluation_id`; without it nothing is touched and a
/// 400 comes back. Otherwise the cleanup report is returned with a status
/// reflecting its outcome.
pub async fn clean_evaluation(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> ApiResult<Response> {
    let body = read_body(request).await?;
    let job = JobId::parse(body.evaluation_id.as_deref().unwrap_or_default())?;

    tracing::info!(evaluation = %job, "Cleanup requested");
    let result = state.cleanup.clean(&job).await;
    record_cleanup(result.status.as_str());

    Ok((status_for(result.status), Json(result)).into_response())
}

async fn read_body(request: Request) -> ApiResult<CleanRequest> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        let Json(body) = Json::<CleanRequest>::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(body)
    } else {
        let Form(body) = Form::<CleanRequest>::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(body)
    }
}

/// Create the cleanup routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/evaluations/clean", post(clean_evaluation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(CleanupStatus::Success), StatusCode::OK);
        assert_eq!(status_for(CleanupStatus::StillRunning), StatusCode::ACCEPTED);
        assert_eq!(status_for(CleanupStatus::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(CleanupStatus::PartialFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_clean_request_tolerates_missing_field() {
        let body: CleanRequest = serde_json::from_str("{}").unwrap();
        assert!(body.evaluation_id.is_none());
    }
}
