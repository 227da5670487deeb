// crates/server/src/routes/output.rs
//! Rendered output download endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use evalhub_core::{download_filename, JobId};

use crate::error::ApiResult;
use crate::state::AppState;

/// Query parameter naming the format. Keys are matched case-insensitively.
const FORMAT_PARAM: &str = "output_format";

fn requested_format(params: &HashMap<String, String>) -> Option<&str> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(FORMAT_PARAM))
        .map(|(_, value)| value.as_str())
}

/// GET /evaluations/{evaluation_name}/output - Download an evaluation's output.
///
/// `?output_format=` picks json (default), csv or netcdf. The body is sent as
/// an attachment named after the evaluation.
pub async fn get_output(
    State(state): State<Arc<AppState>>,
    Path(evaluation_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let job = JobId::parse(&evaluation_name)?;
    let output = state
        .output
        .get_output(&job, requested_format(&params))
        .await?;

    let disposition = format!("attachment; filename={}", download_filename(&job, &output));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, output.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        output.raw_bytes,
    )
        .into_response())
}

/// Create the output routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/evaluations/{evaluation_name}/output", get(get_output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_param_is_case_insensitive() {
        let mut params = HashMap::new();
        params.insert("Output_Format".to_string(), "csv".to_string());
        assert_eq!(requested_format(&params), Some("csv"));

        params.clear();
        params.insert("format".to_string(), "csv".to_string());
        assert_eq!(requested_format(&params), None);
    }
}
