//! CSV download of a job's niches.

use axum::{
    extract::{Extension, Path, Query},
    http::header,
    response::IntoResponse,
};
use niche_discovery::JobId;
use serde::Deserialize;

use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    /// Single character; `;` when absent (spreadsheet locales that use `,` as
    /// the decimal separator open it directly).
    pub delimiter: Option<String>,
}

fn parse_delimiter(raw: Option<&str>) -> ApiResult<char> {
    match raw {
        None | Some("") => Ok(';'),
        Some("\\t") | Some("tab") => Ok('\t'),
        Some(value) => {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c != '"' && c != '\n' && c != '\r' => Ok(c),
                _ => Err(ApiError::BadRequest(format!(
                    "delimiter must be a single character, got {value:?}"
                ))),
            }
        }
    }
}

/// GET /api/jobs/:id/niches/export
pub async fn export_niches_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<JobId>,
    Query(params): Query<ExportParams>,
) -> ApiResult<impl IntoResponse> {
    let delimiter = parse_delimiter(params.delimiter.as_deref())?;
    let csv = state.results.export_niches_csv(job_id, delimiter).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"niches-{job_id}.csv\""),
            ),
        ],
        csv,
    ))
}
