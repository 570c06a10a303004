//! URL review endpoints: listing, selection, manual retry.

use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use chrono::{DateTime, Utc};
use niche_discovery::{
    DiscoveryError, DiscoveryStore, JobId, SelectionSummary, SourceType, UrlId, UrlQuery,
    UrlRecord, UrlStatus,
};
use serde::{Deserialize, Serialize};

use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct ListUrlsParams {
    pub status: Option<String>,
    #[serde(default)]
    pub selected_only: bool,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl ListUrlsParams {
    fn into_query(self) -> ApiResult<UrlQuery> {
        let status = self
            .status
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<UrlStatus>()
                    .map_err(|_| ApiError::BadRequest(format!("unknown url status: {s}")))
            })
            .transpose()?;

        Ok(UrlQuery {
            status,
            selected_only: self.selected_only,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// A URL row without its scraped content.
#[derive(Debug, Serialize)]
pub struct UrlView {
    pub id: UrlId,
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub position: u32,
    pub source_type: SourceType,
    pub life_context: String,
    pub product_word: String,
    pub status: UrlStatus,
    pub word_count: Option<u32>,
    pub error_message: Option<String>,
    pub filtered_reason: Option<String>,
    pub selected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UrlRecord> for UrlView {
    fn from(record: UrlRecord) -> Self {
        Self {
            id: record.id,
            url: record.url,
            title: record.title,
            snippet: record.snippet,
            position: record.position,
            source_type: record.source_type,
            life_context: record.life_context,
            product_word: record.product_word,
            status: record.status,
            word_count: record.word_count,
            error_message: record.error_message,
            filtered_reason: record.filtered_reason,
            selected: record.selected,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UrlListResponse {
    pub urls: Vec<UrlView>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
    pub selection: SelectionSummary,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUrlRequest {
    pub selected: bool,
}

#[derive(Debug, Serialize)]
pub struct UrlStatusResponse {
    pub url_id: UrlId,
    pub status: UrlStatus,
    pub selected: bool,
}

/// Fetch a URL and check it belongs to the job in the path.
async fn url_of_job(state: &AppState, job_id: JobId, url_id: UrlId) -> ApiResult<UrlRecord> {
    let url = state
        .pipeline
        .store()
        .get_url(url_id)
        .await
        .map_err(DiscoveryError::from)?;

    match url {
        Some(url) if url.job_id == job_id => Ok(url),
        _ => Err(ApiError::NotFound(format!(
            "url {url_id} not found in job {job_id}"
        ))),
    }
}

/// GET /api/jobs/:id/urls
pub async fn list_urls_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<JobId>,
    Query(params): Query<ListUrlsParams>,
) -> ApiResult<Json<UrlListResponse>> {
    let query = params.into_query()?;
    let page = state.results.list_urls(job_id, &query).await?;

    Ok(Json(UrlListResponse {
        urls: page.urls.into_iter().map(UrlView::from).collect(),
        total: page.total,
        limit: page.limit,
        offset: page.offset,
        selection: page.selection,
    }))
}

/// PATCH /api/jobs/:id/urls/:url_id
pub async fn update_url_handler(
    Extension(state): Extension<AppState>,
    Path((job_id, url_id)): Path<(JobId, UrlId)>,
    Json(request): Json<UpdateUrlRequest>,
) -> ApiResult<Json<UrlStatusResponse>> {
    let url = url_of_job(&state, job_id, url_id).await?;
    state.pipeline.set_selected(url_id, request.selected).await?;

    Ok(Json(UrlStatusResponse {
        url_id,
        status: url.status,
        selected: request.selected,
    }))
}

/// POST /api/jobs/:id/urls/:url_id/retry
pub async fn retry_url_handler(
    Extension(state): Extension<AppState>,
    Path((job_id, url_id)): Path<(JobId, UrlId)>,
) -> ApiResult<Json<UrlStatusResponse>> {
    let url = url_of_job(&state, job_id, url_id).await?;
    let status = state.pipeline.retry_url(url_id).await?;

    Ok(Json(UrlStatusResponse {
        url_id,
        status,
        selected: url.selected,
    }))
}
