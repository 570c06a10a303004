//! SSE progress stream.
//!
//! GET /api/jobs/:id/events
//!
//! Subscribes to the job's broadcast channel and forwards pipeline events,
//! named by their dotted event name with the JSON body as data. A slow
//! client that falls behind receives a `lagged` event with the number of
//! events it missed.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use niche_discovery::JobId;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::server::app::AppState;
use crate::server::error::ApiResult;

/// SSE stream handler. Unknown jobs are rejected with 404.
pub async fn events_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>> {
    let job = state.pipeline.get_job(job_id).await?;
    let rx = state.events.subscribe(job_id).await;

    let connected = stream::once(async move {
        Ok::<_, Infallible>(
            Event::default()
                .event("connected")
                .json_data(&serde_json::json!({ "job_id": job_id, "status": job.status }))
                .unwrap_or_else(|_| Event::default().event("connected").data("ok")),
        )
    });

    let events = BroadcastStream::new(rx).filter_map(|result| async {
        match result {
            Ok(event) => Event::default()
                .event(event.name())
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                .event("lagged")
                .json_data(&serde_json::json!({ "missed": n }))
                .ok()
                .map(Ok),
        }
    });

    Ok(Sse::new(connected.chain(events)).keep_alive(KeepAlive::default()))
}
