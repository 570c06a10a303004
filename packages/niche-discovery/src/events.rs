//! Pipeline progress events.
//!
//! The pipeline publishes to an [`EventBus`] at stage boundaries and on each
//! URL status change. Delivery is fire-and-forget: nothing in the pipeline
//! waits on, or depends on, a subscriber receiving anything.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::pipeline::{Stage, StageReport};
use crate::types::{JobId, JobStatus, UrlId, UrlStatus};

/// Something observable happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    JobCreated {
        job_id: JobId,
        project_id: String,
    },
    StageStarted {
        job_id: JobId,
        stage: Stage,
    },
    StageCompleted {
        job_id: JobId,
        report: StageReport,
    },
    UrlStatusChanged {
        job_id: JobId,
        url_id: UrlId,
        status: UrlStatus,
    },
    JobFinished {
        job_id: JobId,
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl PipelineEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            PipelineEvent::JobCreated { job_id, .. }
            | PipelineEvent::StageStarted { job_id, .. }
            | PipelineEvent::StageCompleted { job_id, .. }
            | PipelineEvent::UrlStatusChanged { job_id, .. }
            | PipelineEvent::JobFinished { job_id, .. } => *job_id,
        }
    }

    /// Dotted name for external monitors (`job.created`, `stage.completed`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::JobCreated { .. } => "job.created",
            PipelineEvent::StageStarted { .. } => "stage.started",
            PipelineEvent::StageCompleted { .. } => "stage.completed",
            PipelineEvent::UrlStatusChanged { .. } => "url.status_changed",
            PipelineEvent::JobFinished { .. } => "job.finished",
        }
    }
}

/// Sink for pipeline events.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: PipelineEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, _event: PipelineEvent) {}
}

/// In-process per-job pub/sub over `tokio::sync::broadcast`.
///
/// Cloneable; clones share channels. Slow subscribers lag and lose the
/// oldest events rather than blocking the pipeline.
#[derive(Clone)]
pub struct BroadcastEventBus {
    channels: Arc<RwLock<HashMap<JobId, broadcast::Sender<PipelineEvent>>>>,
    capacity: usize,
}

impl BroadcastEventBus {
    /// 256 events per job channel.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a job's events. Creates the channel if needed.
    pub async fn subscribe(&self, job_id: JobId) -> broadcast::Receiver<PipelineEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop channels nobody listens to.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: PipelineEvent) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&event.job_id()) {
            // No receivers is fine
            let _ = tx.send(event);
        }
    }
}
