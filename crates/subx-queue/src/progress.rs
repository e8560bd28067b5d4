//! Progress events via Redis Pub/Sub.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use subx_models::{JobId, JobKind, JobStatus};

use crate::error::QueueResult;

/// Progress event published to Redis and forwarded to websocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: &JobId, kind: JobKind, status: JobStatus, progress: u8) -> Self {
        Self {
            job_id: job_id.clone(),
            kind,
            status,
            progress: progress.min(100),
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether subscribers can stop listening.
    pub fn is_final(&self) -> bool {
        self.status.is_terminal()
    }
}

pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Channel for publishing/subscribing to progress events.
#[derive(Clone)]
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!(channel = %channel, progress = event.progress, "Publishing progress event");
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    pub async fn progress(&self, job_id: &JobId, kind: JobKind, value: u8) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, kind, JobStatus::Processing, value))
            .await
    }

    /// Report a step with a human readable message.
    pub async fn step(
        &self,
        job_id: &JobId,
        kind: JobKind,
        value: u8,
        message: impl Into<String>,
    ) -> QueueResult<()> {
        self.publish(
            &ProgressEvent::new(job_id, kind, JobStatus::Processing, value).with_message(message),
        )
        .await
    }

    pub async fn queued(&self, job_id: &JobId, kind: JobKind, message: impl Into<String>) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, kind, JobStatus::Queued, 0).with_message(message))
            .await
    }

    pub async fn completed(&self, job_id: &JobId, kind: JobKind) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, kind, JobStatus::Completed, 100))
            .await
    }

    pub async fn failed(&self, job_id: &JobId, kind: JobKind, error: impl Into<String>) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, kind, JobStatus::Failed, 0).with_message(error))
            .await
    }

    pub async fn cancelled(&self, job_id: &JobId, kind: JobKind) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, kind, JobStatus::Cancelled, 0))
            .await
    }

    /// Subscribe to progress events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(&self, job_id: &JobId) -> QueueResult<ProgressStream> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(job_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let id = JobId::from_string("j1");
        let event = ProgressEvent::new(&id, JobKind::Translate, JobStatus::Processing, 42);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["job_id"], "j1");
        assert_eq!(value["kind"], "translate");
        assert_eq!(value["status"], "processing");
        assert_eq!(value["progress"], 42);
        assert!(value.get("message").is_none());

        let back: ProgressEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_progress_is_capped_and_final() {
        let id = JobId::new();
        let event = ProgressEvent::new(&id, JobKind::Export, JobStatus::Processing, 150);
        assert_eq!(event.progress, 100);
        assert!(!event.is_final());

        let failed = ProgressEvent::new(&id, JobKind::Export, JobStatus::Failed, 0).with_message("boom");
        assert!(failed.is_final());
        assert_eq!(failed.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(ProgressChannel::channel_name(&JobId::from_string("abc")), "progress:abc");
    }
}
