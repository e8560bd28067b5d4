//! Redis Streams integration tests.
//!
//! Run with a local Redis: `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`

use std::time::Duration;

use futures_util::StreamExt;

use subx_models::{ExportConfig, JobId, JobKind, JobStatus, ProjectId};
use subx_queue::{
    extract_key, ExportVideoJob, ExtractTracksJob, JobQueue, ProgressChannel, QueueConfig,
    QueueError, QueueJob,
};

/// Streams unique to one test so runs do not see each other's messages.
fn isolated_queue() -> JobQueue {
    let suffix = JobId::new();
    let config = QueueConfig {
        stream_name: format!("subx:test:jobs:{}", suffix),
        consumer_group: format!("subx:test:workers:{}", suffix),
        dlq_stream_name: format!("subx:test:dlq:{}", suffix),
        ..QueueConfig::from_env()
    };
    JobQueue::new(config).unwrap()
}

fn extract_job(project_id: &ProjectId) -> ExtractTracksJob {
    ExtractTracksJob::new(
        JobId::new(),
        "test-user",
        project_id.clone(),
        "uploads/abc/movie.mkv",
        "movie.mkv",
    )
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = isolated_queue();
    queue.init().await.unwrap();
    queue.ping().await.unwrap();

    let project_id = ProjectId::new();
    let job = extract_job(&project_id);
    let job_id = job.job_id.clone();

    queue.enqueue(job).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    let jobs = queue.consume("test-consumer", 1000, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let (message_id, consumed) = &jobs[0];
    assert_eq!(consumed.job_id(), &job_id);
    assert_eq!(consumed.kind(), JobKind::Extract);

    queue.ack(message_id).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);
    queue.clear_dedup(consumed).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_jobs_are_rejected() {
    let queue = isolated_queue();
    queue.init().await.unwrap();

    let project_id = ProjectId::new();
    queue.enqueue(extract_job(&project_id)).await.unwrap();

    let err = queue.enqueue(extract_job(&project_id)).await.unwrap_err();
    assert!(matches!(err, QueueError::Duplicate(ref key) if *key == extract_key(&project_id)));

    // Another kind for the same project is independent
    let export = ExportVideoJob::new(JobId::new(), "test-user", project_id.clone(), ExportConfig::default());
    queue.enqueue(export).await.unwrap();

    // Cancelling clears the key so the user can retry
    queue.clear_dedup_key(&extract_key(&project_id)).await.unwrap();
    queue.enqueue(extract_job(&project_id)).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dead_letter_queue() {
    let queue = isolated_queue();
    queue.init().await.unwrap();

    let job = extract_job(&ProjectId::new());
    queue.enqueue(job.clone()).await.unwrap();

    let jobs = queue.consume("test-dlq-consumer", 1000, 1).await.unwrap();
    let (message_id, _) = &jobs[0];

    let queue_job = QueueJob::ExtractTracks(job);
    assert_eq!(queue.increment_retry(queue_job.job_id().as_str()).await.unwrap(), 1);
    queue.dlq(message_id, &queue_job, "ffprobe failed").await.unwrap();

    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 0);
    queue.clear_retry(queue_job.job_id().as_str()).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_events_reach_subscribers() {
    let config = QueueConfig::from_env();
    let progress = ProgressChannel::new(&config.redis_url).unwrap();
    let job_id = JobId::new();

    let mut stream = progress.subscribe(&job_id).await.unwrap();

    progress.progress(&job_id, JobKind::Translate, 50).await.unwrap();
    progress.completed(&job_id, JobKind::Translate).await.unwrap();

    let events: Vec<_> = tokio::time::timeout(Duration::from_secs(2), async {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            let done = event.is_final();
            events.push(event);
            if done {
                break;
            }
        }
        events
    })
    .await
    .unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].progress, 50);
    assert_eq!(events[1].status, JobStatus::Completed);
}
