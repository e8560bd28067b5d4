//! Job queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

const DEDUP_TTL_SECS: u64 = 3600;
const RETRY_TTL_SECS: i64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL, credentials included
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Upper bound on retries, whatever the job kind allows
    pub max_retries: u32,
    /// How long a message may go without a heartbeat before another worker
    /// claims it
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "subx:jobs".to_string(),
            consumer_group: "subx:workers".to_string(),
            dlq_stream_name: "subx:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let base = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let username = std::env::var("REDIS_USERNAME").ok().filter(|s| !s.is_empty());
        let password = std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty());

        Self {
            redis_url: with_credentials(&base, username.as_deref(), password.as_deref()),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or_else(|_| "subx:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "subx:workers".to_string()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| "subx:dlq".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }

    /// How often a running job refreshes its message. Three beats fit in
    /// one visibility window.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.visibility_timeout / 3).max(Duration::from_secs(1))
    }

    pub fn claim_min_idle_ms(&self) -> u64 {
        self.visibility_timeout.as_millis() as u64
    }
}

/// Put credentials into a Redis URL that does not already carry them.
///
/// Unparseable URLs are returned untouched and fail later in `Client::open`.
fn with_credentials(base: &str, username: Option<&str>, password: Option<&str>) -> String {
    if username.is_none() && password.is_none() {
        return base.to_string();
    }
    let Ok(mut url) = Url::parse(base) else {
        return base.to_string();
    };
    if !url.username().is_empty() || url.password().is_some() {
        return base.to_string();
    }
    if let Some(user) = username {
        if url.set_username(user).is_err() {
            return base.to_string();
        }
    }
    if let Some(pass) = password {
        if url.set_password(Some(pass)).is_err() {
            return base.to_string();
        }
    }
    url.to_string()
}

fn dedup_key(idempotency_key: &str) -> String {
    format!("subx:dedup:{}", idempotency_key)
}

fn retry_key(job_id: &str) -> String {
    format!("subx:retry:{}", job_id)
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job, rejecting it while an equivalent job is live.
    pub async fn enqueue(&self, job: impl Into<QueueJob>) -> QueueResult<String> {
        let job = job.into();
        let mut conn = self.conn().await?;

        let idempotency_key = job.idempotency_key();
        let dedup = dedup_key(&idempotency_key);

        // SET NX claims the key atomically so two racing requests cannot both pass
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup)
            .arg(job.job_id().as_str())
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!(key = %idempotency_key, "Duplicate job rejected");
            return Err(QueueError::Duplicate(idempotency_key));
        }

        match self.xadd(&mut conn, &job, &idempotency_key).await {
            Ok(message_id) => {
                info!(job_id = %job.job_id(), kind = job.kind().as_str(), message_id = %message_id, "Enqueued job");
                Ok(message_id)
            }
            Err(e) => {
                conn.del::<_, ()>(&dedup).await.ok();
                Err(e)
            }
        }
    }

    /// Add a job again after a failed attempt. Skips the dedup check.
    pub async fn requeue(&self, job: &QueueJob) -> QueueResult<String> {
        let mut conn = self.conn().await?;
        let idempotency_key = job.idempotency_key();
        let message_id = self.xadd(&mut conn, job, &idempotency_key).await?;
        info!(job_id = %job.job_id(), message_id = %message_id, "Requeued job");
        Ok(message_id)
    }

    async fn xadd(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &QueueJob,
        idempotency_key: &str,
    ) -> QueueResult<String> {
        let payload = serde_json::to_string(job)?;
        redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(idempotency_key)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))
    }

    /// Acknowledge a message and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(job_id = %job.job_id(), "Moved job to DLQ: {}", error);
        Ok(())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }

    /// Read new messages for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.conn().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::DequeueFailed(e.to_string()))?;

        let mut jobs = Vec::new();
        for stream_key in result.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                if let Some(job) = self.decode_entry(&entry.id, &entry.map).await {
                    debug!(job_id = %job.job_id(), "Consumed job");
                    jobs.push((entry.id, job));
                }
            }
        }

        Ok(jobs)
    }

    /// Claim messages left pending by a crashed worker.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.conn().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(Vec::new());
        }

        let result: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for entry in result.claimed {
            if let Some(job) = self.decode_entry(&entry.id, &entry.map).await {
                info!(job_id = %job.job_id(), "Claimed pending job");
                jobs.push((entry.id, job));
            }
        }

        Ok(jobs)
    }

    /// Reset the idle time of a message this consumer is working on.
    ///
    /// Returns false once the message has left the pending list.
    pub async fn touch(&self, consumer_name: &str, message_id: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;

        let ids: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        Ok(!ids.is_empty())
    }

    async fn decode_entry(
        &self,
        message_id: &str,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<QueueJob> {
        let parsed = match map.get("job") {
            Some(redis::Value::BulkString(payload)) => serde_json::from_slice::<QueueJob>(payload)
                .map_err(|e| e.to_string()),
            _ => Err("missing job field".to_string()),
        };
        match parsed {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(message_id, "Dropping malformed job payload: {}", e);
                self.ack(message_id).await.ok();
                None
            }
        }
    }

    pub async fn get_retry_count(&self, job_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;
        let count: Option<u32> = conn.get(retry_key(job_id)).await?;
        Ok(count.unwrap_or(0))
    }

    /// Count a failed attempt. The counter lives for 24 hours.
    pub async fn increment_retry(&self, job_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn().await?;
        let key = retry_key(job_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_TTL_SECS).await?;
        Ok(count)
    }

    pub async fn clear_retry(&self, job_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(retry_key(job_id)).await?;
        Ok(())
    }

    /// Allow an equivalent job to be enqueued again.
    pub async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        self.clear_dedup_key(&job.idempotency_key()).await
    }

    pub async fn clear_dedup_key(&self, idempotency_key: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(dedup_key(idempotency_key)).await?;
        Ok(())
    }

    /// Retry budget for a job, capped by the configured maximum.
    pub fn max_retries(&self, job: &QueueJob) -> u32 {
        job.max_retries().min(self.config.max_retries)
    }

    /// Take a marker key for `ttl_secs`. Returns false if someone else holds it.
    pub async fn acquire_marker(&self, key: &str, ttl_secs: u64) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_with_credentials() {
        assert_eq!(
            with_credentials("redis://cache:6379", None, Some("s3cret")),
            "redis://:s3cret@cache:6379"
        );
        assert_eq!(
            with_credentials("rediss://cache:6380/0", Some("default"), Some("pw")),
            "rediss://default:pw@cache:6380/0"
        );
        // Existing credentials win
        assert_eq!(
            with_credentials("redis://u:p@cache:6379", Some("x"), Some("y")),
            "redis://u:p@cache:6379"
        );
        assert_eq!(with_credentials("not a url", None, Some("pw")), "not a url");
        assert_eq!(with_credentials("redis://cache", None, None), "redis://cache");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_and_overrides() {
        for var in [
            "REDIS_URL",
            "REDIS_USERNAME",
            "REDIS_PASSWORD",
            "QUEUE_STREAM",
            "QUEUE_MAX_RETRIES",
        ] {
            std::env::remove_var(var);
        }
        let config = QueueConfig::from_env();
        assert_eq!(config.stream_name, "subx:jobs");
        assert_eq!(config.dlq_stream_name, "subx:dlq");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.visibility_timeout, Duration::from_secs(600));

        std::env::set_var("REDIS_URL", "redis://cache:6379");
        std::env::set_var("REDIS_PASSWORD", "pw");
        std::env::set_var("QUEUE_MAX_RETRIES", "1");
        let config = QueueConfig::from_env();
        assert_eq!(config.redis_url, "redis://:pw@cache:6379");
        assert_eq!(config.max_retries, 1);

        std::env::remove_var("REDIS_URL");
        std::env::remove_var("REDIS_PASSWORD");
        std::env::remove_var("QUEUE_MAX_RETRIES");
    }

    #[test]
    fn test_heartbeat_fits_visibility_window() {
        let config = QueueConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(200));
        assert_eq!(config.claim_min_idle_ms(), 600_000);

        let tight = QueueConfig {
            visibility_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(tight.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_keys() {
        assert_eq!(dedup_key("export:p1"), "subx:dedup:export:p1");
        assert_eq!(retry_key("j1"), "subx:retry:j1");
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = QueueConfig {
            redis_url: "nope://".into(),
            ..Default::default()
        };
        assert!(matches!(
            JobQueue::new(config),
            Err(QueueError::ConnectionFailed(_))
        ));
    }
}
