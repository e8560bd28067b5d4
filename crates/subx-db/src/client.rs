//! Supabase PostgREST client.
//!
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter
//! - Observability (tracing spans, metrics)

use std::fmt::Display;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, CONTENT_RANGE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::error::{DbError, DbResult};
use crate::metrics::record_request;
use crate::retry::{with_retry, RetryConfig};

/// PostgREST client configuration.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Service role key; bypasses row level security
    pub service_role_key: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, service_role_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_role_key: service_role_key.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    pub fn from_env() -> DbResult<Self> {
        let url = std::env::var("SUPABASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DbError::config("SUPABASE_URL must be set"))?;
        let key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DbError::config("SUPABASE_SERVICE_ROLE_KEY must be set"))?;

        let connect_timeout_secs: u64 = std::env::var("DB_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(url, key)
        })
    }
}

/// A filtered request against one table.
#[derive(Debug, Clone)]
pub struct Query {
    table: String,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            params: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    fn filter(mut self, column: &str, op: &str, value: impl Display) -> Self {
        self.params.push((column.to_string(), format!("{}.{}", op, value)));
        self
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".to_string(), columns.to_string()));
        self
    }

    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "eq", value)
    }

    pub fn neq(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "neq", value)
    }

    pub fn lt(self, column: &str, value: impl Display) -> Self {
        self.filter(column, "lt", value)
    }

    pub fn is_null(self, column: &str) -> Self {
        self.filter(column, "is", "null")
    }

    pub fn in_list<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        let joined = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.filter(column, "in", format!("({})", joined))
    }

    pub fn order(mut self, column: &str, descending: bool) -> Self {
        let direction = if descending { "desc" } else { "asc" };
        self.params
            .push(("order".to_string(), format!("{}.{}", column, direction)));
        self
    }

    pub fn limit(mut self, count: usize) -> Self {
        self.params.push(("limit".to_string(), count.to_string()));
        self
    }
}

/// PostgREST REST client.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    config: SupabaseConfig,
    rest_url: String,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> DbResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("subx-db/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(DbError::Network)?;

        let rest_url = format!("{}/rest/v1", config.url.trim_end_matches('/'));

        Ok(Self {
            http,
            config,
            rest_url,
        })
    }

    pub fn from_env() -> DbResult<Self> {
        Self::new(SupabaseConfig::from_env()?)
    }

    pub fn rest_url(&self) -> &str {
        &self.rest_url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let key = &self.config.service_role_key;
        self.http
            .request(method, format!("{}/{}", self.rest_url, path))
            .header("apikey", key)
            .bearer_auth(key)
    }

    /// `SELECT` rows matching the query.
    pub async fn select<T: DeserializeOwned>(&self, query: &Query) -> DbResult<Vec<T>> {
        let operation = "select";
        with_retry(&self.config.retry, operation, || {
            self.execute_request(operation, query.name(), async {
                let response = self
                    .request(Method::GET, query.name())
                    .query(query.params())
                    .send()
                    .await?;
                Self::parse_rows(response).await
            })
        })
        .await
    }

    /// First row matching the query, if any.
    pub async fn select_one<T: DeserializeOwned>(&self, query: &Query) -> DbResult<Option<T>> {
        let rows = self.select(&query.clone().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Insert one row and return the stored representation.
    pub async fn insert<T, B>(&self, table: &str, body: &B) -> DbResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let operation = "insert";
        let body = serde_json::to_value(body)?;

        let rows: Vec<T> = with_retry(&self.config.retry, operation, || {
            self.execute_request(operation, table, async {
                let response = self
                    .request(Method::POST, table)
                    .header("Prefer", "return=representation")
                    .json(&body)
                    .send()
                    .await?;
                Self::parse_rows(response).await
            })
        })
        .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::InvalidResponse(format!("insert into {} returned no row", table)))
    }

    /// `PATCH` matching rows, returning the updated rows.
    pub async fn update<T, B>(&self, query: &Query, body: &B) -> DbResult<Vec<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let operation = "update";
        let body = serde_json::to_value(body)?;

        with_retry(&self.config.retry, operation, || {
            self.execute_request(operation, query.name(), async {
                let response = self
                    .request(Method::PATCH, query.name())
                    .query(query.params())
                    .header("Prefer", "return=representation")
                    .json(&body)
                    .send()
                    .await?;
                Self::parse_rows(response).await
            })
        })
        .await
    }

    /// Delete matching rows, returning how many were removed.
    pub async fn delete(&self, query: &Query) -> DbResult<u64> {
        let operation = "delete";
        let rows: Vec<Value> = with_retry(&self.config.retry, operation, || {
            self.execute_request(operation, query.name(), async {
                let response = self
                    .request(Method::DELETE, query.name())
                    .query(query.params())
                    .header("Prefer", "return=representation")
                    .send()
                    .await?;
                Self::parse_rows(response).await
            })
        })
        .await?;
        Ok(rows.len() as u64)
    }

    /// Number of rows matching the query, read from `Content-Range`.
    pub async fn count(&self, query: &Query) -> DbResult<u64> {
        let operation = "count";
        with_retry(&self.config.retry, operation, || {
            self.execute_request(operation, query.name(), async {
                let response = self
                    .request(Method::HEAD, query.name())
                    .query(query.params())
                    .header("Prefer", "count=exact")
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Self::handle_error_response(status, query.name(), response).await);
                }
                response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total)
                    .ok_or_else(|| {
                        DbError::InvalidResponse(format!("{}: missing row count", query.name()))
                    })
            })
        })
        .await
    }

    /// Call a Postgres function through `/rpc/{name}`.
    pub async fn rpc<T: DeserializeOwned>(&self, function: &str, params: &Value) -> DbResult<T> {
        let operation = "rpc";
        let path = format!("rpc/{}", function);

        with_retry(&self.config.retry, operation, || {
            self.execute_request(operation, function, async {
                let response = self.request(Method::POST, &path).json(params).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Self::handle_error_response(status, &path, response).await);
                }
                let text = response.text().await?;
                let text = if text.trim().is_empty() { "null" } else { text.as_str() };
                Ok(serde_json::from_str(text)?)
            })
        })
        .await
    }

    async fn parse_rows<T: DeserializeOwned>(response: reqwest::Response) -> DbResult<Vec<T>> {
        let status = response.status();
        let url = response.url().path().to_string();

        if !status.is_success() {
            return Err(Self::handle_error_response(status, &url, response).await);
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            debug!(body = %text.chars().take(300).collect::<String>(), "Unparseable PostgREST body");
            DbError::InvalidResponse(format!("{}: {}", url, e))
        })
    }

    fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000)
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: reqwest::Response,
    ) -> DbError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return DbError::RateLimited(Self::retry_after_ms(response.headers()).unwrap_or(1000));
        }
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(300).collect();
        DbError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }

    async fn execute_request<T, F>(&self, operation: &str, table: &str, fut: F) -> DbResult<T>
    where
        F: std::future::Future<Output = DbResult<T>>,
    {
        let span = info_span!("db_request", operation = %operation, table = %table);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }
}

/// Total from a `Content-Range` value such as `0-24/3573` or `*/0`.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use serial_test::serial;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
        n: i64,
    }

    fn client(server: &MockServer) -> SupabaseClient {
        let mut config = SupabaseConfig::new(server.uri(), "service-key");
        config.retry = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
        };
        SupabaseClient::new(config).unwrap()
    }

    #[test]
    fn test_query_builder() {
        let q = Query::table("jobs")
            .eq("project_id", "p1")
            .in_list("status", ["queued", "processing"])
            .lt("expires_at", "2024-01-01T00:00:00Z")
            .order("created_at", true)
            .limit(5);
        assert_eq!(q.name(), "jobs");
        assert_eq!(
            q.params(),
            &[
                ("project_id".to_string(), "eq.p1".to_string()),
                ("status".to_string(), "in.(queued,processing)".to_string()),
                ("expires_at".to_string(), "lt.2024-01-01T00:00:00Z".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::remove_var("SUPABASE_URL");
        std::env::remove_var("SUPABASE_SERVICE_ROLE_KEY");
        assert!(SupabaseConfig::from_env().is_err());

        std::env::set_var("SUPABASE_URL", "https://abc.supabase.co/");
        std::env::set_var("SUPABASE_SERVICE_ROLE_KEY", "key");
        std::env::remove_var("DB_CONNECT_TIMEOUT_SECS");
        let config = SupabaseConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));

        let client = SupabaseClient::new(config).unwrap();
        assert_eq!(client.rest_url(), "https://abc.supabase.co/rest/v1");

        std::env::remove_var("SUPABASE_URL");
        std::env::remove_var("SUPABASE_SERVICE_ROLE_KEY");
    }

    #[tokio::test]
    async fn test_select_sends_auth_headers_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/projects"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .and(query_param("user_id", "eq.u1"))
            .and(query_param("order", "created_at.desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "a", "n": 1},
                {"id": "b", "n": 2}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let rows: Vec<Row> = client(&server)
            .select(&Query::table("projects").eq("user_id", "u1").order("created_at", true))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], Row { id: "b".into(), n: 2 });
    }

    #[tokio::test]
    async fn test_insert_returns_representation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/jobs"))
            .and(header("prefer", "return=representation"))
            .and(body_json(json!({"id": "j1", "n": 3})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": "j1", "n": 3}])))
            .mount(&server)
            .await;

        let row: Row = client(&server)
            .insert("jobs", &json!({"id": "j1", "n": 3}))
            .await
            .unwrap();
        assert_eq!(row.id, "j1");
    }

    #[tokio::test]
    async fn test_conflict_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/jobs"))
            .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .insert::<Row, _>("jobs", &json!({"id": "j1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/projects"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/projects"))
            .and(query_param("id", "eq.p1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "p1", "n": 9}])))
            .mount(&server)
            .await;

        let rows: Vec<Row> = client(&server)
            .update(&Query::table("projects").eq("id", "p1"), &json!({"n": 9}))
            .await
            .unwrap();
        assert_eq!(rows[0].n, 9);
    }

    #[tokio::test]
    async fn test_rate_limit_honours_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let rows: Vec<Row> = client(&server).select(&Query::table("jobs")).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_delete_counts_and_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/stored_files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/check_and_reset_daily_jobs"))
            .and(body_json(json!({"user_id_param": "u1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(2)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/increment_daily_jobs"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let c = client(&server);
        let deleted = c
            .delete(&Query::table("stored_files").in_list("id", [1, 2]))
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let used: i64 = c
            .rpc("check_and_reset_daily_jobs", &json!({"user_id_param": "u1"}))
            .await
            .unwrap();
        assert_eq!(used, 2);

        let nothing: Value = c
            .rpc("increment_daily_jobs", &json!({"user_id_param": "u1"}))
            .await
            .unwrap();
        assert!(nothing.is_null());
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("0-24/3573"), Some(3573));
        assert_eq!(content_range_total("*/0"), Some(0));
        assert_eq!(content_range_total("0-24/*"), None);
    }

    #[tokio::test]
    async fn test_count_uses_exact_count() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rest/v1/jobs"))
            .and(query_param("status", "eq.failed"))
            .and(header("Prefer", "count=exact"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "0-2/3"))
            .mount(&server)
            .await;

        let c = client(&server);
        let n = c
            .count(&Query::table("jobs").eq("status", "failed"))
            .await
            .unwrap();
        assert_eq!(n, 3);
    }
}
