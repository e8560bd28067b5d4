//! OpenAI chat completions, and OpenRouter over the same protocol.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{api_error, http_client, TranslationEngine};
use crate::error::{TranslateError, TranslateResult};
use crate::prompt::{parse_numbered_response, system_prompt, user_message};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

const OPENAI_DEFAULT_MODEL: &str = "gpt-4-turbo";
const OPENROUTER_DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Engine speaking the OpenAI chat completions protocol.
pub struct OpenAiEngine {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    name: &'static str,
}

impl OpenAiEngine {
    pub fn new(api_key: &str, model: Option<&str>) -> TranslateResult<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            model: model.unwrap_or(OPENAI_DEFAULT_MODEL).to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            name: "openai",
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TranslationEngine for OpenAiEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn translate_batch(
        &self,
        lines: &[String],
        source_lang: &str,
        target_lang: &str,
        context: Option<&[String]>,
        overlap_count: usize,
    ) -> TranslateResult<Vec<String>> {
        let overlap = overlap_count.min(lines.len());
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(source_lang, target_lang, overlap),
                },
                ChatMessage {
                    role: "user",
                    content: user_message(lines, context),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        debug!(engine = self.name, model = %self.model, lines = lines.len(), "Sending chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(self.name, response).await);
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| TranslateError::invalid_response(format!("{}: empty completion", self.name)))?;

        let mut translated = parse_numbered_response(content.trim(), lines.len());
        Ok(translated.split_off(overlap))
    }
}

/// OpenRouter: the OpenAI protocol against openrouter.ai.
pub struct OpenRouterEngine(OpenAiEngine);

impl OpenRouterEngine {
    pub fn new(api_key: &str, model: Option<&str>) -> TranslateResult<Self> {
        let mut inner = OpenAiEngine::new(api_key, Some(model.unwrap_or(OPENROUTER_DEFAULT_MODEL)))?
            .with_base_url(OPENROUTER_BASE_URL);
        inner.name = "openrouter";
        Ok(Self(inner))
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self(self.0.with_base_url(base_url))
    }
}

#[async_trait]
impl TranslationEngine for OpenRouterEngine {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn translate_batch(
        &self,
        lines: &[String],
        source_lang: &str,
        target_lang: &str,
        context: Option<&[String]>,
        overlap_count: usize,
    ) -> TranslateResult<Vec<String>> {
        self.0
            .translate_batch(lines, source_lang, target_lang, context, overlap_count)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn completion(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
    }

    #[tokio::test]
    async fn test_translate_batch_drops_overlap() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(completion("1. bir\n2. iki\n3. üç"))
            .expect(1)
            .mount(&server)
            .await;

        let engine = OpenAiEngine::new("sk-test", None).unwrap().with_base_url(server.uri());
        let out = engine
            .translate_batch(&lines(&["one", "two", "three"]), "en", "tr", None, 1)
            .await
            .unwrap();
        assert_eq!(out, lines(&["iki", "üç"]));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], "gpt-4-turbo");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "1. one\n2. two\n3. three");
    }

    #[tokio::test]
    async fn test_api_error_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let engine = OpenAiEngine::new("bad", None).unwrap().with_base_url(server.uri());
        let err = engine
            .translate_batch(&lines(&["x"]), "en", "tr", None, 0)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_empty_completion_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let engine = OpenAiEngine::new("k", None).unwrap().with_base_url(server.uri());
        let err = engine
            .translate_batch(&lines(&["x"]), "en", "tr", None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidResponse(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_openrouter_uses_own_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(completion("1. hola"))
            .mount(&server)
            .await;

        let engine = OpenRouterEngine::new("or-key", None)
            .unwrap()
            .with_base_url(server.uri());
        assert_eq!(engine.name(), "openrouter");
        let out = engine
            .translate_batch(&lines(&["hello"]), "en", "es", None, 0)
            .await
            .unwrap();
        assert_eq!(out, lines(&["hola"]));

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], OPENROUTER_DEFAULT_MODEL);
    }
}
