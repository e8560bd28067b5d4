//! Google Gemini `generateContent`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{api_error, http_client, TranslationEngine};
use crate::error::{TranslateError, TranslateResult};
use crate::prompt::{parse_numbered_response, system_prompt, user_message};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-pro";

#[derive(Debug, Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

pub struct GeminiEngine {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiEngine {
    pub fn new(api_key: &str, model: Option<&str>) -> TranslateResult<Self> {
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            model: model.unwrap_or(GEMINI_DEFAULT_MODEL).to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TranslationEngine for GeminiEngine {
    fn name(&self) -> &'static str {
        "gemini"
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
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GeminiRequest {
            system_instruction: Content {
                parts: vec![Part {
                    text: system_prompt(source_lang, target_lang, overlap),
                }],
            },
            contents: vec![Content {
                parts: vec![Part {
                    text: user_message(lines, context),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                max_output_tokens: 4096,
            },
        };

        debug!(model = %self.model, lines = lines.len(), "Sending Gemini request");

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(api_error("gemini", response).await);
        }

        let body: GeminiResponse = response.json().await?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(TranslateError::invalid_response("gemini: empty candidate"));
        }

        let mut translated = parse_numbered_response(text.trim(), lines.len());
        Ok(translated.split_off(overlap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_generate_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-pro:generateContent"))
            .and(query_param("key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "1. こんにちは\n2. さようなら"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let engine = GeminiEngine::new("g-key", None).unwrap().with_base_url(server.uri());
        let out = engine
            .translate_batch(&lines(&["hello", "goodbye"]), "en", "ja", None, 0)
            .await
            .unwrap();
        assert_eq!(out, lines(&["こんにちは", "さようなら"]));
    }

    #[tokio::test]
    async fn test_missing_candidates_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let engine = GeminiEngine::new("k", None).unwrap().with_base_url(server.uri());
        let err = engine
            .translate_batch(&lines(&["x"]), "en", "ja", None, 0)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
