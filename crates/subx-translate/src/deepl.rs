//! DeepL REST API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{api_error, http_client, TranslationEngine};
use crate::error::{TranslateError, TranslateResult};
use crate::lang::{deepl_source, deepl_target};

const DEEPL_PRO_URL: &str = "https://api.deepl.com";
const DEEPL_FREE_URL: &str = "https://api-free.deepl.com";

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a [String],
    target_lang: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    preserve_formatting: bool,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

pub struct DeeplEngine {
    client: Client,
    api_key: String,
    base_url: String,
}

impl DeeplEngine {
    /// Free-tier keys end in `:fx` and use a separate host.
    pub fn new(api_key: &str) -> TranslateResult<Self> {
        let base_url = if api_key.ends_with(":fx") {
            DEEPL_FREE_URL
        } else {
            DEEPL_PRO_URL
        };
        Ok(Self {
            client: http_client()?,
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TranslationEngine for DeeplEngine {
    fn name(&self) -> &'static str {
        "deepl"
    }

    async fn translate_batch(
        &self,
        lines: &[String],
        source_lang: &str,
        target_lang: &str,
        context: Option<&[String]>,
        overlap_count: usize,
    ) -> TranslateResult<Vec<String>> {
        let target = deepl_target(target_lang).ok_or_else(|| TranslateError::UnsupportedLanguage {
            engine: "deepl",
            language: target_lang.to_string(),
        })?;

        // DeepL takes context as a separate field, so overlap lines are not resent.
        let overlap = overlap_count.min(lines.len());
        let text = &lines[overlap..];
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut context_lines: Vec<&str> = context
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .collect();
        context_lines.extend(lines[..overlap].iter().map(String::as_str));

        let request = TranslateRequest {
            text,
            target_lang: target,
            source_lang: deepl_source(source_lang),
            context: (!context_lines.is_empty()).then(|| context_lines.join("\n")),
            preserve_formatting: true,
        };

        debug!(lines = text.len(), target, "Sending DeepL request");

        let response = self
            .client
            .post(format!("{}/v2/translate", self.base_url))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error("deepl", response).await);
        }

        let body: TranslateResponse = response.json().await?;
        if body.translations.len() != text.len() {
            return Err(TranslateError::invalid_response(format!(
                "deepl returned {} translations for {} lines",
                body.translations.len(),
                text.len()
            )));
        }
        Ok(body.translations.into_iter().map(|t| t.text).collect())
    }
}
