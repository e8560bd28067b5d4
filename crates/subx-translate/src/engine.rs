//! The engine trait and factory.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use subx_models::EngineKind;

use crate::deepl::DeeplEngine;
use crate::error::{TranslateError, TranslateResult};
use crate::gemini::GeminiEngine;
use crate::openai::{OpenAiEngine, OpenRouterEngine};

/// Per-request timeout for engine calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A backend that translates one batch of subtitle lines.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Translate `lines`. The first `overlap_count` lines were already
    /// translated and serve as context; only the remaining
    /// `lines.len() - overlap_count` translations are returned.
    async fn translate_batch(
        &self,
        lines: &[String],
        source_lang: &str,
        target_lang: &str,
        context: Option<&[String]>,
        overlap_count: usize,
    ) -> TranslateResult<Vec<String>>;
}

/// HTTP client shared by the engine implementations.
pub(crate) fn http_client() -> TranslateResult<Client> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("subx-translate/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Turn a non-2xx response into an API error with a short body excerpt.
pub(crate) async fn api_error(engine: &'static str, response: reqwest::Response) -> TranslateError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TranslateError::api(engine, status, body.chars().take(300).collect::<String>())
}

/// Parse an engine name coming from a request.
pub fn engine_kind(name: &str) -> TranslateResult<EngineKind> {
    name.parse::<EngineKind>()
        .map_err(|_| TranslateError::UnknownEngine(name.to_string()))
}

/// Build an engine for `kind`.
pub fn create_engine(
    kind: EngineKind,
    api_key: &str,
    model_id: Option<&str>,
) -> TranslateResult<Box<dyn TranslationEngine>> {
    if api_key.trim().is_empty() {
        return Err(TranslateError::MissingApiKey(kind.to_string()));
    }
    let model = model_id.filter(|m| !m.trim().is_empty());

    Ok(match kind {
        EngineKind::OpenAi => Box::new(OpenAiEngine::new(api_key, model)?),
        EngineKind::OpenRouter => Box::new(OpenRouterEngine::new(api_key, model)?),
        EngineKind::DeepL => Box::new(DeeplEngine::new(api_key)?),
        EngineKind::Gemini => Box::new(GeminiEngine::new(api_key, model)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_engine() {
        assert_eq!(create_engine(EngineKind::OpenAi, "k", None).unwrap().name(), "openai");
        assert_eq!(
            create_engine(EngineKind::OpenRouter, "k", Some("x/y")).unwrap().name(),
            "openrouter"
        );
        assert_eq!(create_engine(EngineKind::DeepL, "k:fx", None).unwrap().name(), "deepl");
        assert_eq!(create_engine(EngineKind::Gemini, "k", None).unwrap().name(), "gemini");

        let err = create_engine(EngineKind::Gemini, " ", None).err().unwrap();
        assert!(matches!(err, TranslateError::MissingApiKey(_)));
    }

    #[test]
    fn test_engine_kind() {
        assert_eq!(engine_kind("deepl").unwrap(), EngineKind::DeepL);
        assert!(matches!(
            engine_kind("babelfish"),
            Err(TranslateError::UnknownEngine(_))
        ));
    }
}
