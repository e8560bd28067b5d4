//! Subtitle translation.
//!
//! Engines speak each provider's HTTP API directly over `reqwest`:
//! OpenAI and OpenRouter (chat completions), DeepL and Gemini.
//! `translate_document` drives an engine over a whole file in
//! overlapping chunks with retry, cancellation and progress.

pub mod deepl;
pub mod document;
pub mod engine;
pub mod error;
pub mod gemini;
pub mod keys;
pub mod lang;
pub mod openai;
pub mod prompt;

pub use deepl::DeeplEngine;
pub use document::{translate_document, ChunkRetry, TranslateOptions};
pub use engine::{create_engine, engine_kind, TranslationEngine};
pub use error::{TranslateError, TranslateResult};
pub use gemini::GeminiEngine;
pub use keys::EngineKeys;
pub use lang::language_name;
pub use openai::{OpenAiEngine, OpenRouterEngine};
pub use prompt::parse_numbered_response;
