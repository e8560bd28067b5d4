//! Chunked translation of a whole subtitle file.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use subx_subtitles::{apply_glossary_post, apply_glossary_pre, chunk_lines, Glossary};

use crate::engine::TranslationEngine;
use crate::error::{TranslateError, TranslateResult};

/// Translated lines carried forward as context.
const CONTEXT_WINDOW: usize = 10;

/// Retry policy for a single chunk.
#[derive(Debug, Clone)]
pub struct ChunkRetry {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ChunkRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ChunkRetry {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .min_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        delay.clamp(self.min_delay, self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub source_lang: String,
    pub target_lang: String,
    pub context_enabled: bool,
    pub glossary: Option<Glossary>,
    pub retry: ChunkRetry,
}

impl TranslateOptions {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            context_enabled: true,
            glossary: None,
            retry: ChunkRetry::default(),
        }
    }

    pub fn with_context(mut self, enabled: bool) -> Self {
        self.context_enabled = enabled;
        self
    }

    pub fn with_glossary(mut self, glossary: Glossary) -> Self {
        self.glossary = (!glossary.is_empty()).then_some(glossary);
        self
    }
}

/// Translate every line, one chunk at a time.
///
/// `cancel_check` runs before each chunk; `on_progress` receives a
/// percentage that stays below 100 until the caller finishes up.
pub async fn translate_document<C, CFut, P, PFut>(
    engine: &dyn TranslationEngine,
    lines: &[String],
    opts: &TranslateOptions,
    mut cancel_check: C,
    mut on_progress: P,
) -> TranslateResult<Vec<String>>
where
    C: FnMut() -> CFut,
    CFut: Future<Output = bool>,
    P: FnMut(u8) -> PFut,
    PFut: Future<Output = ()>,
{
    let total = lines.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let prepared: Vec<String> = match &opts.glossary {
        Some(glossary) => lines
            .iter()
            .map(|l| apply_glossary_pre(l, glossary))
            .collect(),
        None => lines.to_vec(),
    };

    let chunks = chunk_lines(&prepared);
    info!(
        engine = engine.name(),
        lines = total,
        chunks = chunks.len(),
        "Starting document translation"
    );

    let mut results: Vec<Option<String>> = vec![None; total];
    let mut context: Vec<String> = Vec::new();
    let mut done = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        if cancel_check().await {
            info!(chunk = i, "Translation cancelled");
            return Err(TranslateError::Cancelled);
        }

        let batch = &prepared[chunk.start..chunk.end];
        let ctx = (opts.context_enabled && !context.is_empty()).then_some(context.as_slice());

        let translated =
            translate_chunk(engine, batch, opts, ctx, chunk.overlap_count, i).await?;

        for (offset, text) in translated.into_iter().enumerate() {
            let idx = chunk.new_start() + offset;
            if idx >= chunk.end {
                break;
            }
            // Blank output does not count as a translation
            if results[idx].is_none() && !text.trim().is_empty() {
                let text = apply_glossary_post(&text);
                if opts.context_enabled {
                    context.push(text.clone());
                }
                results[idx] = Some(text);
                done += 1;
            }
        }
        if context.len() > CONTEXT_WINDOW {
            context.drain(..context.len() - CONTEXT_WINDOW);
        }

        let pct = (done * 100 / total).min(99) as u8;
        debug!(chunk = i, done, total, pct, "Chunk translated");
        on_progress(pct).await;
    }

    Ok(results.into_iter().map(Option::unwrap_or_default).collect())
}

async fn translate_chunk(
    engine: &dyn TranslationEngine,
    batch: &[String],
    opts: &TranslateOptions,
    context: Option<&[String]>,
    overlap_count: usize,
    chunk_index: usize,
) -> TranslateResult<Vec<String>> {
    let mut attempt = 1;
    loop {
        match engine
            .translate_batch(
                batch,
                &opts.source_lang,
                &opts.target_lang,
                context,
                overlap_count,
            )
            .await
        {
            Ok(lines) => return Ok(lines),
            Err(e) if e.is_retryable() && attempt < opts.retry.max_attempts => {
                let delay = opts.retry.delay_for_attempt(attempt);
                warn!(
                    engine = engine.name(),
                    chunk = chunk_index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Chunk failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
