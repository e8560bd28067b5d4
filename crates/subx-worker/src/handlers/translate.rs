//! Translate one subtitle track.

use std::time::Instant;

use subx_db::{ProjectPatch, Store, SubtitleFilePatch};
use subx_models::{FileType, JobKind, JobResult, ProjectStatus, TranslateConfig};
use subx_queue::TranslateSubtitlesJob;
use subx_storage::keys::translated_subtitle_key;
use subx_subtitles::{parse_bytes, write_subtitles, Glossary, SubtitleLine};
use subx_translate::{translate_document, TranslateError, TranslateOptions};

use crate::cleanup::recalculate_user_storage;
use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

use super::{project_not_found, record_stored_file};

const KIND: JobKind = JobKind::Translate;

pub async fn translate_subtitles(
    ctx: &ProcessingContext,
    job: &TranslateSubtitlesJob,
) -> WorkerResult<JobResult> {
    let config = &job.config;
    let logger = JobLogger::new(&job.job_id, KIND);
    logger.log_start(&format!(
        "{} -> {} via {}",
        config.source_lang, config.target_lang, config.engine
    ));
    let started = Instant::now();

    let project = ctx
        .store
        .get_project(&job.project_id)
        .await?
        .ok_or_else(|| project_not_found(&job.project_id))?;
    let track = ctx
        .store
        .get_subtitle_file(&config.subtitle_file_id)
        .await?
        .filter(|f| f.project_id == job.project_id)
        .ok_or_else(|| {
            WorkerError::not_found(format!("subtitle file {}", config.subtitle_file_id))
        })?;

    let bytes = ctx.objects.download_bytes(&track.file_url).await?;
    let lines = parse_bytes(&bytes, track.format);
    ctx.report_progress(&job.job_id, KIND, 5, Some("Loaded subtitles"))
        .await?;

    if lines.is_empty() {
        logger.log_warning("Subtitle track has no lines");
        ctx.store
            .update_project(&job.project_id, &ProjectPatch::status(ProjectStatus::Ready).touch())
            .await?;
        return Ok(JobResult {
            translated_lines: Some(0),
            total_lines: Some(0),
            cost_usd: Some(0.0),
            duration_ms: Some(started.elapsed().as_millis() as u64),
            ..Default::default()
        });
    }

    let api_key = resolve_api_key(ctx, config).await?;
    let engine = (ctx.engine_factory)(config.engine, &api_key, config.model_id.as_deref())?;

    let mut options = TranslateOptions::new(&config.source_lang, &config.target_lang)
        .with_context(config.context_enabled);
    if config.glossary_enabled {
        options = options.with_glossary(load_glossary(ctx.store.as_ref(), &job.user_id, config).await?);
    }

    let texts: Vec<String> = lines.iter().map(|l| l.text.clone()).collect();
    let job_id = &job.job_id;
    let translated = translate_document(
        engine.as_ref(),
        &texts,
        &options,
        || ctx.is_cancelled(job_id),
        |pct| async move {
            // Document progress covers 10..90 of the job
            let overall = 10 + (pct as u16 * 80 / 100) as u8;
            if let Err(e) = ctx
                .report_progress(job_id, KIND, overall, Some("Translating"))
                .await
            {
                tracing::debug!(job_id = %job_id, "Progress update failed: {}", e);
            }
        },
    )
    .await?;

    let output = merge_translations(&lines, &translated);
    let total = output.len() as u32;

    let out_format = track.format.translated_output();
    logger.log_progress(&format!("{} lines translated, writing {}", total, out_format.as_str()));
    let content = write_subtitles(&output, out_format, project.subtitle_style.as_ref());
    let key = translated_subtitle_key(&job.user_id, job.project_id.as_str(), &track.id, out_format);
    let size = ctx
        .objects
        .upload_bytes(&key, content.into_bytes(), "text/plain; charset=utf-8")
        .await?;
    ctx.report_progress(job_id, KIND, 95, Some("Saved translation"))
        .await?;

    ctx.store
        .update_subtitle_file(&track.id, &SubtitleFilePatch::translated(&key))
        .await?;
    let plan = ctx.plan_for_user(&job.user_id).await?;
    record_stored_file(
        ctx,
        &job.user_id,
        &job.project_id,
        FileType::TranslatedSubtitle,
        &key,
        size,
        &plan,
    )
    .await?;

    let cost_per_line = ctx
        .store
        .get_engine(config.engine)
        .await?
        .map(|e| e.cost_per_line)
        .unwrap_or(0.0);

    let patch = ProjectPatch {
        status: Some(ProjectStatus::Translated),
        source_lang: Some(config.source_lang.clone()),
        target_lang: Some(config.target_lang.clone()),
        translated_lines: Some(total as i64),
        ..Default::default()
    }
    .touch();
    ctx.store.update_project(&job.project_id, &patch).await?;
    recalculate_user_storage(ctx.store.as_ref(), &job.user_id).await?;

    logger.log_completion(&format!("{} lines translated", total));
    Ok(JobResult {
        output_key: Some(key),
        output_size_bytes: Some(size),
        translated_lines: Some(total),
        total_lines: Some(total),
        cost_usd: Some(cost_per_line * total as f64),
        duration_ms: Some(started.elapsed().as_millis() as u64),
    })
}

/// Charge the user's monthly line quota. Runs only after the completion
/// write has landed, so a cancelled job is never billed.
pub async fn bill_lines(ctx: &ProcessingContext, job: &TranslateSubtitlesJob, lines: u32) {
    if lines == 0 {
        return;
    }
    if let Err(e) = ctx.store.increment_lines_used(&job.user_id, lines as i64).await {
        tracing::warn!(job_id = %job.job_id, "Failed to record {} translated lines: {}", lines, e);
        return;
    }
    metrics::record_lines_translated(job.config.engine.as_str(), lines as u64);
}

/// Key from the job, then the worker's environment, then the engine row.
async fn resolve_api_key(ctx: &ProcessingContext, config: &TranslateConfig) -> WorkerResult<String> {
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(key) = ctx.engine_keys.get(config.engine) {
        return Ok(key.to_string());
    }
    let system = ctx.store.get_engine(config.engine).await?;
    system
        .as_ref()
        .and_then(|row| row.system_key())
        .map(str::to_string)
        .ok_or_else(|| TranslateError::MissingApiKey(config.engine.to_string()).into())
}

async fn load_glossary(
    store: &dyn Store,
    user_id: &str,
    config: &TranslateConfig,
) -> WorkerResult<Glossary> {
    let terms = store.list_glossary(user_id).await?;
    Ok(Glossary::new(
        terms
            .into_iter()
            .filter(|t| t.applies_to(&config.source_lang, &config.target_lang))
            .map(|t| (t.source_term, t.target_term)),
    ))
}

/// Pair translations with their cues. Blank translations keep the original text.
fn merge_translations(lines: &[SubtitleLine], translated: &[String]) -> Vec<SubtitleLine> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| match translated.get(i) {
            Some(text) if !text.trim().is_empty() => line.with_text(text.as_str()),
            _ => line.clone(),
        })
        .collect()
}
