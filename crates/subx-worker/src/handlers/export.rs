//! Render the translated subtitles into a video.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use subx_db::{ProjectPatch, ProjectRow, Store, SubtitleFileRow};
use subx_media::{burn_subtitles, mux_soft_subtitles, BurnRequest, MuxRequest};
use subx_models::{ExportMode, FileType, JobId, JobKind, JobResult, JobStatus, ProjectStatus};
use subx_queue::ExportVideoJob;
use subx_storage::keys::project_key;
use subx_translate::language_name;

use crate::cleanup::recalculate_user_storage;
use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

use super::{
    download_to, dotted_extension, job_workspace, project_not_found, record_stored_file,
    upload_from,
};

const KIND: JobKind = JobKind::Export;
const DEFAULT_SOURCE_EXT: &str = ".mkv";
const DEFAULT_WATERMARK: &str = "SubTranslate";

/// Encode progress occupies 30..90 of the job.
const ENCODE_START: u8 = 30;
const ENCODE_SPAN: f32 = 0.6;

pub async fn export_video(ctx: &ProcessingContext, job: &ExportVideoJob) -> WorkerResult<JobResult> {
    let logger = JobLogger::new(&job.job_id, KIND);
    logger.log_start(&format!("{:?}", job.config.mode));
    let started = Instant::now();
    let step = |pct: u8, msg: &'static str| ctx.report_progress(&job.job_id, KIND, pct, Some(msg));

    step(5, "Loading project").await?;
    let project = ctx
        .store
        .get_project(&job.project_id)
        .await?
        .ok_or_else(|| project_not_found(&job.project_id))?;
    let workspace = job_workspace(ctx, &job.job_id).await?;

    step(10, "Fetching source video").await?;
    let source_ext = project
        .source_extension()
        .unwrap_or_else(|| DEFAULT_SOURCE_EXT.to_string());
    let source_name = format!("source{}", source_ext);
    let source_key = project_key(
        &job.user_id,
        job.project_id.as_str(),
        FileType::SourceVideo,
        &source_name,
    );
    let source_path = workspace.path().join(&source_name);
    download_to(ctx, &source_key, &source_path).await?;

    step(20, "Fetching subtitles").await?;
    let subtitle = first_translated(ctx.store.as_ref(), &job.project_id).await?;
    let translated_key = subtitle
        .translated_file_url
        .as_deref()
        .ok_or_else(|| WorkerError::not_found("translated subtitle"))?;
    let subtitle_path = workspace
        .path()
        .join(format!("translated{}", dotted_extension(translated_key)));
    download_to(ctx, translated_key, &subtitle_path).await?;

    step(ENCODE_START, "Encoding").await?;
    if ctx.is_cancelled(&job.job_id).await {
        return Err(WorkerError::Cancelled);
    }

    let output_ext = output_extension(job.config.mode, &source_ext);
    let output_path = workspace.path().join(format!("output{}", output_ext));

    let encoded = {
        let _permit = ctx
            .ffmpeg_semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::processing_failed("ffmpeg slots closed"))?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let watcher = spawn_cancel_watcher(
            ctx.store.clone(),
            job.job_id.clone(),
            ctx.config.cancel_poll_interval,
            cancel_tx,
        );
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u8>();
        let encode = async {
            match job.config.mode {
                ExportMode::BurnIn => {
                    let request = burn_request(job, &project, &source_path, &subtitle_path, &output_path);
                    let gate = ProgressGate::new();
                    burn_subtitles(
                        &request,
                        move |pct| {
                            if let Some(overall) = gate.next(pct) {
                                let _ = progress_tx.send(overall);
                            }
                        },
                        Some(cancel_rx),
                    )
                    .await
                }
                ExportMode::SoftSub => {
                    drop(progress_tx);
                    let language = project
                        .target_lang
                        .clone()
                        .unwrap_or_else(|| subtitle.language.clone());
                    let request = MuxRequest {
                        input: source_path.clone(),
                        subtitle: subtitle_path.clone(),
                        output: output_path.clone(),
                        title: language_name(&language).to_string(),
                        language,
                        keep_audio_tracks: job.config.keep_audio_tracks,
                    };
                    mux_soft_subtitles(&request, Some(cancel_rx)).await
                }
            }
        };
        let forward = async {
            while let Some(pct) = progress_rx.recv().await {
                if let Err(e) = ctx
                    .report_progress(&job.job_id, KIND, pct, Some("Encoding"))
                    .await
                {
                    tracing::debug!(job_id = %job.job_id, "Progress update failed: {}", e);
                }
            }
        };
        let (encoded, ()) = tokio::join!(encode, forward);
        watcher.abort();
        encoded
    };
    encoded?;

    if ctx.is_cancelled(&job.job_id).await {
        return Err(WorkerError::Cancelled);
    }
    step(90, "Uploading").await?;

    let output_key = project_key(
        &job.user_id,
        job.project_id.as_str(),
        FileType::ExportVideo,
        &format!("{}{}", job.job_id, output_ext),
    );
    let content_type = format!("video/{}", output_ext.trim_start_matches('.'));
    let size = upload_from(ctx, &output_key, &output_path, &content_type).await?;
    step(95, "Finalizing").await?;

    let plan = ctx.plan_for_user(&job.user_id).await?;
    record_stored_file(
        ctx,
        &job.user_id,
        &job.project_id,
        FileType::ExportVideo,
        &output_key,
        size,
        &plan,
    )
    .await?;
    ctx.store
        .update_project(
            &job.project_id,
            &ProjectPatch::status(ProjectStatus::Exported).touch(),
        )
        .await?;
    recalculate_user_storage(ctx.store.as_ref(), &job.user_id).await?;

    logger.log_completion(&output_key);
    Ok(JobResult {
        output_key: Some(output_key),
        output_size_bytes: Some(size),
        duration_ms: Some(started.elapsed().as_millis() as u64),
        ..Default::default()
    })
}

/// Burn-in always produces MP4; soft subs keep the source container.
pub fn output_extension(mode: ExportMode, source_ext: &str) -> String {
    match mode {
        ExportMode::BurnIn => ".mp4".to_string(),
        ExportMode::SoftSub if source_ext.is_empty() => DEFAULT_SOURCE_EXT.to_string(),
        ExportMode::SoftSub => source_ext.to_string(),
    }
}

async fn first_translated(
    store: &dyn Store,
    project_id: &subx_models::ProjectId,
) -> WorkerResult<SubtitleFileRow> {
    store
        .list_subtitle_files(project_id)
        .await?
        .into_iter()
        .find(|f| f.translated_file_url.is_some())
        .ok_or_else(|| WorkerError::not_found("translated subtitle"))
}

fn burn_request(
    job: &ExportVideoJob,
    project: &ProjectRow,
    source: &std::path::Path,
    subtitle: &std::path::Path,
    output: &std::path::Path,
) -> BurnRequest {
    let config = &job.config;
    let mut request = BurnRequest::new(source, subtitle, output);
    request.style = config
        .subtitle_style
        .clone()
        .or_else(|| project.subtitle_style.clone());
    request.resolution = config.resolution;
    request.video_codec = config.video_codec;
    request.audio_codec = config.audio_codec.clone();
    request.watermark = config.include_watermark.then(|| {
        config
            .watermark_text
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WATERMARK.to_string())
    });
    request.duration_ms = project
        .duration_seconds
        .map(|s| (s * 1000.0) as i64)
        .unwrap_or(0);
    request
}

/// Poll the job row and flip `cancel` once it is cancelled.
fn spawn_cancel_watcher(
    store: Arc<dyn Store>,
    job_id: JobId,
    every: Duration,
    cancel: watch::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match store.get_job(&job_id).await {
                Ok(Some(row)) if row.status == JobStatus::Cancelled => {
                    tracing::info!(job_id = %job_id, "Cancellation requested, stopping ffmpeg");
                    let _ = cancel.send(true);
                    return;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(job_id = %job_id, "Cancel poll failed: {}", e),
            }
        }
    })
}

/// Maps encoder percentages onto the job scale and drops small steps.
struct ProgressGate {
    last: AtomicU8,
}

impl ProgressGate {
    fn new() -> Self {
        Self {
            last: AtomicU8::new(ENCODE_START),
        }
    }

    fn next(&self, encode_pct: u8) -> Option<u8> {
        let overall = ENCODE_START + (encode_pct.min(100) as f32 * ENCODE_SPAN) as u8;
        let last = self.last.load(Ordering::Relaxed);
        if overall > last && (overall - last >= 2 || overall >= 90) {
            self.last.store(overall, Ordering::Relaxed);
            Some(overall)
        } else {
            None
        }
    }
}
