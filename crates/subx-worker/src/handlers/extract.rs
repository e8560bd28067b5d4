//! Extract subtitle tracks from an uploaded file.

use std::path::Path;

use tracing::info;

use subx_db::{ProjectPatch, ProjectRow, SubtitleFileRow};
use subx_media::{extract_subtitle_tracks, probe};
use subx_models::{FileType, JobKind, JobResult, Plan, ProjectStatus, SubtitleFormat};
use subx_queue::ExtractTracksJob;
use subx_storage::keys::{content_type_for, project_key, sanitize_filename};
use subx_subtitles::parse_file;

use crate::cleanup::recalculate_user_storage;
use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

use super::{
    download_to, dotted_extension, job_workspace, project_not_found, record_stored_file,
    upload_from,
};

const KIND: JobKind = JobKind::Extract;

/// Download the upload, register its subtitle tracks and mark the project ready.
pub async fn extract_tracks(
    ctx: &ProcessingContext,
    job: &ExtractTracksJob,
) -> WorkerResult<JobResult> {
    let logger = JobLogger::new(&job.job_id, KIND);
    logger.log_start(&job.file_name);
    let started = std::time::Instant::now();

    let project = ctx
        .store
        .get_project(&job.project_id)
        .await?
        .ok_or_else(|| project_not_found(&job.project_id))?;
    let plan = ctx.plan_for_user(&job.user_id).await?;

    let workspace = job_workspace(ctx, &job.job_id).await?;
    let file_name = sanitize_filename(&job.file_name);
    let local = workspace.path().join(&file_name);
    let size = download_to(ctx, &job.upload_key, &local).await?;
    ctx.report_progress(&job.job_id, KIND, 10, Some("Upload received"))
        .await?;

    let ext = dotted_extension(&file_name);
    let total_lines = match SubtitleFormat::from_extension(ext.trim_start_matches('.')) {
        Some(format) => {
            register_subtitle_upload(ctx, job, &project, &plan, &local, format, size).await?
        }
        None => {
            extract_from_video(ctx, job, &project, &plan, &local, &ext, workspace.path(), &logger)
                .await?
        }
    };

    let patch = ProjectPatch {
        status: Some(ProjectStatus::Ready),
        total_lines: Some(total_lines),
        translated_lines: Some(0),
        ..Default::default()
    }
    .touch();
    ctx.store.update_project(&job.project_id, &patch).await?;
    recalculate_user_storage(ctx.store.as_ref(), &job.user_id).await?;

    if let Err(e) = ctx.objects.delete(&job.upload_key).await {
        logger.log_warning(&format!("Failed to delete temporary upload: {}", e));
    }

    logger.log_completion(&format!("{} subtitle lines", total_lines));
    Ok(JobResult {
        total_lines: Some(total_lines.max(0) as u32),
        duration_ms: Some(started.elapsed().as_millis() as u64),
        ..Default::default()
    })
}

/// A subtitle file was uploaded on its own: it becomes track 0.
async fn register_subtitle_upload(
    ctx: &ProcessingContext,
    job: &ExtractTracksJob,
    project: &ProjectRow,
    plan: &Plan,
    local: &Path,
    format: SubtitleFormat,
    size: u64,
) -> WorkerResult<i64> {
    let lines = parse_file(local)?;
    let language = project
        .source_lang
        .clone()
        .unwrap_or_else(|| "und".to_string());

    let file_name = format!("sub_0_{}.{}", language, format.as_str());
    let key = project_key(
        &job.user_id,
        job.project_id.as_str(),
        FileType::Subtitle,
        &file_name,
    );
    let uploaded = upload_from(ctx, &key, local, content_type_for(&key)).await?;

    let mut row = SubtitleFileRow::new(job.project_id.clone(), format, language, 0, &key);
    row.total_lines = lines.len() as i64;
    ctx.store.insert_subtitle_file(&row).await?;
    record_stored_file(ctx, &job.user_id, &job.project_id, FileType::Subtitle, &key, uploaded, plan)
        .await?;

    let patch = ProjectPatch {
        file_url: Some(key),
        file_size_bytes: Some(size as i64),
        ..Default::default()
    };
    ctx.store.update_project(&job.project_id, &patch).await?;
    ctx.report_progress(&job.job_id, KIND, 90, Some("Subtitle registered"))
        .await?;

    Ok(row.total_lines)
}

#[allow(clippy::too_many_arguments)]
async fn extract_from_video(
    ctx: &ProcessingContext,
    job: &ExtractTracksJob,
    project: &ProjectRow,
    plan: &Plan,
    local: &Path,
    ext: &str,
    workspace: &Path,
    logger: &JobLogger,
) -> WorkerResult<i64> {
    let info = {
        let _permit = ctx
            .ffmpeg_semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::processing_failed("ffmpeg slots closed"))?;
        probe(local).await?
    };
    info!(
        job_id = %job.job_id,
        duration = info.duration_seconds,
        tracks = info.subtitle_streams.len(),
        "Probed upload"
    );

    let mut patch = ProjectPatch {
        duration_seconds: Some(info.duration_seconds),
        video_codec: info.video_codec.clone(),
        file_size_bytes: Some(info.file_size_bytes as i64),
        media_info: Some(info.clone()),
        ..Default::default()
    };
    if project.source_lang.is_none() {
        patch.source_lang = info.detected_language().map(str::to_string);
    }
    ctx.store.update_project(&job.project_id, &patch).await?;
    ctx.report_progress(&job.job_id, KIND, 20, Some("Analyzed media"))
        .await?;

    let source_key = project_key(
        &job.user_id,
        job.project_id.as_str(),
        FileType::SourceVideo,
        &format!("source{}", ext),
    );
    let source_size = upload_from(ctx, &source_key, local, content_type_for(&source_key)).await?;
    record_stored_file(
        ctx,
        &job.user_id,
        &job.project_id,
        FileType::SourceVideo,
        &source_key,
        source_size,
        plan,
    )
    .await?;
    ctx.store
        .update_project(
            &job.project_id,
            &ProjectPatch {
                file_url: Some(source_key),
                ..Default::default()
            },
        )
        .await?;
    ctx.report_progress(&job.job_id, KIND, 40, Some("Stored source video"))
        .await?;

    if info.subtitle_streams.is_empty() {
        logger.log_warning("No subtitle tracks found");
        return Ok(0);
    }

    let extracted = {
        let _permit = ctx
            .ffmpeg_semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::processing_failed("ffmpeg slots closed"))?;
        extract_subtitle_tracks(local, &info.subtitle_streams, workspace.join("tracks")).await?
    };

    let count = extracted.len().max(1);
    let mut total_lines = 0i64;
    for (i, track) in extracted.iter().enumerate() {
        let Some(path) = track.path.as_deref() else {
            logger.log_warning(&format!(
                "Track {} skipped: {}",
                track.track.stream_index,
                track.error.as_deref().unwrap_or("extraction failed")
            ));
            continue;
        };

        let lines = match parse_file(path) {
            Ok(lines) => lines,
            Err(e) => {
                logger.log_warning(&format!(
                    "Track {} unreadable: {}",
                    track.track.stream_index, e
                ));
                continue;
            }
        };

        let key = project_key(
            &job.user_id,
            job.project_id.as_str(),
            FileType::Subtitle,
            &track.file_name(),
        );
        let size = upload_from(ctx, &key, path, content_type_for(&key)).await?;

        let mut row = SubtitleFileRow::new(
            job.project_id.clone(),
            track.format,
            track.track.language.clone(),
            track.track.stream_index,
            &key,
        );
        row.title = track.track.title.clone();
        row.total_lines = lines.len() as i64;
        ctx.store.insert_subtitle_file(&row).await?;
        record_stored_file(ctx, &job.user_id, &job.project_id, FileType::Subtitle, &key, size, plan)
            .await?;

        total_lines += row.total_lines;
        let pct = 40 + ((i + 1) * 50 / count) as u8;
        ctx.report_progress(&job.job_id, KIND, pct, Some("Extracted subtitle track"))
            .await?;
    }

    Ok(total_lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{fixture, SAMPLE_SRT};
    use subx_db::{JobRow, Store};
    use subx_models::JobId;
    use subx_storage::ObjectStore;

    #[tokio::test]
    async fn test_subtitle_upload_becomes_track_zero() {
        let fx = fixture().await;
        fx.objects
            .upload_bytes("uploads/abc/episode.srt", SAMPLE_SRT.as_bytes().to_vec(), "text/plain")
            .await
            .unwrap();
        // Progress reports write to the job row
        let row = JobRow::new("user-1", fx.project.id.clone(), KIND, None);
        let row = fx.store.insert_job(&row).await.unwrap();

        let job = ExtractTracksJob::new(
            row.id,
            "user-1",
            fx.project.id.clone(),
            "uploads/abc/episode.srt",
            "episode.srt",
        );
        let result = extract_tracks(&fx.ctx, &job).await.unwrap();
        assert_eq!(result.total_lines, Some(2));

        let project = fx.store.get_project(&fx.project.id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        assert_eq!(project.total_lines, 2);

        let tracks = fx.store.list_subtitle_files(&fx.project.id).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_index, 0);
        assert_eq!(tracks[0].format, SubtitleFormat::Srt);
        assert!(fx.objects.exists(&tracks[0].file_url).await.unwrap());

        let stored = fx.store.stored_files().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].file_type, FileType::Subtitle);
        assert!(stored[0].expires_at.is_some());

        let profile = fx.store.get_profile("user-1").await.unwrap().unwrap();
        assert_eq!(profile.storage_used_bytes, SAMPLE_SRT.len() as i64);

        assert!(!fx.objects.exists("uploads/abc/episode.srt").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_upload_is_not_retryable() {
        let fx = fixture().await;
        let job = ExtractTracksJob::new(
            JobId::new(),
            "user-1",
            fx.project.id.clone(),
            "uploads/missing/movie.mkv",
            "movie.mkv",
        );
        let err = extract_tracks(&fx.ctx, &job).await.unwrap_err();
        assert!(!err.is_retryable());

        let leftovers = std::fs::read_dir(&fx.ctx.config.work_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
