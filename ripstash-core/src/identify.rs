//! Media identification: scores every on-disc subtitle against
//! reference subtitles for the episodes a rip is suspected to contain,
//! producing the match matrix the tagging UI ranks candidates with.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::analysis::AnalysisRunner;
use crate::blobs::BlobStore;
use crate::catalog::{CatalogSession, CatalogStore, MatchInfo, VideoType};
use crate::error::{CoreError, Result};
use crate::providers::opensubtitles::strip_subtitles;
use crate::providers::OstClient;

/// One unit of scoring work: a reference text against one disc text,
/// both already normalized.
struct SubsInstruction {
    ost_download_id: i64,
    ost_subs: String,
    video_file_id: i64,
    disc_subs: String,
}

/// Runs CPU-heavy analytics over a large input set with a small output.
///
/// The feeder pushes work into a channel bounded to the worker count,
/// so it blocks until a worker consumes; live items never exceed
/// O(workers). Workers exit when the feeder finishes and the channel
/// drains. A feeder error is reported after the workers wind down.
pub async fn bounded_work_queue<T, R, F, Fut, W>(
    workers: usize,
    feeder: F,
    worker: W,
) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce(async_channel::Sender<T>) -> Fut,
    Fut: Future<Output = Result<()>>,
    W: Fn(T) -> R + Send + Sync + 'static,
{
    let workers = workers.max(1);
    let (sender, receiver) = async_channel::bounded::<T>(workers);
    let worker = Arc::new(worker);
    let results = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let receiver = receiver.clone();
        let worker = Arc::clone(&worker);
        let results = Arc::clone(&results);
        handles.push(tokio::task::spawn_blocking(move || {
            while let Ok(item) = receiver.recv_blocking() {
                let output = worker(item);
                results.lock().expect("worker result lock").push(output);
            }
        }));
    }

    let fed = feeder(sender.clone()).await;
    sender.close();
    for handle in handles {
        handle.await.expect("identification worker panicked");
    }
    fed?;

    let results = Arc::try_unwrap(results)
        .unwrap_or_else(|_| panic!("workers have exited"))
        .into_inner()
        .expect("worker result lock");
    Ok(results)
}

/// Scores every disc subtitle in the rip against the best reference
/// subtitle of every suspected episode, then replaces the job's match
/// rows. Runs inside the caller's transaction; the caller commits.
pub async fn compare_tv_subs(
    session: &mut CatalogSession,
    ost: &OstClient,
    blobs: &BlobStore,
    job_id: i64,
    episode_tmdb_ids: &[i32],
    workers: usize,
) -> Result<()> {
    let disc_subs = session.disc_subs_from_rip(job_id).await?;

    let feeder_session = &mut *session;
    let results = bounded_work_queue(
        workers,
        |sender| async move {
            for &episode_tmdb in episode_tmdb_ids {
                let episode = feeder_session
                    .get_tv_episode_by_tmdb_id(episode_tmdb)
                    .await?
                    .ok_or(CoreError::NotFound)
                    .map_err(|err| {
                        err.context(format!("resolving suspected episode tmdb-{episode_tmdb}"))
                    })?;

                // Reference fetches fail a lot; skip the episode rather
                // than the whole job.
                let fetched = ost
                    .get_subtitles(
                        feeder_session,
                        blobs,
                        VideoType::TvEpisode,
                        episode.id,
                        episode_tmdb,
                    )
                    .await;
                let (download, ost_text) = match fetched {
                    Ok(result) => result,
                    Err(err) => {
                        error!(
                            job_id,
                            tv_episode_id = episode.id,
                            tmdb_id = episode_tmdb,
                            %err,
                            "failed to get reference subtitles; skipping episode"
                        );
                        continue;
                    }
                };
                let ost_stripped = strip_subtitles(&ost_text);

                for video in &disc_subs {
                    let subtitle_path = blobs.get_path(&video.subtitle_blob);
                    let disc_text = match tokio::fs::read_to_string(&subtitle_path).await {
                        Ok(text) => text,
                        Err(err) => {
                            error!(
                                job_id,
                                blob_id = %video.subtitle_blob,
                                video_file_id = video.video_id,
                                %err,
                                "failed to read disc subtitles from blob storage"
                            );
                            continue;
                        }
                    };
                    sender
                        .send(SubsInstruction {
                            ost_download_id: download.id,
                            ost_subs: ost_stripped.clone(),
                            video_file_id: video.video_id,
                            disc_subs: strip_subtitles(&disc_text),
                        })
                        .await
                        .expect("work channel closed while feeding");
                }
            }
            Ok(())
        },
        |job: SubsInstruction| MatchInfo {
            id: 0,
            video_file_id: job.video_file_id,
            ost_download_id: job.ost_download_id,
            distance: levenshtein::levenshtein(&job.ost_subs, &job.disc_subs) as i64,
            max_distance: job.ost_subs.len().max(job.disc_subs.len()) as i64,
        },
    )
    .await?;

    session.clear_match_info_for_job(job_id).await?;
    for info in &results {
        session.insert_match_info(info).await?;
    }

    Ok(())
}

/// Re-runs analysis on every video in a job, replacing extracted
/// subtitles and measured metadata. Each video gets its own
/// transaction, so one failure doesn't block the others; no cross-video
/// ordering is guaranteed.
pub async fn reprocess_rip_job(
    store: &CatalogStore,
    blobs: &BlobStore,
    analysis: &AnalysisRunner,
    job_id: i64,
    update_hash: bool,
) -> Result<()> {
    let videos = {
        let mut session = store.begin().await?;
        let videos = session.get_videos_from_rip(job_id).await?;
        session.rollback().await?;
        videos
    };

    let mut tasks = Vec::with_capacity(videos.len());
    for video in videos {
        let store = store.clone();
        let blobs = blobs.clone();
        let analysis = analysis.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = reprocess_video(&store, &blobs, &analysis, &video, update_hash).await
            {
                error!(
                    video_file_id = video.id,
                    blob_id = %video.blob_id,
                    %err,
                    "failed to reprocess video"
                );
            }
        }));
    }
    for task in tasks {
        task.await.expect("reprocess task panicked");
    }

    Ok(())
}

async fn reprocess_video(
    store: &CatalogStore,
    blobs: &BlobStore,
    analysis: &AnalysisRunner,
    video: &crate::catalog::VideoFile,
    update_hash: bool,
) -> Result<()> {
    let mut session = store.begin().await?;

    let subtitles = session.get_subtitles_for_video(video.id).await?;
    for subtitle in subtitles {
        blobs.delete_blob(&mut session, &subtitle.blob_id).await?;
    }

    let details = analysis.analyze_mkv(&blobs.get_path(&video.blob_id)).await?;
    let fresh_hash = if update_hash {
        Some(details.decode_hash()?)
    } else {
        None
    };
    let video_hash = fresh_hash
        .as_deref()
        .or(video.original_video_hash.as_deref());
    let extended = details
        .extended_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    session
        .add_video_metadata(
            video.id,
            details.resolution_width,
            details.resolution_height,
            details.duration,
            video_hash,
            extended.as_deref(),
        )
        .await?;

    if let Some(subtitles) = &details.subtitles {
        blobs.add_subtitles(&mut session, video.id, subtitles).await?;
    }

    session.commit().await?;
    Ok(())
}

/// Deletes the blobs (and extracted-subtitle blobs) of every video in
/// the job whose match is still null. Runs inside the caller's
/// transaction.
pub async fn prune_rip_job(
    session: &mut CatalogSession,
    blobs: &BlobStore,
    job_id: i64,
) -> Result<()> {
    let untagged = session.untagged_videos_in_job(job_id).await?;
    for video in untagged {
        blobs.delete_blob(session, &video.video_blob).await?;
        if let Some(subtitle_blob) = &video.subtitle_blob {
            blobs.delete_blob(session, subtitle_blob).await?;
        }
    }
    Ok(())
}
