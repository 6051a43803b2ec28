//! Content-addressed blob store: a flat directory of UUID-named files,
//! kept consistent with the catalog through the session's post-commit
//! callback queue.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::error;
use uuid::Uuid;

use crate::analysis::AnalysisRunner;
use crate::catalog::{CatalogSession, ImageFile, OstDownload, SubtitleFile, VideoFile, VideoType};
use crate::error::{CoreError, Result};

/// Stateless apart from its configured directory; safe to clone into
/// parallel tasks. Writes are serialized by the catalog transaction.
#[derive(Debug, Clone)]
pub struct BlobStore {
    blob_dir: PathBuf,
}

impl BlobStore {
    pub fn new(blob_dir: impl Into<PathBuf>) -> Result<Self> {
        let blob_dir: PathBuf = blob_dir.into();
        if !blob_dir.is_dir() {
            return Err(CoreError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("blob directory {} is not a directory", blob_dir.display()),
            )));
        }
        Ok(Self { blob_dir })
    }

    /// Pure path join; no I/O.
    pub fn get_path(&self, blob_id: &str) -> PathBuf {
        self.blob_dir.join(blob_id)
    }

    /// Moves `src_path` into the store, records a video row, runs the
    /// analyzer and writes measured metadata back. Extracted subtitles
    /// become a second blob linked to the video row.
    pub async fn add_video(
        &self,
        session: &mut CatalogSession,
        analysis: &AnalysisRunner,
        src_path: &Path,
        rip_job: Option<i64>,
    ) -> Result<i64> {
        let blob_id = Uuid::new_v4().to_string();
        let new_path = self.get_path(&blob_id);

        // Cross-device moves fall back to copy-then-unlink.
        if let Err(err) = tokio::fs::rename(src_path, &new_path).await {
            if err.kind() != ErrorKind::CrossesDevices {
                return Err(err.into());
            }
            tokio::fs::copy(src_path, &new_path).await?;
            tokio::fs::remove_file(src_path).await?;
        }

        let video_id = session
            .insert_video_file(&VideoFile {
                id: 0,
                video_type: VideoType::Untagged,
                match_id: None,
                blob_id,
                resolution_width: None,
                resolution_height: None,
                length: None,
                original_video_hash: None,
                rip_job,
                extended_metadata: None,
            })
            .await?;

        // A file the analyzer rejects is unwound completely: the row
        // goes away and the file returns to where it came from, so a
        // retried import still sees it.
        let details = match analysis.analyze_mkv(&new_path).await {
            Ok(details) => details,
            Err(err) => {
                session.delete_video_file(video_id).await?;
                if let Err(move_back) = tokio::fs::rename(&new_path, src_path).await {
                    error!(
                        blob = %new_path.display(),
                        original = %src_path.display(),
                        %move_back,
                        "failed to restore rejected file to the rip directory"
                    );
                }
                return Err(err);
            }
        };
        let video_hash = details.decode_hash()?;
        let extended = details
            .extended_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        session
            .add_video_metadata(
                video_id,
                details.resolution_width,
                details.resolution_height,
                details.duration,
                Some(&video_hash),
                extended.as_deref(),
            )
            .await?;

        if let Some(subtitles) = &details.subtitles {
            self.add_subtitles(session, video_id, subtitles).await?;
        }

        Ok(video_id)
    }

    /// Best-effort side-operation; a failure here does not undo the
    /// video insert (the caller decides what to do with the error).
    pub async fn add_subtitles(
        &self,
        session: &mut CatalogSession,
        video_file_id: i64,
        subtitles: &str,
    ) -> Result<i64> {
        let blob_id = Uuid::new_v4().to_string();
        let mut file = File::create(self.get_path(&blob_id)).await?;
        file.write_all(subtitles.as_bytes()).await?;

        session
            .insert_subtitle_file(&SubtitleFile {
                id: 0,
                blob_id,
                video_file: video_file_id,
            })
            .await
    }

    pub async fn add_ost_subtitles(
        &self,
        session: &mut CatalogSession,
        video_type: VideoType,
        match_id: i64,
        filename: String,
        data: &str,
    ) -> Result<OstDownload> {
        let blob_id = Uuid::new_v4().to_string();
        let mut file = File::create(self.get_path(&blob_id)).await?;
        file.write_all(data.as_bytes()).await?;

        let mut download = OstDownload {
            id: 0,
            video_type,
            match_id,
            filename,
            blob_id,
        };
        download.id = session.insert_ost_download(&download).await?;
        Ok(download)
    }

    pub async fn add_image(
        &self,
        session: &mut CatalogSession,
        name: Option<String>,
        mime_type: String,
        data: &[u8],
    ) -> Result<ImageFile> {
        let blob_id = Uuid::new_v4().to_string();
        let mut file = File::create(self.get_path(&blob_id)).await?;
        file.write_all(data).await?;

        let mut image = ImageFile {
            id: 0,
            blob_id,
            mime_type,
            name,
            rip_job: None,
        };
        image.id = session.insert_image_file(&image).await?;
        Ok(image)
    }

    /// Deletes every row referencing the blob, then registers file
    /// removal as a post-commit callback. If the commit fails the file
    /// stays reachable through its still-present rows; if removal
    /// itself fails the orphaned file is only logged.
    pub async fn delete_blob(&self, session: &mut CatalogSession, blob_id: &str) -> Result<()> {
        session.delete_blob_rows(blob_id).await?;
        let blob_path = self.get_path(blob_id);
        let blob_id = blob_id.to_string();
        session.on_commit(move || {
            if let Err(err) = std::fs::remove_file(&blob_path) {
                error!(blob_id = %blob_id, %err, "failed to remove blob file");
            }
        });
        Ok(())
    }

    /// Removes a rip job and everything hanging off it: video blobs,
    /// subtitle blobs, image blobs, match scores and the job row.
    ///
    /// The subtitle, image and match queries all join through
    /// `video_files`/`rip_jobs`, so every working set is collected (and
    /// the match rows cleared) before the first blob delete starts
    /// tearing those rows out from under them.
    pub async fn delete_rip_job(&self, session: &mut CatalogSession, job_id: i64) -> Result<()> {
        let videos = session.get_videos_from_rip(job_id).await?;
        let subtitles = session.disc_subs_from_rip(job_id).await?;
        let images = session.get_rip_image_blobs(job_id).await?;

        session.delete_matches_from_rip(job_id).await?;

        for subtitle in subtitles {
            self.delete_blob(session, &subtitle.subtitle_blob).await?;
        }
        for video in videos {
            self.delete_blob(session, &video.blob_id).await?;
        }
        for image in images {
            self.delete_blob(session, &image.image_blob).await?;
        }

        session.delete_rip_job(job_id).await?;
        Ok(())
    }

    /// Creates a hard link to a blob at `destination`, replacing an
    /// existing link. Useful when the consuming media center cannot see
    /// the blob directory through a symlink.
    pub async fn hard_link(&self, blob_id: &str, destination: &Path) -> Result<()> {
        let source = self.get_path(blob_id);
        if !source.exists() {
            return Err(CoreError::BlobMissing(blob_id.to_string()));
        }
        match tokio::fs::hard_link(&source, destination).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tokio::fs::remove_file(destination).await?;
                tokio::fs::hard_link(&source, destination).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Creates a relative symlink to a blob at `destination`, replacing
    /// an existing link. `destination` must be absolute.
    pub async fn symbolic_link(&self, blob_id: &str, destination: &Path) -> Result<()> {
        if !destination.is_absolute() {
            return Err(CoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "symlink destination must be absolute",
            )));
        }
        let source = self.get_path(blob_id);
        if !source.exists() {
            return Err(CoreError::BlobMissing(blob_id.to_string()));
        }
        let dest_dir = destination.parent().expect("absolute path has a parent");

        // Both paths are absolute, so a relative form always exists.
        let target = pathdiff::diff_paths(&source, dest_dir)
            .expect("relative path between absolute paths");

        match tokio::fs::symlink(&target, destination).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tokio::fs::remove_file(destination).await?;
                tokio::fs::symlink(&target, destination).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
