//! Rip-job lifecycle queries: jobs, video files, subtitles, reference
//! downloads and match scores.

use sqlx::Row;

use super::schemas::{
    DiscSubsWithVideo, MatchInfo, OstDownload, RipImageBlob, RipJob, RipVideoBlobs, SubtitleFile,
    SuspectedContents, VideoFile, VideoType,
};
use super::session::CatalogSession;
use crate::error::Result;

impl CatalogSession {
    /// Creates a rip job at dispatch time. The booleans start false and
    /// only ever transition to true.
    pub async fn create_rip_job(
        &mut self,
        start_time: i64,
        disc_title: Option<&str>,
        suspected_contents: Option<&SuspectedContents>,
    ) -> Result<RipJob> {
        let encoded = suspected_contents.map(SuspectedContents::encode).transpose()?;
        let row = sqlx::query(
            "
            INSERT INTO rip_jobs (start_time, disc_title, suspected_contents)
            VALUES (?, ?, ?)
            RETURNING id
            ",
        )
        .bind(start_time)
        .bind(disc_title)
        .bind(&encoded)
        .fetch_one(self.conn())
        .await?;

        Ok(RipJob {
            id: row.get(0),
            start_time,
            disc_title: disc_title.map(str::to_owned),
            suspected_contents: encoded,
            rip_finished: false,
            imported: false,
        })
    }

    pub async fn get_rip_job(&mut self, job_id: i64) -> Result<RipJob> {
        let job = sqlx::query_as(
            "SELECT id, start_time, disc_title, suspected_contents, rip_finished, imported
             FROM rip_jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_one(self.conn())
        .await?;
        Ok(job)
    }

    pub async fn rename_rip_job(&mut self, job_id: i64, new_title: &str) -> Result<()> {
        sqlx::query("UPDATE rip_jobs SET disc_title = ? WHERE id = ?")
            .bind(new_title)
            .bind(job_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    /// Replaces the suspected-contents hint on an existing job.
    pub async fn set_rip_suspicion(
        &mut self,
        job_id: i64,
        suspicion: Option<&SuspectedContents>,
    ) -> Result<()> {
        let encoded = suspicion.map(SuspectedContents::encode).transpose()?;
        sqlx::query("UPDATE rip_jobs SET suspected_contents = ? WHERE id = ?")
            .bind(&encoded)
            .bind(job_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    /// `rip_finished` is monotonic; the flag never clears once set.
    pub async fn mark_rip_job_finished(&mut self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE rip_jobs SET rip_finished = 1 WHERE id = ?")
            .bind(job_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    /// `imported` is monotonic; the flag never clears once set.
    pub async fn mark_rip_job_imported(&mut self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE rip_jobs SET imported = 1 WHERE id = ?")
            .bind(job_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    pub async fn insert_video_file(&mut self, video: &VideoFile) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO video_files
                (video_type, match_id, blob_id, resolution_width, resolution_height,
                 length, original_video_hash, rip_job, extended_metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(video.video_type)
        .bind(video.match_id)
        .bind(&video.blob_id)
        .bind(video.resolution_width)
        .bind(video.resolution_height)
        .bind(video.length)
        .bind(&video.original_video_hash)
        .bind(video.rip_job)
        .bind(&video.extended_metadata)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn get_video_file(&mut self, video_id: i64) -> Result<VideoFile> {
        let video = sqlx::query_as(
            "SELECT id, video_type, match_id, blob_id, resolution_width, resolution_height,
                    length, original_video_hash, rip_job, extended_metadata
             FROM video_files WHERE id = ?",
        )
        .bind(video_id)
        .fetch_one(self.conn())
        .await?;
        Ok(video)
    }

    /// Writes measured metadata back after an analysis pass. The blob
    /// reference itself is immutable.
    pub async fn add_video_metadata(
        &mut self,
        video_id: i64,
        width: i64,
        height: i64,
        length: i64,
        video_hash: Option<&[u8]>,
        extended_metadata: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "
            UPDATE video_files
            SET resolution_width = ?,
                resolution_height = ?,
                length = ?,
                original_video_hash = ?,
                extended_metadata = ?
            WHERE id = ?
            ",
        )
        .bind(width)
        .bind(height)
        .bind(length)
        .bind(video_hash)
        .bind(extended_metadata)
        .bind(video_id)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    /// Sets the classification and match id, making the video eligible
    /// for export.
    pub async fn tag_video_file(
        &mut self,
        video_id: i64,
        video_type: VideoType,
        match_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query("UPDATE video_files SET video_type = ?, match_id = ? WHERE id = ?")
            .bind(video_type)
            .bind(match_id)
            .bind(video_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    /// Removes a video row that never finished ingesting. Catalog
    /// entities are never deleted; this only unwinds a file record.
    pub(crate) async fn delete_video_file(&mut self, video_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM video_files WHERE id = ?")
            .bind(video_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    pub async fn insert_subtitle_file(&mut self, subtitle: &SubtitleFile) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO subtitle_files (blob_id, video_file) VALUES (?, ?) RETURNING id",
        )
        .bind(&subtitle.blob_id)
        .bind(subtitle.video_file)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn get_subtitles_for_video(&mut self, video_id: i64) -> Result<Vec<SubtitleFile>> {
        let subtitles =
            sqlx::query_as("SELECT id, blob_id, video_file FROM subtitle_files WHERE video_file = ?")
                .bind(video_id)
                .fetch_all(self.conn())
                .await?;
        Ok(subtitles)
    }

    pub async fn insert_ost_download(&mut self, download: &OstDownload) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO ost_downloads (video_type, match_id, filename, blob_id)
            VALUES (?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(download.video_type)
        .bind(download.match_id)
        .bind(&download.filename)
        .bind(&download.blob_id)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn get_ost_downloads_by_match(
        &mut self,
        video_type: VideoType,
        match_id: i64,
    ) -> Result<Vec<OstDownload>> {
        let downloads = sqlx::query_as(
            "SELECT id, video_type, match_id, filename, blob_id
             FROM ost_downloads
             WHERE video_type = ? AND match_id = ?",
        )
        .bind(video_type)
        .bind(match_id)
        .fetch_all(self.conn())
        .await?;
        Ok(downloads)
    }

    pub async fn clear_match_info_for_job(&mut self, job_id: i64) -> Result<()> {
        sqlx::query(
            "
            DELETE FROM match_info
            WHERE video_file_id IN (
                SELECT id FROM video_files WHERE rip_job = ?
            )
            ",
        )
        .bind(job_id)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    pub async fn insert_match_info(&mut self, info: &MatchInfo) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO match_info (video_file_id, ost_download_id, distance, max_distance)
            VALUES (?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(info.video_file_id)
        .bind(info.ost_download_id)
        .bind(info.distance)
        .bind(info.max_distance)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    /// Match rows for one video, straight off `match_info` with no
    /// joins, so it also surfaces rows whose video has been deleted.
    pub async fn get_matches_for_video(&mut self, video_id: i64) -> Result<Vec<MatchInfo>> {
        let matches = sqlx::query_as(
            "SELECT id, video_file_id, ost_download_id, distance, max_distance
             FROM match_info WHERE video_file_id = ?",
        )
        .bind(video_id)
        .fetch_all(self.conn())
        .await?;
        Ok(matches)
    }

    pub async fn get_matches_from_rip(&mut self, job_id: i64) -> Result<Vec<MatchInfo>> {
        let matches = sqlx::query_as(
            "
            SELECT
                match_info.id,
                match_info.video_file_id,
                match_info.ost_download_id,
                match_info.distance,
                match_info.max_distance
            FROM video_files
            INNER JOIN match_info ON video_files.id = match_info.video_file_id
            WHERE video_files.rip_job = ?
            ",
        )
        .bind(job_id)
        .fetch_all(self.conn())
        .await?;
        Ok(matches)
    }

    /// Reference subtitles that scored against any video in the rip.
    pub async fn get_ost_subtitles_from_rip(&mut self, job_id: i64) -> Result<Vec<OstDownload>> {
        let downloads = sqlx::query_as(
            "
            SELECT
                ost_downloads.id,
                ost_downloads.video_type,
                ost_downloads.match_id,
                ost_downloads.filename,
                ost_downloads.blob_id
            FROM video_files
            INNER JOIN match_info ON video_files.id = match_info.video_file_id
            INNER JOIN ost_downloads ON ost_downloads.id = match_info.ost_download_id
            WHERE video_files.rip_job = ?
            GROUP BY ost_downloads.id
            ",
        )
        .bind(job_id)
        .fetch_all(self.conn())
        .await?;
        Ok(downloads)
    }

    pub async fn insert_image_file(&mut self, image: &crate::catalog::ImageFile) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO image_files (blob_id, mime_type, name, rip_job)
            VALUES (?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(&image.blob_id)
        .bind(&image.mime_type)
        .bind(&image.name)
        .bind(image.rip_job)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    /// Removes every row that references `blob_id`, across all four
    /// file tables. The file itself is removed by the blob store's
    /// post-commit callback.
    pub async fn delete_blob_rows(&mut self, blob_id: &str) -> Result<()> {
        for table in ["video_files", "subtitle_files", "ost_downloads", "image_files"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE blob_id = ?"))
                .bind(blob_id)
                .execute(self.conn())
                .await?;
        }
        Ok(())
    }

    pub async fn get_rip_video_blobs(&mut self, job_id: i64) -> Result<Vec<RipVideoBlobs>> {
        let blobs = sqlx::query_as(
            "
            SELECT
                video_files.id as id,
                rip_jobs.id as job_id,
                video_files.blob_id as video_blob,
                subtitle_files.blob_id as subtitle_blob
            FROM rip_jobs
            INNER JOIN video_files ON video_files.rip_job = rip_jobs.id
            LEFT JOIN subtitle_files ON subtitle_files.video_file = video_files.id
            WHERE rip_jobs.id = ?
            ",
        )
        .bind(job_id)
        .fetch_all(self.conn())
        .await?;
        Ok(blobs)
    }

    pub async fn get_rip_image_blobs(&mut self, job_id: i64) -> Result<Vec<RipImageBlob>> {
        let blobs = sqlx::query_as(
            "
            SELECT
                rip_jobs.id as job_id,
                image_files.blob_id as image_blob
            FROM rip_jobs
            INNER JOIN image_files ON rip_jobs.id = image_files.rip_job
            WHERE rip_jobs.id = ?
            ",
        )
        .bind(job_id)
        .fetch_all(self.conn())
        .await?;
        Ok(blobs)
    }

    /// Videos in the rip whose match is still null.
    pub async fn untagged_videos_in_job(&mut self, job_id: i64) -> Result<Vec<RipVideoBlobs>> {
        let blobs = sqlx::query_as(
            "
            SELECT
                video_files.id as id,
                rip_jobs.id as job_id,
                video_files.blob_id as video_blob,
                subtitle_files.blob_id as subtitle_blob
            FROM rip_jobs
            INNER JOIN video_files ON rip_jobs.id = video_files.rip_job
            LEFT JOIN subtitle_files ON subtitle_files.video_file = video_files.id
            WHERE rip_jobs.id = ? AND video_files.match_id IS NULL
            ",
        )
        .bind(job_id)
        .fetch_all(self.conn())
        .await?;
        Ok(blobs)
    }

    /// Pagination ordered by start time, for the tagging UI.
    pub async fn rip_jobs_with_untagged_videos(
        &mut self,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<RipJob>> {
        let jobs = sqlx::query_as(
            "
            SELECT
                rip_jobs.id,
                rip_jobs.start_time,
                rip_jobs.disc_title,
                rip_jobs.suspected_contents,
                rip_jobs.rip_finished,
                rip_jobs.imported
            FROM rip_jobs
            INNER JOIN video_files ON rip_jobs.id = video_files.rip_job
            WHERE video_files.match_id IS NULL
            GROUP BY rip_jobs.id
            ORDER BY rip_jobs.start_time
            LIMIT ? OFFSET ?
            ",
        )
        .bind(limit)
        .bind(skip)
        .fetch_all(self.conn())
        .await?;
        Ok(jobs)
    }

    pub async fn get_videos_from_rip(&mut self, job_id: i64) -> Result<Vec<VideoFile>> {
        let videos = sqlx::query_as(
            "SELECT id, video_type, match_id, blob_id, resolution_width, resolution_height,
                    length, original_video_hash, rip_job, extended_metadata
             FROM video_files WHERE rip_job = ?",
        )
        .bind(job_id)
        .fetch_all(self.conn())
        .await?;
        Ok(videos)
    }

    /// Join of videos with their extracted disc subtitles.
    pub async fn disc_subs_from_rip(&mut self, job_id: i64) -> Result<Vec<DiscSubsWithVideo>> {
        let subs = sqlx::query_as(
            "
            SELECT
                video_files.id as video_id,
                subtitle_files.id as subtitle_id,
                subtitle_files.blob_id as subtitle_blob
            FROM video_files
            INNER JOIN subtitle_files ON video_files.id = subtitle_files.video_file
            WHERE video_files.rip_job = ?
            ",
        )
        .bind(job_id)
        .fetch_all(self.conn())
        .await?;
        Ok(subs)
    }

    pub async fn delete_matches_from_rip(&mut self, job_id: i64) -> Result<()> {
        sqlx::query(
            "
            DELETE FROM match_info
            WHERE video_file_id IN (
                SELECT video_files.id
                FROM video_files
                WHERE video_files.rip_job = ?
            )
            ",
        )
        .bind(job_id)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    pub async fn delete_rip_job(&mut self, job_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM rip_jobs WHERE id = ?")
            .bind(job_id)
            .execute(self.conn())
            .await?;
        Ok(())
    }
}
