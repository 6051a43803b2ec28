//! Streaming cursors over tagged videos, denormalized for export-path
//! derivation.

use futures::{Future, TryStreamExt};

use super::schemas::{MovieExportEntry, TvExportEntry};
use super::session::CatalogSession;
use crate::error::Result;

const TV_EXPORT_SELECT: &str = "
    SELECT
        tv_shows.title as tv_title,
        tv_shows.original_release_year as tv_release_year,
        tv_shows.tmdb_id as tv_tmdb,
        tv_seasons.season_number as season_number,
        tv_episodes.title as episode_title,
        tv_episodes.episode_number as episode_number,
        tv_episodes.tmdb_id as episode_tmdb,
        video_files.blob_id as episode_blob
    FROM video_files
    JOIN tv_episodes ON video_files.match_id = tv_episodes.id
    JOIN tv_seasons ON tv_episodes.tv_season_id = tv_seasons.id
    JOIN tv_shows ON tv_episodes.tv_show_id = tv_shows.id
    WHERE video_files.video_type = 3
";

const MOVIE_EXPORT_SELECT: &str = "
    SELECT
        movies.title as movie_title,
        movies.release_year as movie_release_year,
        movies.tmdb_id as movie_tmdb,
        video_files.blob_id as movie_blob
    FROM video_files
    JOIN movies ON video_files.match_id = movies.id
    WHERE video_files.video_type = 1
";

impl CatalogSession {
    /// Streams every tagged TV episode through `callback`, one row at a
    /// time. A callback error aborts the stream and is returned.
    pub async fn process_tv_exports_info<F, Fut>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(TvExportEntry) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let sql = format!("{TV_EXPORT_SELECT} ORDER BY tv_episodes.id");
        let mut rows = sqlx::query_as::<_, TvExportEntry>(&sql).fetch(self.conn());
        while let Some(entry) = rows.try_next().await? {
            callback(entry).await?;
        }
        Ok(())
    }

    /// Streams every tagged movie through `callback`.
    pub async fn process_movie_exports_info<F, Fut>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(MovieExportEntry) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let sql = format!("{MOVIE_EXPORT_SELECT} ORDER BY movies.id");
        let mut rows = sqlx::query_as::<_, MovieExportEntry>(&sql).fetch(self.conn());
        while let Some(entry) = rows.try_next().await? {
            callback(entry).await?;
        }
        Ok(())
    }

    /// Single-row variant used by the incremental splice path.
    pub async fn fetch_one_tv_export_info(&mut self, video_id: i64) -> Result<TvExportEntry> {
        let sql = format!("{TV_EXPORT_SELECT} AND video_files.id = ? LIMIT 1");
        let entry = sqlx::query_as(&sql)
            .bind(video_id)
            .fetch_one(self.conn())
            .await?;
        Ok(entry)
    }

    pub async fn fetch_one_movie_export_info(&mut self, video_id: i64) -> Result<MovieExportEntry> {
        let sql = format!("{MOVIE_EXPORT_SELECT} AND video_files.id = ? LIMIT 1");
        let entry = sqlx::query_as(&sql)
            .bind(video_id)
            .fetch_one(self.conn())
            .await?;
        Ok(entry)
    }
}
