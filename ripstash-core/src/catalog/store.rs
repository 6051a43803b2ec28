use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::session::CatalogSession;
use crate::error::Result;

/// Serializes concurrent transactions instead of failing fast.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS movies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tmdb_id INTEGER UNIQUE,
        poster_blob INTEGER,
        title TEXT NOT NULL,
        release_year TEXT,
        description TEXT,
        runtime INTEGER
    );
    CREATE TABLE IF NOT EXISTS tv_shows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tmdb_id INTEGER UNIQUE,
        poster_blob INTEGER,
        title TEXT NOT NULL,
        original_release_year TEXT,
        description TEXT
    );
    CREATE TABLE IF NOT EXISTS tv_seasons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tmdb_id INTEGER UNIQUE,
        tv_show_id INTEGER NOT NULL,
        season_number INTEGER NOT NULL,
        poster_blob INTEGER,
        title TEXT NOT NULL,
        description TEXT
    );
    CREATE TABLE IF NOT EXISTS tv_episodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tmdb_id INTEGER UNIQUE,
        tv_show_id INTEGER NOT NULL,
        tv_season_id INTEGER NOT NULL,
        episode_number INTEGER NOT NULL,
        thumbnail_blob INTEGER,
        title TEXT NOT NULL,
        description TEXT,
        runtime INTEGER
    );
    CREATE TABLE IF NOT EXISTS rip_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_time INTEGER NOT NULL,
        disc_title TEXT,
        suspected_contents TEXT,
        rip_finished INTEGER NOT NULL DEFAULT 0,
        imported INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS video_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_type INTEGER NOT NULL DEFAULT 0,
        match_id INTEGER,
        blob_id TEXT NOT NULL,
        resolution_width INTEGER,
        resolution_height INTEGER,
        length INTEGER,
        original_video_hash BLOB,
        rip_job INTEGER,
        extended_metadata TEXT
    );
    CREATE TABLE IF NOT EXISTS subtitle_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        blob_id TEXT NOT NULL,
        video_file INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS ost_downloads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_type INTEGER NOT NULL,
        match_id INTEGER NOT NULL,
        filename TEXT NOT NULL,
        blob_id TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS match_info (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_file_id INTEGER NOT NULL,
        ost_download_id INTEGER NOT NULL,
        distance INTEGER NOT NULL,
        max_distance INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS image_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        blob_id TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        name TEXT,
        rip_job INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_video_files_rip_job ON video_files (rip_job);
    CREATE INDEX IF NOT EXISTS idx_subtitle_files_video ON subtitle_files (video_file);
    CREATE INDEX IF NOT EXISTS idx_match_info_video ON match_info (video_file_id);
"#;

/// Durable relational state for the catalog.
///
/// All reads and writes go through a [`CatalogSession`] transaction;
/// sessions are not shared across tasks.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Opens (creating if missing) the database at `path` and applies
    /// the schema.
    ///
    /// The pool is sized to one connection: sqlite serializes writers
    /// anyway, and queueing on the pool avoids lock-upgrade aborts
    /// between concurrent transactions. Waiters get the same 60 s
    /// patience the busy timeout grants.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::raw_sql(SCHEMA).execute(&mut *conn).await?;
        info!("catalog schema initialized");
        Ok(())
    }

    /// Begins a transactional session.
    pub async fn begin(&self) -> Result<CatalogSession> {
        let tx = self.pool.begin().await?;
        Ok(CatalogSession::new(tx))
    }
}
