//! Export projection: materializes tagged videos into human-readable
//! link trees. Directory contents are derived entirely from the
//! catalog, so an export is always safe to delete and rebuild.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::error;

use crate::blobs::BlobStore;
use crate::catalog::{CatalogStore, MovieExportEntry, TvExportEntry, VideoType};
use crate::config::{ExportDirConfig, ExportLinkType, ExportMediaType};
use crate::error::{CoreError, Result};

pub struct ExportProjector {
    store: CatalogStore,
    blobs: BlobStore,
    base_dir: PathBuf,
    exports: HashMap<String, ExportDirConfig>,
    in_use: RwLock<()>,
}

impl ExportProjector {
    pub fn new(
        store: CatalogStore,
        blobs: BlobStore,
        base_dir: impl Into<PathBuf>,
        exports: HashMap<String, ExportDirConfig>,
    ) -> Result<Self> {
        let base_dir: PathBuf = base_dir.into();
        if !base_dir.is_dir() {
            return Err(CoreError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("exports directory {} is not a directory", base_dir.display()),
            )));
        }
        Ok(Self {
            store,
            blobs,
            base_dir,
            exports,
            in_use: RwLock::new(()),
        })
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// Clears one export directory and re-links every tagged video of
    /// its media type.
    pub async fn rebuild(&self, export_name: &str) -> Result<()> {
        let _in_use = self.in_use.read().await;

        let config = *self
            .exports
            .get(export_name)
            .ok_or(CoreError::NotFound)?;
        let export_dir = self.base_dir.join(export_name);

        match tokio::fs::read_dir(&export_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        tokio::fs::remove_dir_all(entry.path()).await?;
                    } else {
                        tokio::fs::remove_file(entry.path()).await?;
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&export_dir).await?;
            }
            Err(err) => return Err(err.into()),
        }

        let mut session = self.store.begin().await?;
        let result = match config.media_type {
            ExportMediaType::Movies => {
                session
                    .process_movie_exports_info(|entry| {
                        self.place_movie(&export_dir, config.link_type, entry)
                    })
                    .await
            }
            ExportMediaType::TvShows => {
                session
                    .process_tv_exports_info(|entry| {
                        self.place_tv_episode(&export_dir, config.link_type, entry)
                    })
                    .await
            }
        };
        session.rollback().await?;
        result
    }

    /// Incrementally links one freshly tagged video into every export
    /// whose media type matches.
    pub async fn splice(&self, video_type: VideoType, video_id: i64) -> Result<()> {
        let _in_use = self.in_use.read().await;
        let mut session = self.store.begin().await?;

        let result = match video_type {
            VideoType::Movie => {
                let entry = session.fetch_one_movie_export_info(video_id).await?;
                let mut outcome = Ok(());
                for (name, config) in &self.exports {
                    if config.media_type != ExportMediaType::Movies {
                        continue;
                    }
                    let export_dir = self.base_dir.join(name);
                    outcome = self
                        .place_movie(&export_dir, config.link_type, entry.clone())
                        .await;
                    if outcome.is_err() {
                        break;
                    }
                }
                outcome
            }
            VideoType::TvEpisode => {
                let entry = session.fetch_one_tv_export_info(video_id).await?;
                let mut outcome = Ok(());
                for (name, config) in &self.exports {
                    if config.media_type != ExportMediaType::TvShows {
                        continue;
                    }
                    let export_dir = self.base_dir.join(name);
                    outcome = self
                        .place_tv_episode(&export_dir, config.link_type, entry.clone())
                        .await;
                    if outcome.is_err() {
                        break;
                    }
                }
                outcome
            }
            // Nothing to project for untagged videos or special features.
            VideoType::Untagged | VideoType::SpecialFeature => Ok(()),
        };

        session.rollback().await?;
        result
    }

    async fn place_tv_episode(
        &self,
        export_dir: &Path,
        link_type: ExportLinkType,
        entry: TvExportEntry,
    ) -> Result<()> {
        let destination = export_dir.join(tv_episode_relative_path(&entry));
        self.place_link(link_type, &entry.episode_blob, &destination)
            .await
    }

    async fn place_movie(
        &self,
        export_dir: &Path,
        link_type: ExportLinkType,
        entry: MovieExportEntry,
    ) -> Result<()> {
        let destination = export_dir.join(movie_relative_path(&entry));
        self.place_link(link_type, &entry.movie_blob, &destination)
            .await
    }

    async fn place_link(
        &self,
        link_type: ExportLinkType,
        blob_id: &str,
        destination: &Path,
    ) -> Result<()> {
        let mut created_parents = false;
        loop {
            let attempt = match link_type {
                ExportLinkType::Symbolic => self.blobs.symbolic_link(blob_id, destination).await,
                ExportLinkType::Hard => self.blobs.hard_link(blob_id, destination).await,
            };
            return match attempt {
                Ok(()) => Ok(()),
                Err(CoreError::Io(err))
                    if err.kind() == ErrorKind::NotFound && !created_parents =>
                {
                    let parent = destination.parent().expect("destination has a parent");
                    tokio::fs::create_dir_all(parent).await?;
                    created_parents = true;
                    continue;
                }
                // A missing blob costs this link only; the row survives
                // for a later rebuild.
                Err(CoreError::BlobMissing(missing)) => {
                    error!(blob_id = %missing, destination = %destination.display(), "blob missing from filesystem");
                    Ok(())
                }
                Err(err) => Err(err),
            };
        }
    }
}

/// Escapes a title field for use as one path component. Forward slashes
/// become underscores; nothing else is rewritten.
fn path_escape(input: &str) -> String {
    input.replace('/', "_")
}

/// `<Show> (<Year>) {tmdb-<Id>}/Season <NN>/<Show> (<Year>) - S<NN>E<NN> - <Episode> - {tmdb-<EpId>}.mkv`
pub fn tv_episode_relative_path(entry: &TvExportEntry) -> PathBuf {
    let show_folder = format!(
        "{} ({}) {{tmdb-{}}}",
        path_escape(&entry.tv_title),
        path_escape(&entry.tv_release_year),
        entry.tv_tmdb,
    );
    let season_folder = format!("Season {:02}", entry.season_number);
    let episode_file = format!(
        "{} ({}) - S{:02}E{:02} - {} - {{tmdb-{}}}.mkv",
        path_escape(&entry.tv_title),
        path_escape(&entry.tv_release_year),
        entry.season_number,
        entry.episode_number,
        path_escape(&entry.episode_title),
        entry.episode_tmdb,
    );
    PathBuf::from(show_folder).join(season_folder).join(episode_file)
}

/// `<Title> (<Year>) {tmdb-<Id>}/<Title> (<Year>) - {tmdb-<Id>}.mkv`
pub fn movie_relative_path(entry: &MovieExportEntry) -> PathBuf {
    let movie_folder = format!(
        "{} ({}) {{tmdb-{}}}",
        path_escape(&entry.movie_title),
        path_escape(&entry.movie_release_year),
        entry.movie_tmdb,
    );
    let movie_file = format!(
        "{} ({}) - {{tmdb-{}}}.mkv",
        path_escape(&entry.movie_title),
        path_escape(&entry.movie_release_year),
        entry.movie_tmdb,
    );
    PathBuf::from(movie_folder).join(movie_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv_entry() -> TvExportEntry {
        TvExportEntry {
            tv_title: "The / Show".to_string(),
            tv_release_year: "2020".to_string(),
            tv_tmdb: 1,
            season_number: 1,
            episode_title: "Pilot".to_string(),
            episode_number: 5,
            episode_tmdb: 100,
            episode_blob: "blob".to_string(),
        }
    }

    #[test]
    fn tv_path_is_deterministic_and_escaped() {
        let path = tv_episode_relative_path(&tv_entry());
        assert_eq!(
            path,
            PathBuf::from(
                "The _ Show (2020) {tmdb-1}/Season 01/The _ Show (2020) - S01E05 - Pilot - {tmdb-100}.mkv"
            )
        );
        // Same inputs, same bytes.
        assert_eq!(path, tv_episode_relative_path(&tv_entry()));
    }

    #[test]
    fn movie_path_is_deterministic_and_escaped() {
        let entry = MovieExportEntry {
            movie_title: "Face/Off".to_string(),
            movie_release_year: "1997".to_string(),
            movie_tmdb: 754,
            movie_blob: "blob".to_string(),
        };
        assert_eq!(
            movie_relative_path(&entry),
            PathBuf::from("Face_Off (1997) {tmdb-754}/Face_Off (1997) - {tmdb-754}.mkv")
        );
    }

    #[test]
    fn numbers_are_zero_padded_to_two_digits() {
        let mut entry = tv_entry();
        entry.season_number = 12;
        entry.episode_number = 103;
        let path = tv_episode_relative_path(&entry);
        let text = path.to_string_lossy();
        assert!(text.contains("Season 12"));
        assert!(text.contains("S12E103"));
    }

    #[test]
    fn only_forward_slashes_are_escaped() {
        let mut entry = tv_entry();
        entry.episode_title = "What? It's: a \"title\"!".to_string();
        let path = tv_episode_relative_path(&entry);
        assert!(path.to_string_lossy().contains("What? It's: a \"title\"!"));
    }
}
