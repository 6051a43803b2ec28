//! TMDB metadata provider: canonical movie/TV records and posters,
//! imported into the catalog keyed by external id.

use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::blobs::BlobStore;
use crate::catalog::{CatalogSession, CatalogStore, Movie, TvEpisode, TvSeason, TvShow};
use crate::error::{CoreError, Result};

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p";

/// Thin API client; the importer layers catalog semantics on top.
pub struct TmdbClient {
    bearer_token: String,
    client: Client,
}

impl TmdbClient {
    pub fn new(bearer_token: String) -> Self {
        Self {
            bearer_token,
            client: Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(format!("{TMDB_API_BASE}{path}"))
            .bearer_auth(&self.bearer_token)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn get_movie_details(&self, movie_id: i32) -> Result<MovieDetails> {
        self.get_json(&format!("/movie/{movie_id}"), &[]).await
    }

    pub async fn get_tv_details(&self, tv_id: i32) -> Result<TvDetails> {
        self.get_json(&format!("/tv/{tv_id}"), &[]).await
    }

    pub async fn get_tv_season_details(
        &self,
        tv_id: i32,
        season_number: i64,
    ) -> Result<SeasonDetails> {
        self.get_json(&format!("/tv/{tv_id}/season/{season_number}"), &[])
            .await
    }

    pub async fn search_movies(&self, query: &str, year: Option<&str>, page: u32) -> Result<SearchPage> {
        let mut params = vec![
            ("query", query.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }
        self.get_json("/search/movie", &params).await
    }

    pub async fn search_tv(&self, query: &str, year: Option<&str>, page: u32) -> Result<SearchPage> {
        let mut params = vec![
            ("query", query.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(year) = year {
            params.push(("first_air_date_year", year.to_string()));
        }
        self.get_json("/search/tv", &params).await
    }

    pub async fn search_multi(&self, query: &str, page: u32) -> Result<SearchPage> {
        self.get_json(
            "/search/multi",
            &[("query", query.to_string()), ("page", page.to_string())],
        )
        .await
    }

    /// Fetches an image by its TMDB path, returning the MIME type and
    /// raw bytes.
    pub async fn download_image(&self, image_path: &str) -> Result<(String, Vec<u8>)> {
        let url = format!("{TMDB_IMAGE_BASE}/original{image_path}");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let mime_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                CoreError::ProtocolMismatch(format!("poster {image_path} missing content-type"))
            })?;
        let bytes = response.bytes().await?;
        Ok((mime_type, bytes.to_vec()))
    }
}

/// Imports TMDB records into the catalog. Each import runs in a single
/// transaction so a mid-flight failure leaves the catalog unchanged;
/// poster download failures only cost the poster.
pub struct TmdbImporter {
    store: CatalogStore,
    client: TmdbClient,
}

impl TmdbImporter {
    pub fn new(store: CatalogStore, bearer_token: String) -> Self {
        Self {
            store,
            client: TmdbClient::new(bearer_token),
        }
    }

    pub fn client(&self) -> &TmdbClient {
        &self.client
    }

    /// Downloads a poster into the blob store, returning the image row
    /// id, or `None` (logged) when the fetch fails.
    async fn try_import_poster(
        &self,
        session: &mut CatalogSession,
        blobs: &BlobStore,
        image_path: &str,
    ) -> Option<i64> {
        let fetched = self.client.download_image(image_path).await;
        let (mime_type, bytes) = match fetched {
            Ok(data) => data,
            Err(err) => {
                warn!(image_path, %err, "failed to fetch poster; continuing without");
                return None;
            }
        };
        let name = image_path.trim_start_matches('/').to_string();
        match blobs.add_image(session, Some(name), mime_type, &bytes).await {
            Ok(image) => Some(image.id),
            Err(err) => {
                warn!(image_path, %err, "failed to store poster; continuing without");
                None
            }
        }
    }

    pub async fn import_movie(&self, tmdb_id: i32, blobs: &BlobStore) -> Result<Movie> {
        let details = self.client.get_movie_details(tmdb_id).await?;
        if details.title.is_empty() {
            return Err(CoreError::ProtocolMismatch(format!(
                "tmdb movie {tmdb_id} has no title"
            )));
        }

        let mut session = self.store.begin().await?;

        let poster_blob = match details.poster_path.as_deref() {
            Some(path) if !path.is_empty() => {
                self.try_import_poster(&mut session, blobs, path).await
            }
            _ => None,
        };

        let mut movie = Movie {
            id: 0,
            tmdb_id: Some(details.id),
            poster_blob,
            title: details.title,
            release_year: release_year(details.release_date.as_deref()),
            description: non_empty(details.overview),
            runtime: match details.runtime {
                Some(0) | None => None,
                Some(minutes) => Some(minutes),
            },
        };
        movie.id = session.upsert_tmdb_movie(&movie).await?;
        session.commit().await?;
        Ok(movie)
    }

    /// Imports a show with every season and episode. One transaction
    /// for the whole tree.
    pub async fn import_tv(&self, tmdb_id: i32, blobs: &BlobStore) -> Result<TvShow> {
        let details = self.client.get_tv_details(tmdb_id).await?;
        if details.name.is_empty() {
            return Err(CoreError::ProtocolMismatch(format!(
                "tmdb show {tmdb_id} has no name"
            )));
        }

        let mut session = self.store.begin().await?;

        let poster_blob = match details.poster_path.as_deref() {
            Some(path) if !path.is_empty() => {
                self.try_import_poster(&mut session, blobs, path).await
            }
            _ => None,
        };

        let mut show = TvShow {
            id: 0,
            tmdb_id: Some(details.id),
            poster_blob,
            title: details.name.clone(),
            original_release_year: release_year(details.first_air_date.as_deref()),
            description: non_empty(details.overview.clone()),
        };
        show.id = session.upsert_tmdb_tv_show(&show).await?;

        for season_summary in &details.seasons {
            let season_details = self
                .client
                .get_tv_season_details(details.id, season_summary.season_number)
                .await
                .map_err(|err| {
                    err.context(format!(
                        "fetching season {} of show {}",
                        season_summary.season_number, details.id
                    ))
                })?;

            let season_poster = match season_details.poster_path.as_deref() {
                Some(path) if !path.is_empty() => {
                    self.try_import_poster(&mut session, blobs, path).await
                }
                _ => None,
            };

            let mut season = TvSeason {
                id: 0,
                tmdb_id: Some(season_details.id),
                tv_show_id: show.id,
                season_number: season_summary.season_number,
                poster_blob: season_poster,
                title: season_details.name,
                description: non_empty(season_details.overview),
            };
            season.id = session.upsert_tmdb_tv_season(&season).await?;

            for episode_details in season_details.episodes {
                let thumbnail_blob = match episode_details.still_path.as_deref() {
                    Some(path) if !path.is_empty() => {
                        self.try_import_poster(&mut session, blobs, path).await
                    }
                    _ => None,
                };

                let episode = TvEpisode {
                    id: 0,
                    tmdb_id: Some(episode_details.id),
                    tv_show_id: show.id,
                    tv_season_id: season.id,
                    episode_number: episode_details.episode_number,
                    thumbnail_blob,
                    title: episode_details.name,
                    description: non_empty(episode_details.overview),
                    runtime: match episode_details.runtime {
                        Some(0) | None => None,
                        Some(minutes) => Some(minutes),
                    },
                };
                session.upsert_tmdb_tv_episode(&episode).await?;
            }
        }

        session.commit().await?;
        Ok(show)
    }
}

/// `"2020-05-01"` → `"2020"`.
fn release_year(date: Option<&str>) -> Option<String> {
    let date = date?;
    let (year, _) = date.split_once('-')?;
    Some(year.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovieDetails {
    pub id: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub runtime: Option<i64>,
    #[serde(default)]
    pub poster_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TvDetails {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub seasons: Vec<SeasonSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeasonSummary {
    pub season_number: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeasonDetails {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub episodes: Vec<EpisodeDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeDetails {
    pub id: i32,
    pub episode_number: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub runtime: Option<i64>,
    #[serde(default)]
    pub still_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_results: u32,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

/// A multi-search hit; movies use `title`, TV uses `name`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub id: i32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub first_air_date: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
}
