//! Catalog-entity queries: movies, TV shows, seasons and episodes.
//!
//! Upserts are keyed on the external (TMDB) id, which is unique per
//! entity type when present.

use sqlx::Row;

use super::schemas::{Movie, TvEpisode, TvSeason, TvShow};
use super::session::CatalogSession;
use crate::error::Result;

impl CatalogSession {
    pub async fn insert_movie(&mut self, movie: &Movie) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO movies (tmdb_id, poster_blob, title, release_year, description, runtime)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(movie.tmdb_id)
        .bind(movie.poster_blob)
        .bind(&movie.title)
        .bind(&movie.release_year)
        .bind(&movie.description)
        .bind(movie.runtime)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn upsert_tmdb_movie(&mut self, movie: &Movie) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO movies (tmdb_id, poster_blob, title, release_year, description, runtime)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (tmdb_id) DO UPDATE SET
                poster_blob = excluded.poster_blob,
                title = excluded.title,
                release_year = excluded.release_year,
                description = excluded.description,
                runtime = excluded.runtime
            RETURNING id
            ",
        )
        .bind(movie.tmdb_id)
        .bind(movie.poster_blob)
        .bind(&movie.title)
        .bind(&movie.release_year)
        .bind(&movie.description)
        .bind(movie.runtime)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn get_movies(&mut self) -> Result<Vec<Movie>> {
        let movies = sqlx::query_as(
            "SELECT id, tmdb_id, poster_blob, title, release_year, description, runtime
             FROM movies",
        )
        .fetch_all(self.conn())
        .await?;
        Ok(movies)
    }

    pub async fn get_movie_by_id(&mut self, id: i64) -> Result<Movie> {
        let movie = sqlx::query_as(
            "SELECT id, tmdb_id, poster_blob, title, release_year, description, runtime
             FROM movies WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.conn())
        .await?;
        Ok(movie)
    }

    pub async fn get_movie_by_tmdb_id(&mut self, tmdb_id: i32) -> Result<Option<Movie>> {
        let movie = sqlx::query_as(
            "SELECT id, tmdb_id, poster_blob, title, release_year, description, runtime
             FROM movies WHERE tmdb_id = ?",
        )
        .bind(tmdb_id)
        .fetch_optional(self.conn())
        .await?;
        Ok(movie)
    }

    pub async fn insert_tv_show(&mut self, show: &TvShow) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO tv_shows (tmdb_id, poster_blob, title, original_release_year, description)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(show.tmdb_id)
        .bind(show.poster_blob)
        .bind(&show.title)
        .bind(&show.original_release_year)
        .bind(&show.description)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn upsert_tmdb_tv_show(&mut self, show: &TvShow) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO tv_shows (tmdb_id, poster_blob, title, original_release_year, description)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (tmdb_id) DO UPDATE SET
                poster_blob = excluded.poster_blob,
                title = excluded.title,
                original_release_year = excluded.original_release_year,
                description = excluded.description
            RETURNING id
            ",
        )
        .bind(show.tmdb_id)
        .bind(show.poster_blob)
        .bind(&show.title)
        .bind(&show.original_release_year)
        .bind(&show.description)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn get_tv_shows(&mut self) -> Result<Vec<TvShow>> {
        let shows = sqlx::query_as(
            "SELECT id, tmdb_id, poster_blob, title, original_release_year, description
             FROM tv_shows",
        )
        .fetch_all(self.conn())
        .await?;
        Ok(shows)
    }

    pub async fn get_tv_show_by_id(&mut self, id: i64) -> Result<TvShow> {
        let show = sqlx::query_as(
            "SELECT id, tmdb_id, poster_blob, title, original_release_year, description
             FROM tv_shows WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.conn())
        .await?;
        Ok(show)
    }

    pub async fn upsert_tmdb_tv_season(&mut self, season: &TvSeason) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO tv_seasons
                (tmdb_id, tv_show_id, season_number, poster_blob, title, description)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (tmdb_id) DO UPDATE SET
                tv_show_id = excluded.tv_show_id,
                season_number = excluded.season_number,
                poster_blob = excluded.poster_blob,
                title = excluded.title,
                description = excluded.description
            RETURNING id
            ",
        )
        .bind(season.tmdb_id)
        .bind(season.tv_show_id)
        .bind(season.season_number)
        .bind(season.poster_blob)
        .bind(&season.title)
        .bind(&season.description)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn get_tv_seasons(&mut self, show_id: i64) -> Result<Vec<TvSeason>> {
        let seasons = sqlx::query_as(
            "SELECT id, tmdb_id, tv_show_id, season_number, poster_blob, title, description
             FROM tv_seasons WHERE tv_show_id = ?
             ORDER BY season_number",
        )
        .bind(show_id)
        .fetch_all(self.conn())
        .await?;
        Ok(seasons)
    }

    pub async fn upsert_tmdb_tv_episode(&mut self, episode: &TvEpisode) -> Result<i64> {
        let row = sqlx::query(
            "
            INSERT INTO tv_episodes
                (tmdb_id, tv_show_id, tv_season_id, episode_number,
                 thumbnail_blob, title, description, runtime)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (tmdb_id) DO UPDATE SET
                tv_show_id = excluded.tv_show_id,
                tv_season_id = excluded.tv_season_id,
                episode_number = excluded.episode_number,
                thumbnail_blob = excluded.thumbnail_blob,
                title = excluded.title,
                description = excluded.description,
                runtime = excluded.runtime
            RETURNING id
            ",
        )
        .bind(episode.tmdb_id)
        .bind(episode.tv_show_id)
        .bind(episode.tv_season_id)
        .bind(episode.episode_number)
        .bind(episode.thumbnail_blob)
        .bind(&episode.title)
        .bind(&episode.description)
        .bind(episode.runtime)
        .fetch_one(self.conn())
        .await?;
        Ok(row.get(0))
    }

    pub async fn get_tv_episodes(&mut self, season_id: i64) -> Result<Vec<TvEpisode>> {
        let episodes = sqlx::query_as(
            "SELECT id, tmdb_id, tv_show_id, tv_season_id, episode_number,
                    thumbnail_blob, title, description, runtime
             FROM tv_episodes WHERE tv_season_id = ?
             ORDER BY episode_number",
        )
        .bind(season_id)
        .fetch_all(self.conn())
        .await?;
        Ok(episodes)
    }

    pub async fn get_tv_episode_by_id(&mut self, id: i64) -> Result<TvEpisode> {
        let episode = sqlx::query_as(
            "SELECT id, tmdb_id, tv_show_id, tv_season_id, episode_number,
                    thumbnail_blob, title, description, runtime
             FROM tv_episodes WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.conn())
        .await?;
        Ok(episode)
    }

    pub async fn get_tv_episode_by_tmdb_id(&mut self, tmdb_id: i32) -> Result<Option<TvEpisode>> {
        let episode = sqlx::query_as(
            "SELECT id, tmdb_id, tv_show_id, tv_season_id, episode_number,
                    thumbnail_blob, title, description, runtime
             FROM tv_episodes WHERE tmdb_id = ?",
        )
        .bind(tmdb_id)
        .fetch_optional(self.conn())
        .await?;
        Ok(episode)
    }
}
