use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Classification of a video file or reference subtitle.
///
/// Stored as an integer; `match_id` is interpreted against the table
/// this discriminant selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum VideoType {
    Untagged = 0,
    Movie = 1,
    SpecialFeature = 2,
    TvEpisode = 3,
}

/// The user's hint about what a disc holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuspectedContents {
    Movie { tmdb_id: i32 },
    TvEpisodes { episode_tmdb_ids: Vec<i32> },
}

impl SuspectedContents {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Movie {
    pub id: i64,
    pub tmdb_id: Option<i32>,
    pub poster_blob: Option<i64>,
    pub title: String,
    pub release_year: Option<String>,
    pub description: Option<String>,
    pub runtime: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TvShow {
    pub id: i64,
    pub tmdb_id: Option<i32>,
    pub poster_blob: Option<i64>,
    pub title: String,
    pub original_release_year: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TvSeason {
    pub id: i64,
    pub tmdb_id: Option<i32>,
    pub tv_show_id: i64,
    pub season_number: i64,
    pub poster_blob: Option<i64>,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TvEpisode {
    pub id: i64,
    pub tmdb_id: Option<i32>,
    pub tv_show_id: i64,
    pub tv_season_id: i64,
    pub episode_number: i64,
    pub thumbnail_blob: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub runtime: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct RipJob {
    pub id: i64,
    /// Unix seconds at dispatch time.
    pub start_time: i64,
    pub disc_title: Option<String>,
    /// JSON-encoded [`SuspectedContents`], if the user provided a hint.
    pub suspected_contents: Option<String>,
    pub rip_finished: bool,
    pub imported: bool,
}

impl RipJob {
    pub fn suspected(&self) -> serde_json::Result<Option<SuspectedContents>> {
        self.suspected_contents
            .as_deref()
            .map(SuspectedContents::decode)
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct VideoFile {
    pub id: i64,
    pub video_type: VideoType,
    /// Row id in the table selected by `video_type`; null while untagged.
    pub match_id: Option<i64>,
    pub blob_id: String,
    pub resolution_width: Option<i64>,
    pub resolution_height: Option<i64>,
    pub length: Option<i64>,
    pub original_video_hash: Option<Vec<u8>>,
    pub rip_job: Option<i64>,
    /// JSON chapter payload from the analyzer, if any.
    pub extended_metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct SubtitleFile {
    pub id: i64,
    pub blob_id: String,
    pub video_file: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct OstDownload {
    pub id: i64,
    pub video_type: VideoType,
    pub match_id: i64,
    pub filename: String,
    pub blob_id: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct MatchInfo {
    pub id: i64,
    pub video_file_id: i64,
    pub ost_download_id: i64,
    pub distance: i64,
    pub max_distance: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ImageFile {
    pub id: i64,
    pub blob_id: String,
    pub mime_type: String,
    pub name: Option<String>,
    pub rip_job: Option<i64>,
}

/// A video and its extracted subtitle blob, joined for one rip job.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct RipVideoBlobs {
    pub id: i64,
    pub job_id: i64,
    pub video_blob: String,
    pub subtitle_blob: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct DiscSubsWithVideo {
    pub video_id: i64,
    pub subtitle_id: i64,
    pub subtitle_blob: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct RipImageBlob {
    pub job_id: i64,
    pub image_blob: String,
}

/// Denormalized path-building fields for one tagged TV episode.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct TvExportEntry {
    pub tv_title: String,
    pub tv_release_year: String,
    pub tv_tmdb: i32,
    pub season_number: i64,
    pub episode_title: String,
    pub episode_number: i64,
    pub episode_tmdb: i32,
    pub episode_blob: String,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct MovieExportEntry {
    pub movie_title: String,
    pub movie_release_year: String,
    pub movie_tmdb: i32,
    pub movie_blob: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspected_contents_round_trips() {
        let movie = SuspectedContents::Movie { tmdb_id: 603 };
        let episodes = SuspectedContents::TvEpisodes {
            episode_tmdb_ids: vec![42, 43, 44],
        };

        for value in [movie, episodes] {
            let encoded = value.encode().unwrap();
            assert_eq!(SuspectedContents::decode(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn suspected_contents_encoding_is_tagged() {
        let encoded = SuspectedContents::Movie { tmdb_id: 1 }.encode().unwrap();
        assert!(encoded.contains("\"kind\":\"movie\""));
    }
}
