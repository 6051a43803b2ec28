//! Authenticated client for the OpenSubtitles-compatible provider.
//!
//! Reference subtitles fetched here are the comparison surface the
//! identification engine scores disc rips against, so the client
//! cross-validates up to three candidates before trusting one.

use std::cmp::Ordering;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::blobs::BlobStore;
use crate::catalog::{CatalogSession, OstDownload, VideoType};
use crate::error::{CoreError, Result};

const DEFAULT_BASE_URL: &str = "https://api.opensubtitles.com/api/v1";
const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);
const USER_AGENT: &str = concat!("Ripstash v", env!("CARGO_PKG_VERSION"));

/// How many top-ranked candidates participate in cross-validation.
const COMPARISON_LIMIT: usize = 3;

#[derive(Debug, Clone)]
struct AuthToken {
    token: String,
    issued_at: Instant,
}

/// Long-lived authenticated client. The bearer token and its issuance
/// timestamp live behind one mutex; 401 handling re-authenticates only
/// if no other task already refreshed the token after this task's
/// snapshot was taken.
pub struct OstClient {
    agent: reqwest::Client,
    base_url: String,
    api_key: String,
    username: String,
    password: String,
    auth: Mutex<Option<AuthToken>>,
}

impl OstClient {
    pub fn new(api_key: String, username: String, password: String) -> Self {
        Self {
            agent: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("default reqwest client"),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            username,
            password,
            auth: Mutex::new(None),
        }
    }

    /// Points the client at a different API root. Used by tests to aim
    /// at a local fake.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Logs in and renews the token. Call with the auth lock held.
    async fn login(&self, auth: &mut MutexGuard<'_, Option<AuthToken>>) -> Result<()> {
        let response = self
            .agent
            .post(format!("{}/login", self.base_url))
            .header("user-agent", USER_AGENT)
            .header("api-key", &self.api_key)
            .json(&json!({
                "username": &self.username,
                "password": &self.password,
            }))
            .send()
            .await?;

        #[derive(Deserialize)]
        struct LoginResponse {
            token: String,
        }
        let login: LoginResponse = response.json().await?;

        **auth = Some(AuthToken {
            token: login.token,
            issued_at: Instant::now(),
        });
        Ok(())
    }

    /// Attaches auth headers and runs the request, retrying once per
    /// token refresh on 401. Non-200, non-401 statuses are surfaced as
    /// errors unless `accept_non_success` is set.
    async fn authenticated(
        &self,
        build: impl Fn() -> RequestBuilder,
        accept_non_success: bool,
    ) -> Result<Response> {
        let mut guard = self.auth.lock().await;
        if guard.is_none() {
            self.login(&mut guard).await?;
        }
        let state = guard.as_ref().expect("token set by login above");
        let mut snapshot = state.issued_at;
        let mut token = state.token.clone();
        drop(guard);

        loop {
            let response = build()
                .header("user-agent", USER_AGENT)
                .header("api-key", &self.api_key)
                .header("authorization", format!("Bearer {token}"))
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => return Ok(response),
                StatusCode::UNAUTHORIZED => {
                    let mut guard = self.auth.lock().await;
                    match guard.as_ref() {
                        // Another task refreshed after our snapshot;
                        // pick up its token instead of logging in again.
                        Some(state) if state.issued_at > snapshot => {
                            snapshot = state.issued_at;
                            token = state.token.clone();
                        }
                        _ => {
                            self.login(&mut guard).await?;
                            let state = guard.as_ref().expect("token set by login above");
                            snapshot = state.issued_at;
                            token = state.token.clone();
                        }
                    }
                }
                status if accept_non_success => {
                    debug!(%status, "accepting non-success provider response");
                    return Ok(response);
                }
                status => {
                    return Err(CoreError::UnexpectedStatus {
                        status: status.as_u16(),
                        url: response.url().to_string(),
                    });
                }
            }
        }
    }

    /// Searches the provider for English subtitles of a TMDB title,
    /// flattened per file and sorted most-trustworthy first.
    pub async fn find_subtitles(&self, tmdb_id: i32) -> Result<Vec<SubtitleSummary>> {
        let response = self
            .authenticated(
                || {
                    self.agent
                        .get(format!("{}/subtitles", self.base_url))
                        .query(&[("tmdb_id", tmdb_id.to_string())])
                },
                false,
            )
            .await?;
        let results: SearchResults = response.json().await?;

        let mut files: Vec<SubtitleSummary> = results
            .data
            .iter()
            .filter(|subtitle| {
                subtitle.attributes.language.as_deref() == Some("en")
            })
            .flat_map(|subtitle| {
                let lang = subtitle
                    .attributes
                    .language
                    .as_deref()
                    .expect("language filtered above");
                subtitle.attributes.files.iter().map(move |file| SubtitleSummary {
                    name: format!(
                        "lang: {}, name: {}, uploader: {} ({})",
                        lang,
                        file.file_name,
                        subtitle.attributes.uploader.name,
                        subtitle.attributes.uploader.rank,
                    ),
                    file_id: file.file_id,
                    download_count: subtitle.attributes.download_count,
                    new_download_count: subtitle.attributes.new_download_count,
                    uploader_rank: subtitle.attributes.uploader.rank.clone(),
                })
            })
            .collect();

        files.sort_by(compare_summaries);
        Ok(files)
    }

    /// Resolves a file id into subtitle text via the download endpoint.
    pub async fn download_subtitles(&self, file_id: u32) -> Result<String> {
        let response = self
            .authenticated(
                || {
                    self.agent
                        .post(format!("{}/download", self.base_url))
                        .json(&json!({ "file_id": file_id }))
                },
                false,
            )
            .await?;

        #[derive(Deserialize)]
        struct DownloadPointer {
            link: String,
        }
        let pointer: DownloadPointer = response.json().await?;
        if pointer.link.is_empty() {
            return Err(CoreError::NoSubtitles.context("provider returned an empty link"));
        }

        let body = self
            .authenticated(|| self.agent.get(&pointer.link), false)
            .await?
            .text()
            .await?;
        Ok(body)
    }

    /// Downloads up to three top-ranked candidates and keeps the one
    /// whose normalized text sits closest to the others, weeding out
    /// mislabeled or machine-garbled uploads.
    pub async fn find_best_subtitles(&self, tmdb_id: i32) -> Result<BestSubtitles> {
        let summaries = self.find_subtitles(tmdb_id).await?;
        if summaries.is_empty() {
            return Err(CoreError::NoSubtitles);
        }

        let mut candidates = Vec::with_capacity(COMPARISON_LIMIT);
        for summary in summaries.into_iter().take(COMPARISON_LIMIT) {
            let text = self.download_subtitles(summary.file_id).await?;
            candidates.push((summary.name, text));
        }

        let stripped: Vec<String> = candidates
            .iter()
            .map(|(_, text)| strip_subtitles(text))
            .collect();
        let best = tokio::task::spawn_blocking(move || select_best_candidate(&stripped))
            .await
            .expect("candidate selection task panicked")?;

        let (filename, subtitles) = candidates.swap_remove(best);
        Ok(BestSubtitles { filename, subtitles })
    }

    /// Returns the stored reference subtitles for a catalog entity, or
    /// fetches, persists and returns a fresh download.
    pub async fn get_subtitles(
        &self,
        session: &mut CatalogSession,
        blobs: &BlobStore,
        video_type: VideoType,
        match_id: i64,
        tmdb_id: i32,
    ) -> Result<(OstDownload, String)> {
        let existing = session
            .get_ost_downloads_by_match(video_type, match_id)
            .await?
            .into_iter()
            .next();
        if let Some(existing) = existing {
            let text = tokio::fs::read_to_string(blobs.get_path(&existing.blob_id)).await?;
            return Ok((existing, text));
        }

        let best = self.find_best_subtitles(tmdb_id).await?;
        let download = blobs
            .add_ost_subtitles(session, video_type, match_id, best.filename, &best.subtitles)
            .await?;
        Ok((download, best.subtitles))
    }
}

#[derive(Debug, Clone)]
pub struct SubtitleSummary {
    pub name: String,
    pub file_id: u32,
    pub download_count: u32,
    pub new_download_count: u32,
    pub uploader_rank: String,
}

#[derive(Debug, Clone)]
pub struct BestSubtitles {
    pub filename: String,
    pub subtitles: String,
}

/// Most-trustworthy-first ordering: flagged uploaders sink to the
/// bottom, then fresh downloads, then total downloads, then rank.
fn compare_summaries(a: &SubtitleSummary, b: &SubtitleSummary) -> Ordering {
    let a_flagged = a.uploader_rank.eq_ignore_ascii_case("admin warning");
    let b_flagged = b.uploader_rank.eq_ignore_ascii_case("admin warning");
    a_flagged
        .cmp(&b_flagged)
        .then(b.new_download_count.cmp(&a.new_download_count))
        .then(b.download_count.cmp(&a.download_count))
        .then(numeric_rank(&a.uploader_rank).cmp(&numeric_rank(&b.uploader_rank)))
}

/// Picks the candidate with the lowest averaged distance to the rest.
/// Errs with `UnreliableSubtitles` when even the best average exceeds
/// half the longest normalized candidate.
fn select_best_candidate(stripped: &[String]) -> Result<usize> {
    match stripped.len() {
        0 => return Err(CoreError::NoSubtitles),
        1 => return Ok(0),
        _ => {}
    }

    let mut distance_sums = vec![0usize; stripped.len()];
    for a in 0..stripped.len() {
        for b in (a + 1)..stripped.len() {
            let distance = levenshtein::levenshtein(&stripped[a], &stripped[b]);
            distance_sums[a] += distance;
            distance_sums[b] += distance;
        }
    }

    let peer_count = stripped.len() - 1;
    let (best, best_average) = distance_sums
        .iter()
        .map(|sum| sum / peer_count)
        .enumerate()
        .min_by_key(|(_, average)| *average)
        .expect("at least two candidates");

    let max_len = stripped.iter().map(String::len).max().unwrap_or(0);
    if best_average > max_len / 2 {
        return Err(CoreError::UnreliableSubtitles);
    }

    Ok(best)
}

/// Reduces subtitle text to a single-line comparison surface: drops
/// markup tags, cue numbers, timing lines and everything outside
/// `[A-Za-z0-9 ?.,!\n]`, then collapses whitespace runs to one space.
pub fn strip_subtitles(subtitles: &str) -> String {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();

    let strip = STRIP.get_or_init(|| {
        Regex::new(r"(?m)(?:<\s*[^>]*>|<\s*/\s*a>)|(?:^.*-->.*$|^[0-9]+$|[^a-zA-Z0-9 ?\.,!\n]|^\s*-*\s*|\r)")
            .expect("subtitle strip regex")
    });
    let whitespace =
        WHITESPACE.get_or_init(|| Regex::new(r"[\n ]+").expect("whitespace regex"));

    let intermediate = strip.replace_all(subtitles, "");
    whitespace.replace_all(&intermediate, " ").into_owned()
}

/// Numeric trust score for an uploader rank; lower wins.
fn numeric_rank(rank: &str) -> usize {
    match rank.to_lowercase().as_str() {
        "administrator" => 0,
        "application developers" => 10,
        "gold member" => 20,
        "bronze member" => 30,
        "anonymous" => 100,
        "admin warning" => 110,
        _ => 90,
    }
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    data: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    attributes: SubtitleAttributes,
}

#[derive(Debug, Deserialize)]
struct SubtitleAttributes {
    language: Option<String>,
    download_count: u32,
    new_download_count: u32,
    uploader: Uploader,
    files: Vec<SubtitleFileRef>,
}

#[derive(Debug, Deserialize)]
struct Uploader {
    name: String,
    rank: String,
}

#[derive(Debug, Deserialize)]
struct SubtitleFileRef {
    file_id: u32,
    file_name: String,
}
