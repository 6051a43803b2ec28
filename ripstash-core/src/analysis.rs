//! Adapter around the external analysis CLI, which extracts technical
//! metadata and subtitles from ripped media as JSON on stdout.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{CoreError, Result};

/// Measured details for one video file.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoDetails {
    pub resolution_width: i64,
    pub resolution_height: i64,
    /// Seconds.
    pub duration: i64,
    /// Hex-encoded content hash.
    pub video_hash: String,
    /// Extracted English subtitles as SRT text, when the disc carried
    /// a usable track.
    #[serde(default)]
    pub subtitles: Option<String>,
    #[serde(default)]
    pub extended_metadata: Option<ExtendedMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedMetadata {
    #[serde(default)]
    pub chapter_info: Vec<ChapterInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub title: Option<String>,
    /// Milliseconds from the start of the video.
    pub start_time: i64,
    pub end_time: i64,
}

/// One parsed subtitle cue.
#[derive(Debug, Clone, Deserialize)]
pub struct SubtitleCue {
    pub start: i64,
    pub end: i64,
    pub text: String,
}

impl VideoDetails {
    pub fn decode_hash(&self) -> Result<Vec<u8>> {
        let raw = self.video_hash.as_bytes();
        if raw.len() % 2 != 0 {
            return Err(CoreError::Analysis(format!(
                "analyzer returned odd-length video hash: {}",
                self.video_hash
            )));
        }
        raw.chunks(2)
            .map(|pair| {
                let hex = std::str::from_utf8(pair).map_err(|_| {
                    CoreError::Analysis("video hash is not valid UTF-8".to_string())
                })?;
                u8::from_str_radix(hex, 16).map_err(|_| {
                    CoreError::Analysis(format!("video hash is not hex: {}", self.video_hash))
                })
            })
            .collect()
    }
}

/// Runs the configured analysis CLI as a child process.
#[derive(Debug, Clone)]
pub struct AnalysisRunner {
    cli: String,
}

impl AnalysisRunner {
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    /// `<cli> analyze-mkv -- <path>`; nonzero exit propagates as an
    /// error with the child's stderr attached.
    pub async fn analyze_mkv(&self, path: &Path) -> Result<VideoDetails> {
        let output = Command::new(&self.cli)
            .arg("analyze-mkv")
            .arg("--")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(CoreError::Analysis(format!(
                "analyze-mkv exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    /// Parses SRT text into cues via the CLI's `srt2json` subcommand.
    pub async fn parse_srt(&self, srt_text: &str) -> Result<Vec<SubtitleCue>> {
        let mut child = Command::new(&self.cli)
            .arg("srt2json")
            .arg("--")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().expect("stdin piped above");
        stdin.write_all(srt_text.as_bytes()).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(CoreError::Analysis(format!(
                "srt2json exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    pub async fn parse_srt_file(&self, path: &Path) -> Result<Vec<SubtitleCue>> {
        let output = Command::new(&self.cli)
            .arg("srt2json")
            .arg("--")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(CoreError::Analysis(format!(
                "srt2json exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
