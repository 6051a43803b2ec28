use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Top-level configuration file.
///
/// Loaded from `$CONFIG_PATH`, falling back to `./config/config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root for rips, blobs, exports and the database file. A relative
    /// path is resolved against `base_path`.
    pub data_directory: PathBuf,

    /// Directory relative paths are resolved against. Defaults to the
    /// config file's parent directory.
    #[serde(default)]
    pub base_path: Option<PathBuf>,

    /// Command used for media analysis (`analyze-mkv` / `srt2json`).
    #[serde(default = "default_analysis_cli")]
    pub analysis_cli: String,

    /// Worker count for the identification engine. Defaults to the
    /// number of CPU cores.
    #[serde(default)]
    pub analysis_workers: Option<usize>,

    pub tmdb_api_key: String,
    pub ost_login: OstLogin,

    pub web_serve_address: String,
    pub grpc_serve_address: String,

    #[serde(default)]
    pub exports_dirs: HashMap<String, ExportDirConfig>,

    #[serde(default)]
    pub enable_autorip: bool,

    /// Name → URL of the drive controllers this coordinator dispatches to.
    #[serde(default)]
    pub drive_controllers: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OstLogin {
    pub api_key: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDirConfig {
    pub media_type: ExportMediaType,
    pub link_type: ExportLinkType,
}

/// Valid values are `TvShows` and `Movies`; anything else is a
/// configuration error surfaced at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportMediaType {
    TvShows,
    Movies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportLinkType {
    Symbolic,
    Hard,
}

fn default_analysis_cli() -> String {
    "ripstash-analysis-cli".to_string()
}

impl Config {
    /// Loads the config from `$CONFIG_PATH` or `./config/config.json`.
    pub fn load() -> Result<Self> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "./config/config.json".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&contents)?;

        if config.base_path.is_none() {
            let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            config.base_path = Some(base);
        }
        if config.data_directory.is_relative() {
            let base = config.base_path.as_ref().expect("base_path set above");
            config.data_directory = base.join(&config.data_directory);
        }

        Ok(config)
    }

    pub fn rips_dir(&self) -> PathBuf {
        self.data_directory.join("rips")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_directory.join("blobs")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_directory.join("exports")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_directory.join("database.sqlite")
    }

    /// Creates the data directories if they don't exist.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.rips_dir(), self.blobs_dir(), self.exports_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn identify_workers(&self) -> usize {
        self.analysis_workers.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "data_directory": "data",
            "tmdb_api_key": "key",
            "ost_login": { "api_key": "k", "username": "u", "password": "p" },
            "web_serve_address": "0.0.0.0:8080",
            "grpc_serve_address": "0.0.0.0:8081",
        })
    }

    #[test]
    fn relative_data_dir_resolves_against_config_parent() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, minimal_json().to_string()).unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.data_directory, dir.path().join("data"));
        assert_eq!(config.database_path(), dir.path().join("data/database.sqlite"));
        assert_eq!(config.analysis_cli, "ripstash-analysis-cli");
    }

    #[test]
    fn invalid_media_type_is_rejected() {
        let mut json = minimal_json();
        json["exports_dirs"] = serde_json::json!({
            "shows": { "media_type": "Music", "link_type": "Symbolic" }
        });
        let err = serde_json::from_value::<Config>(json);
        assert!(err.is_err());
    }

    #[test]
    fn valid_exports_parse() {
        let mut json = minimal_json();
        json["exports_dirs"] = serde_json::json!({
            "shows": { "media_type": "TvShows", "link_type": "Symbolic" },
            "movies": { "media_type": "Movies", "link_type": "Hard" }
        });
        let config = serde_json::from_value::<Config>(json).unwrap();
        assert_eq!(
            config.exports_dirs["shows"].media_type,
            ExportMediaType::TvShows
        );
        assert_eq!(config.exports_dirs["movies"].link_type, ExportLinkType::Hard);
    }
}
