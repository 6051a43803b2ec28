#![allow(unused)]

pub mod fake_ost;

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use ripstash_core::analysis::AnalysisRunner;
use ripstash_core::config::ExportDirConfig;
use ripstash_core::coordinator::DriveControllerClient;
use ripstash_core::providers::{OstClient, TmdbImporter};
use ripstash_core::{BlobStore, CatalogStore, Coordinator, ExportProjector};

/// A data directory with the standard layout plus an open store.
pub struct TestEnv {
    pub tempdir: TempDir,
    pub store: CatalogStore,
    pub blobs: BlobStore,
}

impl TestEnv {
    pub async fn new() -> Self {
        let tempdir = TempDir::new().expect("create test data directory");
        for sub in ["rips", "blobs", "exports"] {
            std::fs::create_dir(tempdir.path().join(sub)).unwrap();
        }
        let store = CatalogStore::open(&tempdir.path().join("database.sqlite"))
            .await
            .expect("open catalog store");
        let blobs = BlobStore::new(tempdir.path().join("blobs")).expect("open blob store");
        Self {
            tempdir,
            store,
            blobs,
        }
    }

    pub fn rips_dir(&self) -> PathBuf {
        self.tempdir.path().join("rips")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.tempdir.path().join("blobs")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.tempdir.path().join("exports")
    }

    /// Assembles a coordinator over this environment. Provider clients
    /// point at `ost_base_url` when given, otherwise at a dead address.
    pub fn coordinator(
        &self,
        analysis_cli: &str,
        controllers: HashMap<String, Arc<dyn DriveControllerClient>>,
        autorip: bool,
        ost_base_url: Option<String>,
        exports: HashMap<String, ExportDirConfig>,
    ) -> Arc<Coordinator> {
        let mut ost = OstClient::new("test-key".into(), "user".into(), "password".into());
        if let Some(base_url) = ost_base_url {
            ost = ost.with_base_url(base_url);
        }
        let projector = ExportProjector::new(
            self.store.clone(),
            self.blobs.clone(),
            self.exports_dir(),
            exports,
        )
        .expect("set up export projector");

        Arc::new(Coordinator::new(
            self.store.clone(),
            self.blobs.clone(),
            AnalysisRunner::new(analysis_cli),
            TmdbImporter::new(self.store.clone(), "unused-tmdb-key".into()),
            ost,
            projector,
            self.rips_dir(),
            2,
            autorip,
            controllers,
        ))
    }
}

/// Writes an executable stand-in for the analysis CLI and returns its
/// path. `body` is the shell script body; `"$1"` holds the subcommand
/// and `"$3"` the target path.
pub fn write_fake_analyzer(dir: &Path, body: &str) -> String {
    let script_path = dir.join("fake-analyzer.sh");
    let script = format!("#!/bin/sh\n{body}\n");
    std::fs::write(&script_path, script).unwrap();
    let mut permissions = std::fs::metadata(&script_path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&script_path, permissions).unwrap();
    script_path.to_string_lossy().into_owned()
}

/// An analyzer that reports fixed metadata (and optional subtitles) for
/// every file it is shown.
pub fn analyzer_returning(dir: &Path, json: &str) -> String {
    write_fake_analyzer(
        dir,
        &format!("cat <<'ANALYSIS'\n{json}\nANALYSIS"),
    )
}

pub const BASIC_ANALYSIS_JSON: &str = r#"{
    "resolution_width": 1920,
    "resolution_height": 1080,
    "duration": 2725,
    "video_hash": "deadbeefcafef00d"
}"#;
