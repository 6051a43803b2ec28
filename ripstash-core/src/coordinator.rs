//! The rip coordinator: owns the rip-job state machine, dispatches jobs
//! to remote drive controllers, reconciles completion notifications and
//! imports finished rips into the blob store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::analysis::AnalysisRunner;
use crate::blobs::BlobStore;
use crate::catalog::{CatalogStore, Movie, RipJob, SuspectedContents, VideoType};
use crate::error::{CoreError, Result};
use crate::exports::ExportProjector;
use crate::identify;
use crate::providers::{OstClient, TmdbImporter};

/// Reported drive status. `Unknown` covers values this coordinator's
/// protocol revision doesn't recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    Empty,
    TrayOpen,
    NotReady,
    DiscLoaded,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct DriveState {
    pub status: DriveStatus,
    pub disc_name: Option<String>,
    pub active_rip_job: bool,
}

#[derive(Debug, Clone)]
pub struct DriveMeta {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipStatus {
    Running,
    Error,
    Completed,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub status: RipStatus,
    pub logs: Vec<String>,
}

/// One drive as the operations UI sees it.
#[derive(Debug, Clone)]
pub struct DriveSummary {
    pub drive_id: u32,
    pub meta: DriveMeta,
    pub state: DriveState,
}

/// Client surface of one remote drive controller. The wire transport
/// lives outside the core; the coordinator only consumes this contract.
#[async_trait]
pub trait DriveControllerClient: Send + Sync {
    async fn get_drive_count(&self) -> Result<u32>;
    async fn get_drive_meta(&self, drive_id: u32) -> Result<DriveMeta>;
    async fn get_drive_state(&self, drive_id: u32) -> Result<DriveState>;
    async fn rip_media(&self, job_id: i64, drive_id: u32, autoeject: bool) -> Result<()>;
    async fn get_job_status(&self, job_id: i64) -> Result<JobStatus>;
    async fn reap_job(&self, job_id: i64) -> Result<()>;
    async fn eject(&self, drive_id: u32) -> Result<()>;
    async fn retract(&self, drive_id: u32) -> Result<()>;
}

/// Settings that can change at runtime. Readers are numerous (every
/// notification takes the read lock); writers are rare.
struct CoordinatorSettings {
    autorip: bool,
    controllers: HashMap<String, Arc<dyn DriveControllerClient>>,
}

pub struct Coordinator {
    store: CatalogStore,
    blobs: BlobStore,
    analysis: AnalysisRunner,
    tmdb: TmdbImporter,
    ost: OstClient,
    exports: ExportProjector,
    rips_dir: PathBuf,
    identify_workers: usize,
    settings: RwLock<CoordinatorSettings>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: CatalogStore,
        blobs: BlobStore,
        analysis: AnalysisRunner,
        tmdb: TmdbImporter,
        ost: OstClient,
        exports: ExportProjector,
        rips_dir: impl Into<PathBuf>,
        identify_workers: usize,
        autorip: bool,
        controllers: HashMap<String, Arc<dyn DriveControllerClient>>,
    ) -> Self {
        Self {
            store,
            blobs,
            analysis,
            tmdb,
            ost,
            exports,
            rips_dir: rips_dir.into(),
            identify_workers: identify_workers.max(1),
            settings: RwLock::new(CoordinatorSettings {
                autorip,
                controllers,
            }),
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn exports(&self) -> &ExportProjector {
        &self.exports
    }

    pub fn tmdb(&self) -> &TmdbImporter {
        &self.tmdb
    }

    pub async fn get_drive_controller(
        &self,
        name: &str,
    ) -> Option<Arc<dyn DriveControllerClient>> {
        self.settings.read().await.controllers.get(name).cloned()
    }

    pub async fn autorip(&self) -> bool {
        self.settings.read().await.autorip
    }

    pub async fn set_autorip(&self, enabled: bool) {
        self.settings.write().await.autorip = enabled;
    }

    /// Dispatches a rip against a controller's drive.
    ///
    /// Drive state is validated first so the caller gets a precise
    /// error; the window between that check and job creation is an
    /// accepted race (on loss the controller's own busy check answers).
    /// The job row and the controller RPC commit together.
    pub async fn rip_media(
        &self,
        controller_name: &str,
        drive_id: u32,
        suspected: Option<SuspectedContents>,
        autoeject: bool,
    ) -> Result<RipJob> {
        let settings = self.settings.read().await;
        let controller = settings
            .controllers
            .get(controller_name)
            .ok_or(CoreError::NotFound)?;

        let drive_state = controller
            .get_drive_state(drive_id)
            .await
            .map_err(|err| err.context("fetching drive state"))?;

        match drive_state.status {
            DriveStatus::Empty => return Err(CoreError::NoDisc),
            DriveStatus::TrayOpen => return Err(CoreError::TrayOpen),
            DriveStatus::NotReady => return Err(CoreError::NotReady),
            DriveStatus::DiscLoaded => {}
            DriveStatus::Unknown => {
                return Err(CoreError::ProtocolMismatch(format!(
                    "unrecognized status for drive {drive_id} on {controller_name}"
                )))
            }
        }
        if drive_state.active_rip_job {
            return Err(CoreError::Busy);
        }

        let mut session = self.store.begin().await?;
        let job = session
            .create_rip_job(
                chrono::Utc::now().timestamp(),
                drive_state.disc_name.as_deref(),
                suspected.as_ref(),
            )
            .await
            .map_err(|err| err.context("creating rip job"))?;

        controller
            .rip_media(job.id, drive_id, autoeject)
            .await
            .map_err(|err| err.context("starting rip job on controller"))?;

        session.commit().await?;
        Ok(job)
    }

    /// Imports a finished rip from the staging directory.
    ///
    /// Every `.mkv` under `<rips>/<job>` goes through the blob store's
    /// analysis pass. Per-file failures are logged and keep the staging
    /// directory around; the job is marked imported either way.
    pub async fn import_job(&self, job_id: i64) -> Result<()> {
        let mut session = self.store.begin().await?;
        session
            .mark_rip_job_finished(job_id)
            .await
            .map_err(|err| err.context("marking rip job finished"))?;

        let rip_dir = self.rips_dir.join(job_id.to_string());
        let mut clean = true;
        for entry in WalkDir::new(&rip_dir) {
            let entry = entry.map_err(|err| {
                CoreError::Io(err.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk error")
                }))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) != Some("mkv") {
                continue;
            }

            if let Err(err) = self
                .blobs
                .add_video(&mut session, &self.analysis, entry.path(), Some(job_id))
                .await
            {
                error!(
                    job_id,
                    file = %entry.path().display(),
                    %err,
                    "an error occurred while importing job"
                );
                clean = false;
            }
        }

        if clean {
            if let Err(err) = tokio::fs::remove_dir_all(&rip_dir).await {
                error!(job_id, directory = %rip_dir.display(), %err, "failed to remove rip directory");
            }
        }

        session
            .mark_rip_job_imported(job_id)
            .await
            .map_err(|err| err.context("marking rip job imported"))?;
        session.commit().await?;
        Ok(())
    }

    /// Returns the movie for a TMDB id, importing it first if absent.
    pub async fn autoimport_movie(&self, tmdb_id: i32) -> Result<Movie> {
        let mut session = self.store.begin().await?;
        let existing = session.get_movie_by_tmdb_id(tmdb_id).await?;
        session.rollback().await?;
        if let Some(movie) = existing {
            return Ok(movie);
        }
        self.tmdb.import_movie(tmdb_id, &self.blobs).await
    }

    /// Runs identification for a job per its suspected contents: a
    /// movie candidate auto-imports the movie; an episode list produces
    /// the match matrix; no hint is a no-op.
    pub async fn analyze_job(&self, job_id: i64) -> Result<()> {
        let mut session = self.store.begin().await?;
        let job = match session.get_rip_job(job_id).await {
            Ok(job) => job,
            Err(err) if err.is_not_found() => return Err(CoreError::NotFound),
            Err(err) => return Err(err.context("fetching rip job")),
        };

        let suspected = job.suspected()?;
        match suspected {
            None => Ok(()),
            Some(SuspectedContents::Movie { tmdb_id }) => {
                session.rollback().await?;
                self.autoimport_movie(tmdb_id)
                    .await
                    .map_err(|err| err.context("importing suspected movie"))?;
                Ok(())
            }
            Some(SuspectedContents::TvEpisodes { episode_tmdb_ids }) => {
                identify::compare_tv_subs(
                    &mut session,
                    &self.ost,
                    &self.blobs,
                    job_id,
                    &episode_tmdb_ids,
                    self.identify_workers,
                )
                .await
                .map_err(|err| err.context("analyzing tv rip"))?;
                session.commit().await?;
                Ok(())
            }
        }
    }

    /// Re-runs analysis on every video in the job. One transaction per
    /// video; failures are logged per video.
    pub async fn reprocess_rip_job(&self, job_id: i64, update_hash: bool) -> Result<()> {
        identify::reprocess_rip_job(&self.store, &self.blobs, &self.analysis, job_id, update_hash)
            .await
    }

    /// Deletes every untagged video blob in the job.
    pub async fn prune_rip_job(&self, job_id: i64) -> Result<()> {
        let mut session = self.store.begin().await?;
        identify::prune_rip_job(&mut session, &self.blobs, job_id).await?;
        session.commit().await?;
        Ok(())
    }

    /// Administrative removal of a job and all of its files.
    pub async fn delete_rip_job(&self, job_id: i64) -> Result<()> {
        let mut session = self.store.begin().await?;
        self.blobs.delete_rip_job(&mut session, job_id).await?;
        session.commit().await?;
        Ok(())
    }

    /// Tags a video and splices it into every compatible export.
    pub async fn tag_video(
        &self,
        video_id: i64,
        video_type: VideoType,
        match_id: Option<i64>,
    ) -> Result<()> {
        let mut session = self.store.begin().await?;
        session.tag_video_file(video_id, video_type, match_id).await?;
        session.commit().await?;

        self.exports.splice(video_type, video_id).await
    }

    /// Enumerates a controller's drives with their metadata and
    /// current state, for the operations UI.
    pub async fn list_drives(&self, controller_name: &str) -> Result<Vec<DriveSummary>> {
        let controller = self
            .get_drive_controller(controller_name)
            .await
            .ok_or(CoreError::NotFound)?;

        let count = controller.get_drive_count().await?;
        let mut drives = Vec::with_capacity(count as usize);
        for drive_id in 0..count {
            let meta = controller.get_drive_meta(drive_id).await?;
            let state = controller.get_drive_state(drive_id).await?;
            drives.push(DriveSummary {
                drive_id,
                meta,
                state,
            });
        }
        Ok(drives)
    }

    pub async fn eject(&self, controller_name: &str, drive_id: u32) -> Result<()> {
        let controller = self
            .get_drive_controller(controller_name)
            .await
            .ok_or(CoreError::NotFound)?;
        controller.eject(drive_id).await
    }

    pub async fn retract(&self, controller_name: &str, drive_id: u32) -> Result<()> {
        let controller = self
            .get_drive_controller(controller_name)
            .await
            .ok_or(CoreError::NotFound)?;
        controller.retract(drive_id).await
    }

    /// Inbound notification: a disc was inserted. With autorip enabled
    /// this dispatches a rip with autoeject and no suspected contents.
    pub async fn disc_inserted(&self, controller_id: &str, drive_id: u32, name: &str) -> Result<()> {
        debug!(controller_id, drive_id, disc_name = name, "disc inserted");
        if self.autorip().await {
            self.rip_media(controller_id, drive_id, None, true)
                .await
                .map_err(|err| {
                    error!(controller_id, drive_id, %err, "failed to dispatch autorip job");
                    err
                })?;
        }
        Ok(())
    }

    /// Inbound notification: a controller finished (or failed) a rip.
    /// Queries the terminal status, imports on success, and reaps the
    /// controller-side job either way.
    pub async fn rip_finished(self: &Arc<Self>, controller_id: &str, job_id: i64) -> Result<()> {
        debug!(controller_id, job_id, "rip finished");
        let Some(controller) = self.get_drive_controller(controller_id).await else {
            warn!(controller_id, job_id, "notification from unknown controller");
            return Ok(());
        };

        let job_info = controller
            .get_job_status(job_id)
            .await
            .map_err(|err| err.context("querying controller job status"))?;

        match job_info.status {
            RipStatus::Running => {
                warn!(job_id, "job was reported finished but is still running");
            }
            RipStatus::Error => {
                error!(
                    job_id,
                    logs = %job_info.logs.join("\n"),
                    "an error occurred while ripping job"
                );
            }
            RipStatus::Completed => {
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(err) = coordinator.import_job(job_id).await {
                        error!(job_id, %err, "an error occurred while importing job");
                    }
                });
            }
            RipStatus::Unknown => {
                warn!(job_id, "unrecognized job status from controller");
            }
        }

        if let Err(err) = controller.reap_job(job_id).await {
            error!(job_id, %err, "failed to reap job from controller");
        }
        Ok(())
    }
}
