//! Rip-dispatch gating and the notification flow, driven through a
//! scripted in-memory drive controller.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{analyzer_returning, TestEnv, BASIC_ANALYSIS_JSON};
use ripstash_core::coordinator::{
    DriveControllerClient, DriveMeta, DriveState, DriveStatus, JobStatus, RipStatus,
};
use ripstash_core::{CoreError, Result};

#[derive(Clone)]
struct RipCall {
    job_id: i64,
    drive_id: u32,
    autoeject: bool,
}

struct ScriptedController {
    status: Mutex<DriveStatus>,
    disc_name: Option<String>,
    active_rip_job: bool,
    fail_rip: bool,
    rip_calls: Mutex<Vec<RipCall>>,
    job_status: Mutex<Option<JobStatus>>,
    reaped: AtomicUsize,
}

impl ScriptedController {
    fn new(status: DriveStatus) -> Self {
        Self {
            status: Mutex::new(status),
            disc_name: Some("TEST_DISC".to_string()),
            active_rip_job: false,
            fail_rip: false,
            rip_calls: Mutex::new(Vec::new()),
            job_status: Mutex::new(None),
            reaped: AtomicUsize::new(0),
        }
    }

    fn rip_calls(&self) -> Vec<RipCall> {
        self.rip_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriveControllerClient for ScriptedController {
    async fn get_drive_count(&self) -> Result<u32> {
        Ok(1)
    }

    async fn get_drive_meta(&self, _drive_id: u32) -> Result<DriveMeta> {
        Ok(DriveMeta {
            name: "sr0".to_string(),
        })
    }

    async fn get_drive_state(&self, _drive_id: u32) -> Result<DriveState> {
        Ok(DriveState {
            status: *self.status.lock().unwrap(),
            disc_name: self.disc_name.clone(),
            active_rip_job: self.active_rip_job,
        })
    }

    async fn rip_media(&self, job_id: i64, drive_id: u32, autoeject: bool) -> Result<()> {
        if self.fail_rip {
            return Err(CoreError::Busy);
        }
        self.rip_calls.lock().unwrap().push(RipCall {
            job_id,
            drive_id,
            autoeject,
        });
        Ok(())
    }

    async fn get_job_status(&self, _job_id: i64) -> Result<JobStatus> {
        self.job_status
            .lock()
            .unwrap()
            .clone()
            .ok_or(CoreError::NotFound)
    }

    async fn reap_job(&self, _job_id: i64) -> Result<()> {
        self.reaped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn eject(&self, _drive_id: u32) -> Result<()> {
        Ok(())
    }

    async fn retract(&self, _drive_id: u32) -> Result<()> {
        Ok(())
    }
}

fn controllers(
    controller: &Arc<ScriptedController>,
) -> HashMap<String, Arc<dyn DriveControllerClient>> {
    HashMap::from([(
        "garage".to_string(),
        Arc::clone(controller) as Arc<dyn DriveControllerClient>,
    )])
}

async fn assert_no_rip_jobs(env: &TestEnv) {
    let mut session = env.store.begin().await.unwrap();
    assert!(session.get_rip_job(1).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn tray_open_is_rejected_without_a_job_row() {
    let env = TestEnv::new().await;
    let controller = Arc::new(ScriptedController::new(DriveStatus::TrayOpen));
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    let err = coordinator
        .rip_media("garage", 0, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TrayOpen));
    assert!(controller.rip_calls().is_empty());
    assert_no_rip_jobs(&env).await;
}

#[tokio::test]
async fn every_drive_state_maps_to_its_error() {
    let env = TestEnv::new().await;
    let controller = Arc::new(ScriptedController::new(DriveStatus::Empty));
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    let err = coordinator.rip_media("garage", 0, None, false).await.unwrap_err();
    assert!(matches!(err, CoreError::NoDisc));

    *controller.status.lock().unwrap() = DriveStatus::NotReady;
    let err = coordinator.rip_media("garage", 0, None, false).await.unwrap_err();
    assert!(matches!(err, CoreError::NotReady));

    *controller.status.lock().unwrap() = DriveStatus::Unknown;
    let err = coordinator.rip_media("garage", 0, None, false).await.unwrap_err();
    assert!(matches!(err, CoreError::ProtocolMismatch(_)));

    assert_no_rip_jobs(&env).await;
}

#[tokio::test]
async fn a_busy_drive_is_rejected() {
    let env = TestEnv::new().await;
    let mut scripted = ScriptedController::new(DriveStatus::DiscLoaded);
    scripted.active_rip_job = true;
    let controller = Arc::new(scripted);
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    let err = coordinator.rip_media("garage", 0, None, false).await.unwrap_err();
    assert!(matches!(err, CoreError::Busy));
    assert_no_rip_jobs(&env).await;
}

#[tokio::test]
async fn an_unknown_controller_is_not_found() {
    let env = TestEnv::new().await;
    let coordinator = env.coordinator(
        "unused-analyzer",
        HashMap::new(),
        false,
        None,
        HashMap::new(),
    );

    let err = coordinator.rip_media("attic", 0, None, false).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn controller_rejection_rolls_the_job_row_back() {
    let env = TestEnv::new().await;
    let mut scripted = ScriptedController::new(DriveStatus::DiscLoaded);
    scripted.fail_rip = true;
    let controller = Arc::new(scripted);
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    let err = coordinator.rip_media("garage", 0, None, false).await.unwrap_err();
    assert!(matches!(err, CoreError::Context { .. }));
    assert_no_rip_jobs(&env).await;
}

#[tokio::test]
async fn a_loaded_drive_dispatches_and_records_the_disc_title() {
    let env = TestEnv::new().await;
    let controller = Arc::new(ScriptedController::new(DriveStatus::DiscLoaded));
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    let job = coordinator
        .rip_media("garage", 2, None, false)
        .await
        .unwrap();

    let calls = controller.rip_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].job_id, job.id);
    assert_eq!(calls[0].drive_id, 2);
    assert!(!calls[0].autoeject);

    let mut session = env.store.begin().await.unwrap();
    let stored = session.get_rip_job(job.id).await.unwrap();
    assert_eq!(stored.disc_title.as_deref(), Some("TEST_DISC"));
    assert!(!stored.rip_finished);
}

#[tokio::test]
async fn autorip_dispatches_on_disc_insertion_with_autoeject() {
    let env = TestEnv::new().await;
    let controller = Arc::new(ScriptedController::new(DriveStatus::DiscLoaded));
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        true,
        None,
        HashMap::new(),
    );

    coordinator
        .disc_inserted("garage", 0, "TEST_DISC")
        .await
        .unwrap();

    let calls = controller.rip_calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].autoeject);

    let mut session = env.store.begin().await.unwrap();
    let job = session.get_rip_job(calls[0].job_id).await.unwrap();
    assert!(job.suspected().unwrap().is_none());
}

#[tokio::test]
async fn disc_insertion_is_inert_with_autorip_off() {
    let env = TestEnv::new().await;
    let controller = Arc::new(ScriptedController::new(DriveStatus::DiscLoaded));
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    coordinator
        .disc_inserted("garage", 0, "TEST_DISC")
        .await
        .unwrap();
    assert!(controller.rip_calls().is_empty());
    assert_no_rip_jobs(&env).await;
}

#[tokio::test]
async fn autorip_toggle_is_visible_to_later_insertions() {
    let env = TestEnv::new().await;
    let controller = Arc::new(ScriptedController::new(DriveStatus::DiscLoaded));
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    coordinator.set_autorip(true).await;
    assert!(coordinator.autorip().await);
    coordinator
        .disc_inserted("garage", 0, "TEST_DISC")
        .await
        .unwrap();
    assert_eq!(controller.rip_calls().len(), 1);
}

#[tokio::test]
async fn completed_rip_notification_imports_and_reaps() {
    let env = TestEnv::new().await;
    let analyzer = analyzer_returning(env.tempdir.path(), BASIC_ANALYSIS_JSON);
    let controller = Arc::new(ScriptedController::new(DriveStatus::DiscLoaded));
    let coordinator = env.coordinator(
        &analyzer,
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    let job = coordinator.rip_media("garage", 0, None, false).await.unwrap();
    let job_dir = env.rips_dir().join(job.id.to_string());
    std::fs::create_dir_all(&job_dir).unwrap();
    std::fs::write(job_dir.join("title.mkv"), b"ripped bytes").unwrap();

    *controller.job_status.lock().unwrap() = Some(JobStatus {
        status: RipStatus::Completed,
        logs: Vec::new(),
    });
    coordinator.rip_finished("garage", job.id).await.unwrap();

    // The import runs on a background task.
    for _ in 0..100 {
        let mut session = env.store.begin().await.unwrap();
        if session.get_rip_job(job.id).await.unwrap().imported {
            break;
        }
        drop(session);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let mut session = env.store.begin().await.unwrap();
    let stored = session.get_rip_job(job.id).await.unwrap();
    assert!(stored.rip_finished);
    assert!(stored.imported);
    assert_eq!(session.get_videos_from_rip(job.id).await.unwrap().len(), 1);
    assert_eq!(controller.reaped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn errored_rips_are_reaped_without_importing() {
    let env = TestEnv::new().await;
    let controller = Arc::new(ScriptedController::new(DriveStatus::DiscLoaded));
    let coordinator = env.coordinator(
        "unused-analyzer",
        controllers(&controller),
        false,
        None,
        HashMap::new(),
    );

    let job = coordinator.rip_media("garage", 0, None, false).await.unwrap();
    *controller.job_status.lock().unwrap() = Some(JobStatus {
        status: RipStatus::Error,
        logs: vec!["laser misaligned".to_string()],
    });
    coordinator.rip_finished("garage", job.id).await.unwrap();

    let mut session = env.store.begin().await.unwrap();
    let stored = session.get_rip_job(job.id).await.unwrap();
    assert!(!stored.rip_finished);
    assert!(!stored.imported);
    assert_eq!(controller.reaped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn notifications_from_unknown_controllers_are_ignored() {
    let env = TestEnv::new().await;
    let coordinator = env.coordinator(
        "unused-analyzer",
        HashMap::new(),
        false,
        None,
        HashMap::new(),
    );
    coordinator.rip_finished("attic", 99).await.unwrap();
}
