//! JSON-over-HTTP client for remote drive controllers.
//!
//! The coordinator core only knows the [`DriveControllerClient`]
//! contract; this adapter maps it onto the controller's HTTP surface.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use ripstash_core::coordinator::{
    DriveControllerClient, DriveMeta, DriveState, DriveStatus, JobStatus, RipStatus,
};
use ripstash_core::{CoreError, Result};

pub struct HttpDriveController {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDriveController {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct DriveStateWire {
    status: String,
    #[serde(default)]
    disc_name: Option<String>,
    #[serde(default)]
    active_rip_job: bool,
}

#[derive(Deserialize)]
struct JobStatusWire {
    status: String,
    #[serde(default)]
    logs: Vec<String>,
}

#[async_trait]
impl DriveControllerClient for HttpDriveController {
    async fn get_drive_count(&self) -> Result<u32> {
        #[derive(Deserialize)]
        struct Count {
            count: u32,
        }
        let count: Count = self.get_json("/drives/count").await?;
        Ok(count.count)
    }

    async fn get_drive_meta(&self, drive_id: u32) -> Result<DriveMeta> {
        #[derive(Deserialize)]
        struct Meta {
            name: String,
        }
        let meta: Meta = self.get_json(&format!("/drives/{drive_id}/meta")).await?;
        Ok(DriveMeta { name: meta.name })
    }

    async fn get_drive_state(&self, drive_id: u32) -> Result<DriveState> {
        let wire: DriveStateWire = self.get_json(&format!("/drives/{drive_id}/state")).await?;
        let status = match wire.status.as_str() {
            "empty" => DriveStatus::Empty,
            "tray_open" => DriveStatus::TrayOpen,
            "not_ready" => DriveStatus::NotReady,
            "disc_loaded" => DriveStatus::DiscLoaded,
            _ => DriveStatus::Unknown,
        };
        Ok(DriveState {
            status,
            disc_name: wire.disc_name,
            active_rip_job: wire.active_rip_job,
        })
    }

    async fn rip_media(&self, job_id: i64, drive_id: u32, autoeject: bool) -> Result<()> {
        self.post_json(
            "/rip",
            json!({
                "job_id": job_id,
                "drive_id": drive_id,
                "autoeject": autoeject,
            }),
        )
        .await
    }

    async fn get_job_status(&self, job_id: i64) -> Result<JobStatus> {
        let wire: JobStatusWire = self.get_json(&format!("/jobs/{job_id}/status")).await?;
        let status = match wire.status.as_str() {
            "running" => RipStatus::Running,
            "error" => RipStatus::Error,
            "completed" => RipStatus::Completed,
            other => {
                return Err(CoreError::ProtocolMismatch(format!(
                    "unrecognized job status {other:?}"
                )))
            }
        };
        Ok(JobStatus {
            status,
            logs: wire.logs,
        })
    }

    async fn reap_job(&self, job_id: i64) -> Result<()> {
        self.post_json(&format!("/jobs/{job_id}/reap"), json!({})).await
    }

    async fn eject(&self, drive_id: u32) -> Result<()> {
        self.post_json(&format!("/drives/{drive_id}/eject"), json!({}))
            .await
    }

    async fn retract(&self, drive_id: u32) -> Result<()> {
        self.post_json(&format!("/drives/{drive_id}/retract"), json!({}))
            .await
    }
}
