use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

use ripstash_core::catalog::{SuspectedContents, VideoType};
use ripstash_core::{Coordinator, CoreError};

pub type AppState = Arc<Coordinator>;

pub fn create_router(coordinator: AppState) -> Router {
    Router::new()
        .route("/notify/disc-inserted", post(disc_inserted))
        .route("/notify/rip-finished", post(rip_finished))
        .route("/rips", post(dispatch_rip).get(list_untagged_rips))
        .route("/rips/:id/import", post(import_rip))
        .route("/rips/:id/analyze", post(analyze_rip))
        .route("/rips/:id/reprocess", post(reprocess_rip))
        .route("/rips/:id/prune", post(prune_rip))
        .route("/rips/:id/rename", post(rename_rip))
        .route("/rips/:id/suspicion", post(set_rip_suspicion))
        .route("/rips/:id/untagged", get(untagged_videos))
        .route("/rips/:id/matches", get(rip_matches))
        .route("/rips/:id/ost-subtitles", get(rip_ost_subtitles))
        .route("/rips/:id", delete(delete_rip))
        .route("/videos/:id/tag", post(tag_video))
        .route("/exports/:name/rebuild", post(rebuild_export))
        .route("/controllers/:name/drives", get(list_drives))
        .route("/controllers/:name/drives/:drive_id/eject", post(eject_drive))
        .route("/controllers/:name/drives/:drive_id/retract", post(retract_drive))
        .route("/autorip", get(get_autorip).put(set_autorip))
        .route("/catalog/movies/:tmdb_id/import", post(import_movie))
        .route("/catalog/tv/:tmdb_id/import", post(import_tv))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

/// Maps the core's error vocabulary onto HTTP statuses.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            match &self.0 {
                CoreError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::Busy | CoreError::NoDisc | CoreError::TrayOpen => StatusCode::CONFLICT,
                CoreError::ProtocolMismatch(_) => StatusCode::BAD_GATEWAY,
                CoreError::BlobMissing(_) => StatusCode::NOT_FOUND,
                CoreError::NoSubtitles | CoreError::UnreliableSubtitles => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct DiscInsertedRequest {
    controller_id: String,
    drive_id: u32,
    #[serde(default)]
    name: String,
}

async fn disc_inserted(
    State(coordinator): State<AppState>,
    Json(request): Json<DiscInsertedRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator
        .disc_inserted(&request.controller_id, request.drive_id, &request.name)
        .await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct RipFinishedRequest {
    controller_id: String,
    job_id: i64,
}

async fn rip_finished(
    State(coordinator): State<AppState>,
    Json(request): Json<RipFinishedRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator
        .rip_finished(&request.controller_id, request.job_id)
        .await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct DispatchRipRequest {
    controller: String,
    drive_id: u32,
    #[serde(default)]
    suspected_contents: Option<SuspectedContents>,
    #[serde(default)]
    autoeject: bool,
}

async fn dispatch_rip(
    State(coordinator): State<AppState>,
    Json(request): Json<DispatchRipRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = coordinator
        .rip_media(
            &request.controller,
            request.drive_id,
            request.suspected_contents,
            request.autoeject,
        )
        .await?;
    Ok(Json(json!({ "job_id": job.id, "start_time": job.start_time })))
}

#[derive(Deserialize)]
struct ListUntaggedQuery {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_untagged_rips(
    State(coordinator): State<AppState>,
    Query(query): Query<ListUntaggedQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = coordinator.store().begin().await?;
    let jobs = session
        .rip_jobs_with_untagged_videos(query.skip, query.limit)
        .await?;
    session.rollback().await?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn untagged_videos(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = coordinator.store().begin().await?;
    let videos = session.untagged_videos_in_job(job_id).await?;
    session.rollback().await?;
    Ok(Json(json!({ "videos": videos })))
}

async fn rip_matches(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = coordinator.store().begin().await?;
    let matches = session.get_matches_from_rip(job_id).await?;
    let disc_subs = session.disc_subs_from_rip(job_id).await?;
    session.rollback().await?;
    Ok(Json(json!({ "matches": matches, "disc_subtitles": disc_subs })))
}

async fn rip_ost_subtitles(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = coordinator.store().begin().await?;
    let downloads = session.get_ost_subtitles_from_rip(job_id).await?;
    session.rollback().await?;
    Ok(Json(json!({ "subtitles": downloads })))
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

async fn rename_rip(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = coordinator.store().begin().await?;
    session.rename_rip_job(job_id, &request.title).await?;
    session.commit().await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct SuspicionRequest {
    #[serde(default)]
    suspected_contents: Option<SuspectedContents>,
}

async fn set_rip_suspicion(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
    Json(request): Json<SuspicionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = coordinator.store().begin().await?;
    session
        .set_rip_suspicion(job_id, request.suspected_contents.as_ref())
        .await?;
    session.commit().await?;
    Ok(Json(json!({})))
}

async fn import_rip(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator.import_job(job_id).await?;
    Ok(Json(json!({})))
}

async fn analyze_rip(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator.analyze_job(job_id).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize, Default)]
struct ReprocessRequest {
    #[serde(default)]
    update_hash: bool,
}

async fn reprocess_rip(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
    request: Option<Json<ReprocessRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let update_hash = request.map(|Json(r)| r.update_hash).unwrap_or(false);
    coordinator.reprocess_rip_job(job_id, update_hash).await?;
    Ok(Json(json!({})))
}

async fn prune_rip(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator.prune_rip_job(job_id).await?;
    Ok(Json(json!({})))
}

async fn delete_rip(
    State(coordinator): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator.delete_rip_job(job_id).await?;
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
struct TagRequest {
    video_type: VideoType,
    #[serde(default)]
    match_id: Option<i64>,
}

async fn tag_video(
    State(coordinator): State<AppState>,
    Path(video_id): Path<i64>,
    Json(request): Json<TagRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator
        .tag_video(video_id, request.video_type, request.match_id)
        .await?;
    Ok(Json(json!({})))
}

async fn rebuild_export(
    State(coordinator): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator.exports().rebuild(&name).await?;
    Ok(Json(json!({})))
}

async fn list_drives(
    State(coordinator): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let drives = coordinator.list_drives(&name).await?;
    let drives: Vec<_> = drives
        .into_iter()
        .map(|drive| {
            json!({
                "drive_id": drive.drive_id,
                "name": drive.meta.name,
                "status": format!("{:?}", drive.state.status),
                "disc_name": drive.state.disc_name,
                "active_rip_job": drive.state.active_rip_job,
            })
        })
        .collect();
    Ok(Json(json!({ "drives": drives })))
}

async fn eject_drive(
    State(coordinator): State<AppState>,
    Path((name, drive_id)): Path<(String, u32)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator.eject(&name, drive_id).await?;
    Ok(Json(json!({})))
}

async fn retract_drive(
    State(coordinator): State<AppState>,
    Path((name, drive_id)): Path<(String, u32)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    coordinator.retract(&name, drive_id).await?;
    Ok(Json(json!({})))
}

async fn get_autorip(State(coordinator): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "enabled": coordinator.autorip().await }))
}

#[derive(Deserialize)]
struct AutoripRequest {
    enabled: bool,
}

async fn set_autorip(
    State(coordinator): State<AppState>,
    Json(request): Json<AutoripRequest>,
) -> Json<serde_json::Value> {
    coordinator.set_autorip(request.enabled).await;
    Json(json!({ "enabled": request.enabled }))
}

async fn import_movie(
    State(coordinator): State<AppState>,
    Path(tmdb_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let movie = coordinator
        .tmdb()
        .import_movie(tmdb_id, coordinator.blobs())
        .await?;
    Ok(Json(json!({ "id": movie.id, "title": movie.title })))
}

async fn import_tv(
    State(coordinator): State<AppState>,
    Path(tmdb_id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let show = coordinator
        .tmdb()
        .import_tv(tmdb_id, coordinator.blobs())
        .await?;
    Ok(Json(json!({ "id": show.id, "title": show.title })))
}
