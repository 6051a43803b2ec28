//! In-process stand-in for the subtitle provider, faithful to the
//! parts of the protocol the client exercises: bearer login, token
//! expiry, search, and two-step downloads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

#[derive(Clone)]
pub struct FakeSubtitle {
    pub file_id: u32,
    pub file_name: String,
    pub rank: String,
    pub download_count: u32,
    pub new_download_count: u32,
}

#[derive(Default)]
pub struct OstServerState {
    pub login_count: AtomicUsize,
    pub search_count: AtomicUsize,
    base_url: Mutex<String>,
    valid_token: Mutex<Option<String>>,
    /// When set, the first authenticated request invalidates the
    /// current token and returns 401, simulating expiry.
    expire_next: AtomicBool,
    subtitles: Mutex<HashMap<i32, Vec<FakeSubtitle>>>,
    downloads: Mutex<HashMap<u32, String>>,
}

impl OstServerState {
    pub fn expire_current_token(&self) {
        self.expire_next.store(true, Ordering::SeqCst);
    }

    pub fn add_subtitle(&self, tmdb_id: i32, subtitle: FakeSubtitle, text: &str) {
        self.downloads
            .lock()
            .unwrap()
            .insert(subtitle.file_id, text.to_string());
        self.subtitles
            .lock()
            .unwrap()
            .entry(tmdb_id)
            .or_default()
            .push(subtitle);
    }

    fn check_auth(&self, headers: &HeaderMap) -> Result<(), Response> {
        if self.expire_next.swap(false, Ordering::SeqCst) {
            *self.valid_token.lock().unwrap() = None;
            return Err(StatusCode::UNAUTHORIZED.into_response());
        }
        let presented = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let valid = self.valid_token.lock().unwrap();
        match valid.as_deref() {
            Some(token) if presented == format!("Bearer {token}") => Ok(()),
            _ => Err(StatusCode::UNAUTHORIZED.into_response()),
        }
    }
}

pub struct FakeOst {
    pub base_url: String,
    pub state: Arc<OstServerState>,
}

/// Binds the fake provider on an ephemeral port and serves it in the
/// background for the lifetime of the test process.
pub async fn spawn() -> FakeOst {
    let state = Arc::new(OstServerState::default());
    let router = Router::new()
        .route("/login", post(login))
        .route("/subtitles", get(search))
        .route("/download", post(download))
        .route("/files/:file_id", get(fetch_file))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    *state.base_url.lock().unwrap() = format!("http://{address}");
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    FakeOst {
        base_url: format!("http://{address}"),
        state,
    }
}

async fn login(State(state): State<Arc<OstServerState>>) -> Json<serde_json::Value> {
    let count = state.login_count.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("tok{count}");
    *state.valid_token.lock().unwrap() = Some(token.clone());
    Json(json!({ "token": token }))
}

async fn search(
    State(state): State<Arc<OstServerState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = state.check_auth(&headers) {
        return denied;
    }
    state.search_count.fetch_add(1, Ordering::SeqCst);

    let tmdb_id: i32 = params
        .get("tmdb_id")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    let subtitles = state.subtitles.lock().unwrap();
    let data: Vec<_> = subtitles
        .get(&tmdb_id)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| {
                    json!({
                        "attributes": {
                            "language": "en",
                            "download_count": entry.download_count,
                            "new_download_count": entry.new_download_count,
                            "uploader": { "name": "uploader", "rank": entry.rank },
                            "files": [
                                { "file_id": entry.file_id, "file_name": entry.file_name }
                            ]
                        }
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Json(json!({ "data": data })).into_response()
}

async fn download(
    State(state): State<Arc<OstServerState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let Err(denied) = state.check_auth(&headers) {
        return denied;
    }
    let file_id = body["file_id"].as_u64().unwrap_or_default();
    let base_url = state.base_url.lock().unwrap().clone();
    Json(json!({ "link": format!("{base_url}/files/{file_id}") })).into_response()
}

async fn fetch_file(
    State(state): State<Arc<OstServerState>>,
    Path(file_id): Path<u32>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = state.check_auth(&headers) {
        return denied;
    }
    let downloads = state.downloads.lock().unwrap();
    match downloads.get(&file_id) {
        Some(text) => text.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
