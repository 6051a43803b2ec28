use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ripstash_core::analysis::AnalysisRunner;
use ripstash_core::coordinator::DriveControllerClient;
use ripstash_core::providers::{OstClient, TmdbImporter};
use ripstash_core::{BlobStore, CatalogStore, Config, Coordinator, ExportProjector};

mod controllers;
mod routes;

use controllers::HttpDriveController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripstash_server=debug,ripstash_core=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load configuration")?;
    config
        .ensure_directories()
        .context("failed to create data directories")?;

    let store = CatalogStore::open(&config.database_path())
        .await
        .context("failed to open catalog database")?;
    let blobs = BlobStore::new(config.blobs_dir()).context("failed to set up blob storage")?;
    let analysis = AnalysisRunner::new(&config.analysis_cli);
    let tmdb = TmdbImporter::new(store.clone(), config.tmdb_api_key.clone());
    let ost = OstClient::new(
        config.ost_login.api_key.clone(),
        config.ost_login.username.clone(),
        config.ost_login.password.clone(),
    );
    let exports = ExportProjector::new(
        store.clone(),
        blobs.clone(),
        config.exports_dir(),
        config.exports_dirs.clone(),
    )
    .context("failed to set up exports manager")?;

    let mut drive_controllers: HashMap<String, Arc<dyn DriveControllerClient>> = HashMap::new();
    for (name, url) in &config.drive_controllers {
        info!(controller = %name, url = %url, "registering drive controller");
        drive_controllers.insert(name.clone(), Arc::new(HttpDriveController::new(url.clone())));
    }

    let coordinator = Arc::new(Coordinator::new(
        store,
        blobs,
        analysis,
        tmdb,
        ost,
        exports,
        config.rips_dir(),
        config.identify_workers(),
        config.enable_autorip,
        drive_controllers,
    ));

    let app = routes::create_router(coordinator);

    info!(address = %config.web_serve_address, "starting ripstash coordinator");
    let listener = tokio::net::TcpListener::bind(&config.web_serve_address)
        .await
        .with_context(|| format!("failed to bind {}", config.web_serve_address))?;
    axum::serve(listener, app).await?;

    Ok(())
}
