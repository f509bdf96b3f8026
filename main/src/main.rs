//! Process entry point (§5, §9): one HTTP server binary, unlike the
//! teacher's server/worker split — background work here runs as
//! `tokio::spawn` tasks inside the same process rather than a separate
//! worker binary pulling a job queue (see DESIGN.md's C14/main
//! resolution). The model/codec capabilities are optional collaborators
//! (§1) with no concrete backend in this workspace, so they are wired in
//! as `None`; routes that need one fail with `CapabilityUnavailable`
//! (503) until a deployment supplies a plugin-loaded implementation.

use std::path::Path;
use std::sync::Arc;

use common::storage::db::Database;
use common::storage::store::StorageManager;
use common::utils::config::get_config;
use plugins::PluginRegistry;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Database::open(&config.db_path).await?;
    let storage = StorageManager::new(&config).await?;

    let mut registry = PluginRegistry::new();
    if let Some(dir) = config.plugin_dir.as_deref() {
        match registry.load_dir(Path::new(dir)) {
            Ok(count) => info!(plugin_dir = dir, count, "loaded plugins"),
            Err(err) => warn!(plugin_dir = dir, %err, "failed to load plugin directory"),
        }
    }
    let plugins = Arc::new(registry);

    let state = api::ApiState::new(db, storage, config.clone(), plugins, None, None, None);
    let app = api::api_routes(state);

    let serve_address = format!("{}:{}", config.host, config.port);
    info!(address = %serve_address, "starting server");
    let listener = tokio::net::TcpListener::bind(&serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
