mod ai;
mod app;
mod config;
mod db;
mod domain;
mod infrastructure;
mod moderation;
mod tasks;
mod telegram;

use anyhow::Result;
use infrastructure::{directories, instance_guard, logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config, &paths)?;

    let _guard = if instance_guard::skip_guard() {
        tracing::warn!(target: "lifecycle", "SKIP_PROCESS_GUARD set; running without instance lock");
        None
    } else {
        Some(instance_guard::InstanceGuard::acquire(&paths)?)
    };

    let shutdown = shutdown::Shutdown::new();
    shutdown::install_signal_handlers(shutdown.clone());

    let app = app::ModerationApp::initialize(config, paths, shutdown.clone()).await?;
    app.run().await
}
