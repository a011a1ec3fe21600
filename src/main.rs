use std::path::Path;
use std::process;

use tracing::{error, info};

use filedepot::{store, Config, FileService, Staging, WebServer};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Load configuration; only a missing file falls back to defaults
    let config = match Config::load_or_default(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            process::exit(1);
        }
    };

    // Initialize logging
    if let Err(e) = filedepot::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        filedepot::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("{}", e);
        process::exit(1);
    }

    info!("filedepot starting");
    if !Path::new(CONFIG_PATH).exists() {
        info!("{} not found, using default configuration", CONFIG_PATH);
    }

    let store = match store::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to connect to store: {}", e);
            process::exit(1);
        }
    };

    let staging = match Staging::new(&config.staging.input_path, &config.staging.output_path) {
        Ok(staging) => staging,
        Err(e) => {
            error!("Failed to prepare staging directories: {}", e);
            process::exit(1);
        }
    };

    let files = FileService::new(store, staging, config.files.max_upload_size_bytes());

    // Startup sweep for anything a previous crash left behind
    if config.reconcile.enabled {
        let grace = config.reconcile.pending_grace();
        if let Err(e) = files.reconcile(grace).await {
            error!("Startup reconcile failed: {}", e);
        }
    }

    let server = match WebServer::new(&config.server, files, &config.reconcile) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    if let Err(e) = server.run().await {
        error!("Web server error: {}", e);
        process::exit(1);
    }
}
