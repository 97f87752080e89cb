//! Selkies viewer core - entry point.

use clap::Parser;
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

use selkies_viewer_core::args::Args;
use selkies_viewer_core::orchestrator::SessionOrchestrator;
use selkies_viewer_core::persist::FileStore;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&format!(
            "selkies_viewer_core={},webrtc=warn,webrtc_ice=warn",
            log_level
        ))
        .init();

    info!("selkies-viewer-core v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match args.load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            error!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(run(config, args.upload.clone()));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Fatal error: {}", e);
            error!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: selkies_viewer_core::ClientConfig,
    upload_roots: Vec<std::path::PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::new(config.persist.store_dir.clone())?);

    let mut orchestrator = SessionOrchestrator::new(config, store)?;
    orchestrator.initialize().await?;

    for root in upload_roots {
        orchestrator.queue_upload(root);
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    orchestrator.cleanup().await;
    Ok(())
}
