//! lychee_api - ripeness inference service
//!
//! This daemon:
//! 1. Loads config (LYCHEE_CONFIG file + env overrides)
//! 2. Loads and warms the configured detector backend
//! 3. Serves image and stream inference until Ctrl-C
//!
//! A detector that fails to load does not stop the service; health reports
//! `degraded` and inference requests get 503.

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use lychee_ripe::{
    api::{ApiConfig, ApiServer},
    config::LycheeConfig,
    detect::build_registry,
    InferencePipeline,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = LycheeConfig::load()?;
    let registry = build_registry(&config.model)?;
    let detector = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;

    match detector.lock() {
        Ok(mut backend) => {
            let name = backend.name().to_string();
            match backend.load().and_then(|_| backend.warm_up()) {
                Ok(()) => log::info!("detector '{}' loaded", name),
                Err(err) => log::warn!("detector '{}' unavailable: {:#}", name, err),
            }
        }
        Err(_) => log::warn!("detector lock poisoned during startup"),
    }

    let pipeline = InferencePipeline::new(
        detector,
        config.model.model_version.clone(),
        config.schema_version.clone(),
    )
    .with_tracker_config(config.tracker);

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_upload_bytes: config.max_upload_bytes(),
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, Arc::new(pipeline)).spawn()?;
    log::info!("inference api listening on {}", api_handle.addr);
    log::info!(
        "lychee_api running. backend={} model_version={} schema_version={}",
        config.model.backend,
        config.model.model_version,
        config.schema_version
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("lychee_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
