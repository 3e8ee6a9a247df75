//! potholed - pothole telemetry collection server
//!
//! This daemon:
//! 1. Loads configuration (POTHOLE_CONFIG file + POTHOLE_* env overrides)
//! 2. Opens the detection event store
//! 3. Serves uploads, log snapshots, classified markers and proximity checks
//! 4. Stops cleanly on Ctrl-C
//!
//! The default address is loopback only, and loopback listeners refuse
//! remote peers. To take uploads from phones on the network, listen on all
//! interfaces:
//!
//! ```text
//! POTHOLE_API_ADDR=0.0.0.0:8000 potholed
//! ```

use anyhow::Result;
use std::sync::mpsc;

use pothole_telemetry::{
    api::{ApiConfig, ApiServer},
    config::PotholedConfig,
    EventLog, EventLogStore, SqliteEventLogStore,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PotholedConfig::load()?;
    let mut store = SqliteEventLogStore::open(&config.db_path)?;
    for event_log in EventLog::ALL {
        log::info!("{} log: {} entries", event_log, store.count(event_log)?);
    }

    let api_config = ApiConfig::from(&config);
    let api_handle = ApiServer::new(api_config, store).spawn()?;
    log::info!("collection api listening on {}", api_handle.addr);
    log::info!(
        "potholed running. db={} images={} parsing={:?}",
        config.db_path,
        config.image_dir.display(),
        config.parse_mode
    );
    log::info!(
        "severity thresholds: moderate > {}, severe > {}",
        config.severity.moderate_above,
        config.severity.severe_above
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("potholed waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping collection api...");
    api_handle.stop()?;
    log::info!("potholed stopped");
    Ok(())
}
