//! Auto-sync after write commands.
//!
//! When `sync.auto_sync` is enabled, a successful create, update, delete or
//! retry is followed by one replay cycle and one outbox drain. Failures only
//! warn: the write is already safe in the local queue.

use crate::app::App;
use crate::config::Config;

pub async fn try_auto_sync(app: &App, config: &Config) {
    if !config.sync.auto_sync || !config.backend.is_configured() {
        return;
    }

    for result in [app.journal.sync_now().await, app.animals.sync_now().await] {
        match result {
            Ok(report) if report.halted => {
                eprintln!("Auto-sync: backend rejected the API key, skipping");
                return;
            }
            Ok(report) => {
                tracing::debug!(synced = report.synced, failed = report.failed, "auto-sync");
            }
            Err(e) => {
                eprintln!("Auto-sync: {}", e);
                return;
            }
        }
    }

    if let Some(worker) = &app.enrichment {
        match worker.drain().await {
            Ok(report) if report.halted => {
                eprintln!("Auto-sync: backend rejected the API key, enrichment stays queued");
            }
            Ok(_) => {}
            Err(e) => eprintln!("Auto-sync: {}", e),
        }
    }
}
