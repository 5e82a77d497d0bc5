// ABOUTME: Reconcile command
// ABOUTME: Runs one pass, or passes on an interval until Ctrl+C

use anyhow::Result;
use std::time::Duration;

use super::Settings;
use crate::audit::SyncLog;
use crate::orchestrator::{PassSummary, Reconciler};

pub async fn reconcile(settings: Settings, interval: Option<u64>) -> Result<()> {
    let central = settings.connect_central().await?;
    let remote = settings.remote_source()?;
    let columns = settings.file.columns();
    let log = SyncLog::new(&settings.engine.log_file);
    let reconciler = Reconciler::new(&central, &remote, &settings.engine, &columns, &log);

    let result = match interval {
        None => reconciler.run_pass().await.map(|summary| print_summary(&summary)),
        Some(secs) => {
            tracing::info!("Starting continuous reconciliation every {}s", secs);
            tracing::info!("Press Ctrl+C to stop");

            let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
            let shutdown_tx_clone = shutdown_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx_clone.send(());
            });

            reconciler
                .run(Duration::from_secs(secs.max(1)), shutdown_rx)
                .await
        }
    };

    central.disconnect().await;
    Ok(result?)
}

fn print_summary(summary: &PassSummary) {
    println!();
    println!("Reconciliation pass complete");
    println!("  Tables discovered: {}", summary.tables_discovered);
    println!("  Stale candidates:  {}", summary.stale_tables);
    println!(
        "  Purged:            {} ({} rows)",
        summary.purged, summary.rows_deleted
    );
    if summary.would_purge > 0 {
        println!("  Would purge:       {}", summary.would_purge);
    }
    println!("  Skipped:           {}", summary.skipped);
    println!("  Flagged:           {}", summary.flagged);
    if summary.unroutable > 0 {
        println!("  Unroutable:        {}", summary.unroutable);
    }
    if summary.probe_failures > 0 {
        println!("  Probe failures:    {}", summary.probe_failures);
    }
    println!("  Duration:          {}ms", summary.duration_ms);
}
