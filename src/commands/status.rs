// ABOUTME: Status command
// ABOUTME: Shows discovered tables with their freshness, without contacting plants

use anyhow::Result;

use super::Settings;
use crate::audit::SyncLog;
use crate::orchestrator::Reconciler;
use crate::utils::format_db_timestamp;

pub async fn status(settings: Settings) -> Result<()> {
    let central = settings.connect_central().await?;
    let remote = settings.remote_source()?;
    let columns = settings.file.columns();
    let log = SyncLog::new(&settings.engine.log_file);
    let reconciler = Reconciler::new(&central, &remote, &settings.engine, &columns, &log);

    let result = reconciler
        .status_at(chrono::Local::now().naive_local())
        .await;
    central.disconnect().await;
    let statuses = result?;

    println!(
        "{:<20} {:<20} {:<20} {:>8}  STATE",
        "TABLE", "LATEST", "SYNC CHECK", "LAG MIN"
    );
    for status in &statuses {
        let (latest, sync_check, lag) = match &status.snapshot {
            Some(s) => (
                format_db_timestamp(&s.latest_measurement),
                s.latest_sync_check
                    .as_ref()
                    .map(format_db_timestamp)
                    .unwrap_or_else(|| "-".to_string()),
                s.lag_minutes.to_string(),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        let state = match (&status.error, &status.snapshot) {
            (Some(e), _) => e.as_str(),
            (None, None) => "empty",
            (None, Some(_)) if status.stale => "STALE",
            (None, Some(_)) => "ok",
        };
        println!(
            "{:<20} {:<20} {:<20} {:>8}  {}",
            status.table, latest, sync_check, lag, state
        );
    }

    let stale = statuses.iter().filter(|s| s.stale).count();
    println!();
    println!(
        "{} tables, {} stale (threshold {} min)",
        statuses.len(),
        stale,
        settings.engine.threshold_minutes
    );
    Ok(())
}
