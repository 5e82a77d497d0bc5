// ABOUTME: Check-connections command
// ABOUTME: Pings every declared plant and prints a reachability table

use anyhow::{bail, Result};

use super::Settings;
use crate::audit::{AuditTrail, SyncLog};
use crate::supervisor::verify_plant_connections;

pub async fn check_connections(settings: Settings) -> Result<()> {
    let central = settings.connect_central().await?;
    let remote = settings.remote_source()?;
    let log = SyncLog::new(&settings.engine.log_file);
    let trail = AuditTrail::new(&central, &log);

    let plants: Vec<u32> = remote.plants().declared_plants().collect();
    if plants.is_empty() {
        tracing::warn!("No plants declared; set HOST_<id> variables or [plants] in the config file");
    }

    let result = verify_plant_connections(
        &remote,
        &trail,
        plants,
        settings.engine.concurrency,
        chrono::Local::now().naive_local(),
    )
    .await;
    central.disconnect().await;
    let statuses = result?;

    println!("{:<10} {:<24} STATUS", "PLANT", "HOST");
    for status in &statuses {
        println!(
            "{:<10} {:<24} {}",
            status.plant_key,
            status.host.as_deref().unwrap_or("-"),
            status.error.as_deref().unwrap_or("ok")
        );
    }

    let failed = statuses.iter().filter(|s| !s.is_ok()).count();
    if failed > 0 {
        bail!("{} of {} plants are unreachable", failed, statuses.len());
    }
    Ok(())
}
