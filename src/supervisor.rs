// ABOUTME: Connection supervisor for the configured plants
// ABOUTME: Pings every plant and records each one that cannot be reached

use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};

use crate::audit::AuditTrail;
use crate::error::Result;
use crate::remote::RemoteSource;
use crate::store::CentralStore;
use crate::utils::plant_key;

/// Reachability of one plant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlantConnectionStatus {
    pub plant: u32,
    pub plant_key: String,
    pub host: Option<String>,
    pub error: Option<String>,
}

impl PlantConnectionStatus {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Ping each plant in `plants` and write a connection-problem record for every failure.
///
/// Results come back in the order of `plants`. A failing plant never stops the
/// others from being checked; only a failed durable write ends the walk early.
pub async fn verify_plant_connections<C, R>(
    remote: &R,
    trail: &AuditTrail<'_, C>,
    plants: impl IntoIterator<Item = u32>,
    concurrency: usize,
    now: NaiveDateTime,
) -> Result<Vec<PlantConnectionStatus>>
where
    C: CentralStore + ?Sized,
    R: RemoteSource + ?Sized,
{
    let pings: Vec<(u32, Result<()>)> = stream::iter(plants)
        .map(|plant| async move { (plant, remote.ping(plant).await) })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut statuses = Vec::with_capacity(pings.len());
    for (plant, result) in pings {
        let key = plant_key(plant);
        let host = remote.host_of(plant);
        let error = match result {
            Ok(()) => {
                tracing::info!("{} reachable", key);
                None
            }
            Err(e) => {
                let detail = format!(
                    "{} (host={})",
                    e,
                    host.as_deref().unwrap_or("<unset>")
                );
                tracing::warn!("{} unreachable: {}", key, detail);
                trail.record_connection_problem(now, &key, &detail).await?;
                Some(detail)
            }
        };
        statuses.push(PlantConnectionStatus {
            plant,
            plant_key: key,
            host,
            error,
        });
    }

    let failed = statuses.iter().filter(|s| !s.is_ok()).count();
    tracing::info!(
        "Checked {} plants: {} reachable, {} unreachable",
        statuses.len(),
        statuses.len() - failed,
        failed
    );
    Ok(statuses)
}
