// ABOUTME: Remote heartbeat probes against plant databases
// ABOUTME: One dedicated, time-boxed connection per call, closed before returning

use async_trait::async_trait;
use chrono::NaiveDateTime;
use mysql_async::prelude::*;
use mysql_async::Conn;
use std::future::Future;

use crate::catalog::DeviceType;
use crate::config::{PlantConnectionProfile, PlantDirectory, RemoteTimeouts, RoutingTable};
use crate::error::{ReconcileError, Result};
use crate::store::mysql_opts;
use crate::utils::{parse_db_timestamp, quote_mysql_ident, validate_table_name};

/// Latest timestamp a plant holds for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHeartbeat {
    pub plant: u32,
    pub device: DeviceType,
    pub latest: Option<NaiveDateTime>,
}

/// Access to the plants' own databases.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Latest measurement timestamp for `device` at `plant`, `None` when the
    /// plant's table is empty. Connection problems are errors, never `None`.
    async fn probe_remote(&self, plant: u32, device: DeviceType) -> Result<RemoteHeartbeat>;

    /// Check that the plant accepts a connection and answers a trivial query.
    async fn ping(&self, plant: u32) -> Result<()>;

    /// Host a plant is reached at, for diagnostics.
    fn host_of(&self, plant: u32) -> Option<String>;
}

/// MySQL plant access. Connections are never pooled or shared between plants.
pub struct MysqlRemoteSource {
    plants: PlantDirectory,
    routes: RoutingTable,
    timeouts: RemoteTimeouts,
    measurement_column: String,
}

impl MysqlRemoteSource {
    pub fn new(
        plants: PlantDirectory,
        routes: RoutingTable,
        timeouts: RemoteTimeouts,
        measurement_column: impl Into<String>,
    ) -> Self {
        Self {
            plants,
            routes,
            timeouts,
            measurement_column: measurement_column.into(),
        }
    }

    pub fn plants(&self) -> &PlantDirectory {
        &self.plants
    }

    fn profile(&self, plant: u32) -> Result<&PlantConnectionProfile> {
        self.plants
            .get(plant)
            .ok_or(ReconcileError::MissingConnectionProfile { plant })
    }

    async fn open(&self, profile: &PlantConnectionProfile) -> Result<Conn> {
        let opts = mysql_opts(
            &profile.host,
            profile.port,
            &profile.user,
            &profile.password,
            &profile.database,
        );
        match tokio::time::timeout(self.timeouts.connect, Conn::new(opts)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(ReconcileError::RemoteConnectFailed {
                plant: profile.plant,
                detail: e.to_string(),
            }),
            Err(_) => Err(ReconcileError::RemoteConnectFailed {
                plant: profile.plant,
                detail: format!("connection timed out after {:?}", self.timeouts.connect),
            }),
        }
    }

    /// Run one query on a fresh connection and disconnect on every path.
    async fn with_connection<T, F, Fut>(&self, plant: u32, query: F) -> Result<T>
    where
        F: FnOnce(Conn) -> Fut,
        Fut: Future<Output = (Conn, std::result::Result<T, mysql_async::Error>)>,
    {
        let profile = self.profile(plant)?;
        let conn = self.open(profile).await?;

        let outcome = tokio::time::timeout(self.timeouts.query, query(conn)).await;
        let result = match outcome {
            Ok((conn, result)) => {
                if let Err(e) = conn.disconnect().await {
                    tracing::debug!("Error closing connection to plant {}: {}", plant, e);
                }
                result.map_err(|e| e.to_string())
            }
            // The connection was dropped with the timed-out future.
            Err(_) => Err(format!("query timed out after {:?}", self.timeouts.query)),
        };

        result.map_err(|detail| ReconcileError::RemoteQueryFailed { plant, detail })
    }
}

#[async_trait]
impl RemoteSource for MysqlRemoteSource {
    async fn probe_remote(&self, plant: u32, device: DeviceType) -> Result<RemoteHeartbeat> {
        let table = self
            .routes
            .resolve(plant, device)
            .ok_or_else(|| ReconcileError::RemoteQueryFailed {
                plant,
                detail: format!("no remote table routed for device type {}", device),
            })?;
        validate_table_name(table)?;

        let sql = format!(
            "SELECT DATE_FORMAT(MAX({}), '%Y-%m-%d %H:%i:%s') FROM {}",
            quote_mysql_ident(&self.measurement_column),
            quote_mysql_ident(table)
        );

        let latest: Option<String> = self
            .with_connection(plant, |mut conn| async move {
                let result = conn.query_first::<Option<String>, _>(sql).await;
                (conn, result.map(Option::flatten))
            })
            .await?;

        let latest = latest.as_deref().and_then(parse_db_timestamp);
        tracing::debug!(
            "Plant {} {} (table {}) latest row: {:?}",
            plant,
            device,
            table,
            latest
        );

        Ok(RemoteHeartbeat {
            plant,
            device,
            latest,
        })
    }

    async fn ping(&self, plant: u32) -> Result<()> {
        self.with_connection(plant, |mut conn| async move {
            let result = conn.query_drop("SELECT 1").await;
            (conn, result)
        })
        .await
    }

    fn host_of(&self, plant: u32) -> Option<String> {
        self.plants.get(plant).map(|p| p.host.clone())
    }
}
