// ABOUTME: Configuration for reconciliation passes
// ABOUTME: Central/plant connection profiles, plant routing table and engine knobs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{default_patterns, DeviceType};

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Connection to the central aggregation store.
#[derive(Clone)]
pub struct CentralConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Schema holding the per-device measurement tables.
    pub database: String,
    /// Schema holding the audit, error and connection-problem tables.
    pub support_database: String,
}

/// How to reach one plant's own database.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PlantConnectionProfile {
    #[serde(skip)]
    pub plant: u32,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

impl std::fmt::Debug for CentralConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("support_database", &self.support_database)
            .finish()
    }
}

impl std::fmt::Debug for PlantConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlantConnectionProfile")
            .field("plant", &self.plant)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Plant connection profiles keyed by plant id.
///
/// `declared` also remembers plants that have a `HOST_<id>` variable but an
/// incomplete profile, so the connection supervisor can report them.
#[derive(Debug, Clone, Default)]
pub struct PlantDirectory {
    profiles: BTreeMap<u32, PlantConnectionProfile>,
    declared: BTreeSet<u32>,
}

impl PlantDirectory {
    pub fn new(profiles: impl IntoIterator<Item = PlantConnectionProfile>) -> Self {
        let profiles: BTreeMap<u32, PlantConnectionProfile> =
            profiles.into_iter().map(|p| (p.plant, p)).collect();
        let declared = profiles.keys().copied().collect();
        Self { profiles, declared }
    }

    /// Read `HOST_<id>`, `USER_<id>`, `PASS_<id>`, `DB_<id>` and optional `PORT_<id>`.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars: Vec<(String, String)> = vars.into_iter().collect();

        // A plant is declared by its HOST_ key even when the value is blank.
        let mut directory = Self::default();
        directory.declared = vars
            .iter()
            .filter_map(|(key, _)| key.strip_prefix("HOST_")?.parse::<u32>().ok())
            .collect();

        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        let declared: Vec<u32> = directory.declared.iter().copied().collect();
        for plant in declared {
            let get = |prefix: &str| vars.get(&format!("{}_{}", prefix, plant)).cloned();
            let port = match get("PORT").map(|p| p.trim().parse::<u16>()) {
                None => DEFAULT_MYSQL_PORT,
                Some(Ok(port)) => port,
                Some(Err(_)) => {
                    tracing::warn!("Ignoring plant {}: PORT_{} is not a valid port", plant, plant);
                    continue;
                }
            };
            match (get("HOST"), get("USER"), get("PASS"), get("DB")) {
                (Some(host), Some(user), Some(password), Some(database)) => {
                    directory.profiles.insert(
                        plant,
                        PlantConnectionProfile {
                            plant,
                            host,
                            port,
                            user,
                            password,
                            database,
                        },
                    );
                }
                _ => tracing::warn!(
                    "Plant {} has HOST_{} but an incomplete profile (needs USER_, PASS_, DB_)",
                    plant,
                    plant
                ),
            }
        }
        directory
    }

    /// Add or replace profiles, e.g. from the TOML config file.
    pub fn merge(&mut self, profiles: impl IntoIterator<Item = PlantConnectionProfile>) {
        for profile in profiles {
            self.declared.insert(profile.plant);
            self.profiles.insert(profile.plant, profile);
        }
    }

    pub fn get(&self, plant: u32) -> Option<&PlantConnectionProfile> {
        self.profiles.get(&plant)
    }

    /// Every plant with at least a declared host, in ascending order.
    pub fn declared_plants(&self) -> impl Iterator<Item = u32> + '_ {
        self.declared.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Physical table holding each device's data at each plant.
///
/// Plants disagree on which PLC is primary, so the mapping cannot be derived
/// from the central table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: HashMap<(u32, DeviceType), String>,
}

impl RoutingTable {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn with_route(mut self, plant: u32, device: DeviceType, table: impl Into<String>) -> Self {
        self.routes.insert((plant, device), table.into());
        self
    }

    pub fn resolve(&self, plant: u32, device: DeviceType) -> Option<&str> {
        self.routes.get(&(plant, device)).map(String::as_str)
    }

    fn extend(&mut self, routes: impl IntoIterator<Item = RouteEntry>) {
        for route in routes {
            self.routes.insert((route.plant, route.device), route.table);
        }
    }
}

impl Default for RoutingTable {
    /// The deployed plant layout. Plant 8 runs two lines: 81 is the primary
    /// crusher on `plc1`, 82 the tertiary (VSI and cone) on `plc2`.
    /// Weight meters have no default route; add `[[routes]]` entries for them.
    fn default() -> Self {
        let plc = [
            (21, "plc1"),
            (31, "plc2"),
            (41, "plc1"),
            (51, "plc1"),
            (61, "plc1"),
            (71, "plc1"),
            (81, "plc1"),
            (82, "plc2"),
        ];
        let hour_meters = [
            (21, "horometro_plc1"),
            (31, "horometro_plc2"),
            (41, "horometro_plc1"),
            (51, "horometro_plc1"),
            (61, "horometro_plc1"),
            (71, "horometro_plc11"),
            (81, "horometro_plc1"),
            (82, "horometro_plc2"),
        ];
        let mut table = Self::empty();
        for (plant, name) in plc {
            table = table.with_route(plant, DeviceType::Plc, name);
        }
        for (plant, name) in hour_meters {
            table = table.with_route(plant, DeviceType::HourMeter, name);
        }
        table
    }
}

/// Column names in the central per-device tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub measurement: String,
    pub sync_check: String,
    /// Preferred purge ordering column, used when the table has it.
    pub order_time: String,
    /// Fallback purge ordering column (auto-increment surrogate key).
    pub order_fallback: String,
    /// Latest-timestamp column in the plants' own tables.
    pub remote_measurement: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            measurement: "fecha".to_string(),
            sync_check: "fecha_busqueda".to_string(),
            order_time: "fecha".to_string(),
            order_fallback: "id".to_string(),
            remote_measurement: "fecha".to_string(),
        }
    }
}

/// Append-only tables in the support schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkTables {
    pub purges: String,
    pub errors: String,
    pub connection_problems: String,
}

impl Default for SinkTables {
    fn default() -> Self {
        Self {
            purges: "registro_sincronizacion".to_string(),
            errors: "error_sincronizacion".to_string(),
            connection_problems: "problemas_conexion".to_string(),
        }
    }
}

/// Per-plant connection timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTimeouts {
    pub connect: Duration,
    pub query: Duration,
}

impl Default for RemoteTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(6),
            query: Duration::from_secs(6),
        }
    }
}

/// Knobs for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Tables whose lag strictly exceeds this many minutes are stale candidates.
    pub threshold_minutes: i64,
    /// Tables never reconciled, by exact name.
    pub excluded_tables: Vec<String>,
    /// LIKE patterns selecting monitored tables.
    pub patterns: Vec<String>,
    /// Rows removed from the tail of a table per purge.
    pub purge_batch: u32,
    /// Stale tables handled concurrently.
    pub concurrency: usize,
    /// Compute verdicts without purging or writing purge records.
    pub dry_run: bool,
    pub log_file: PathBuf,
    pub lock_file: Option<PathBuf>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            threshold_minutes: 3,
            excluded_tables: Vec::new(),
            patterns: default_patterns(),
            purge_batch: 30,
            concurrency: 8,
            dry_run: false,
            log_file: PathBuf::from("log_sincronizacion.log"),
            lock_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RouteEntry {
    plant: u32,
    device: DeviceType,
    table: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TimeoutSecs {
    connect: Option<u64>,
    query: Option<u64>,
}

/// Optional TOML file with settings that do not fit on a command line.
///
/// ```toml
/// [plants.61]
/// host = "10.0.6.1"
/// user = "reader"
/// password = "secret"
/// database = "planta6"
///
/// [[routes]]
/// plant = 41
/// device = "pesometro"
/// table = "pesometro_plc1"
///
/// [timeouts]
/// connect = 4
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    plants: BTreeMap<String, PlantConnectionProfile>,
    #[serde(default)]
    routes: Vec<RouteEntry>,
    #[serde(default)]
    replace_default_routes: bool,
    #[serde(default)]
    columns: Option<ColumnNames>,
    #[serde(default)]
    sinks: Option<SinkTables>,
    #[serde(default)]
    timeouts: TimeoutSecs,
    #[serde(default)]
    patterns: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn plant_profiles(&self) -> Result<Vec<PlantConnectionProfile>> {
        self.plants
            .iter()
            .map(|(plant, profile)| {
                let plant: u32 = plant
                    .parse()
                    .with_context(|| format!("Invalid plant id {:?} in [plants]", plant))?;
                Ok(PlantConnectionProfile {
                    plant,
                    ..profile.clone()
                })
            })
            .collect()
    }

    pub fn routing_table(&self) -> RoutingTable {
        let mut table = if self.replace_default_routes {
            RoutingTable::empty()
        } else {
            RoutingTable::default()
        };
        table.extend(self.routes.iter().cloned());
        table
    }

    pub fn columns(&self) -> ColumnNames {
        self.columns.clone().unwrap_or_default()
    }

    pub fn sinks(&self) -> SinkTables {
        self.sinks.clone().unwrap_or_default()
    }

    pub fn patterns(&self) -> Option<Vec<String>> {
        self.patterns.clone()
    }

    pub fn timeouts(&self) -> RemoteTimeouts {
        let defaults = RemoteTimeouts::default();
        RemoteTimeouts {
            connect: self
                .timeouts
                .connect
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect),
            query: self
                .timeouts
                .query
                .map(Duration::from_secs)
                .unwrap_or(defaults.query),
        }
    }
}

/// Default location of the pass lock file.
pub fn default_lock_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".plant-sync-reconciler").join("reconcile.lock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_plant_directory_from_vars() {
        let directory = PlantDirectory::from_vars(vars(&[
            ("HOST_61", "10.0.6.1"),
            ("USER_61", "reader"),
            ("PASS_61", "secret"),
            ("DB_61", "planta6"),
            ("HOST_31", "10.0.3.1"),
            ("USER_31", "reader"),
            ("PASS_31", "secret"),
            ("DB_31", "planta3"),
            ("PORT_31", "3307"),
            ("DB_HOST", "central"),
        ]));
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.get(61).unwrap().port, 3306);
        assert_eq!(directory.get(31).unwrap().port, 3307);
        assert_eq!(directory.get(31).unwrap().database, "planta3");
        assert!(directory.get(21).is_none());
    }

    #[test]
    fn test_incomplete_plant_is_declared_but_not_usable() {
        let directory = PlantDirectory::from_vars(vars(&[
            ("HOST_71", "10.0.7.1"),
            ("USER_71", "reader"),
            ("PASS_71", ""),
        ]));
        assert!(directory.get(71).is_none());
        assert_eq!(directory.declared_plants().collect::<Vec<_>>(), vec![71]);
    }

    #[test]
    fn test_blank_host_still_declares_plant() {
        let directory = PlantDirectory::from_vars(vars(&[
            ("HOST_71", ""),
            ("HOST_21", "10.0.2.1"),
            ("USER_21", "reader"),
            ("PASS_21", "secret"),
            ("DB_21", "planta2"),
            ("HOST_NAME", "ignored"),
        ]));
        assert_eq!(
            directory.declared_plants().collect::<Vec<_>>(),
            vec![21, 71]
        );
        assert!(directory.get(71).is_none());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_profile_debug_hides_password() {
        let profile = PlantConnectionProfile {
            plant: 61,
            host: "h".into(),
            port: 3306,
            user: "u".into(),
            password: "hunter2".into(),
            database: "d".into(),
        };
        assert!(!format!("{:?}", profile).contains("hunter2"));
    }

    #[test]
    fn test_default_routing_matches_plant_layout() {
        let routes = RoutingTable::default();
        assert_eq!(routes.resolve(31, DeviceType::Plc), Some("plc2"));
        assert_eq!(routes.resolve(81, DeviceType::Plc), Some("plc1"));
        assert_eq!(routes.resolve(82, DeviceType::Plc), Some("plc2"));
        assert_eq!(
            routes.resolve(71, DeviceType::HourMeter),
            Some("horometro_plc11")
        );
        assert_eq!(routes.resolve(41, DeviceType::WeightMeter), None);
        assert_eq!(routes.resolve(99, DeviceType::Plc), None);
    }

    #[test]
    fn test_file_config_overrides() {
        let config = FileConfig::parse(
            r#"
            [plants.61]
            host = "10.0.6.1"
            user = "reader"
            password = "secret"
            database = "planta6"

            [[routes]]
            plant = 41
            device = "pesometro"
            table = "pesometro_plc1"

            [[routes]]
            plant = 31
            device = "plc"
            table = "plc1"

            [timeouts]
            connect = 2

            [columns]
            sync_check = "sync_check_time"
            "#,
        )
        .unwrap();

        let profiles = config.plant_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].plant, 61);
        assert_eq!(profiles[0].port, 3306);

        let routes = config.routing_table();
        assert_eq!(
            routes.resolve(41, DeviceType::WeightMeter),
            Some("pesometro_plc1")
        );
        assert_eq!(routes.resolve(31, DeviceType::Plc), Some("plc1"));
        assert_eq!(routes.resolve(21, DeviceType::Plc), Some("plc1"));

        let timeouts = config.timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(2));
        assert_eq!(timeouts.query, Duration::from_secs(6));

        let columns = config.columns();
        assert_eq!(columns.sync_check, "sync_check_time");
        assert_eq!(columns.measurement, "fecha");
    }

    #[test]
    fn test_file_config_replaces_routes() {
        let config = FileConfig::parse(
            r#"
            replace_default_routes = true
            [[routes]]
            plant = 7
            device = "hourmeter"
            table = "hm"
            "#,
        )
        .unwrap();
        let routes = config.routing_table();
        assert_eq!(routes.resolve(7, DeviceType::HourMeter), Some("hm"));
        assert_eq!(routes.resolve(21, DeviceType::Plc), None);
    }

    #[test]
    fn test_file_config_rejects_unknown_keys() {
        assert!(FileConfig::parse("threshold = 3").is_err());
    }

    #[test]
    fn test_reconcile_config_default() {
        let config = ReconcileConfig::default();
        assert_eq!(config.threshold_minutes, 3);
        assert_eq!(config.purge_batch, 30);
        assert!(!config.dry_run);
        assert_eq!(config.patterns.len(), 3);
    }
}
