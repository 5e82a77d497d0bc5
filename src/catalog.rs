// ABOUTME: Table discovery for the central store
// ABOUTME: Lists monitored per-device tables and parses their device type and plant id

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use crate::error::Result;
use crate::store::CentralStore;

/// Family of measurement device a central table belongs to.
///
/// Serialized with the prefix the central schema uses for the table family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "horometro", alias = "hourmeter")]
    HourMeter,
    #[serde(rename = "pesometro", alias = "weightmeter")]
    WeightMeter,
    #[serde(rename = "plc")]
    Plc,
}

impl DeviceType {
    pub const ALL: [DeviceType; 3] = [DeviceType::HourMeter, DeviceType::WeightMeter, DeviceType::Plc];

    /// Table-name prefix in the central schema. Also the value stored in error records.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::HourMeter => "horometro",
            DeviceType::WeightMeter => "pesometro",
            DeviceType::Plc => "plc",
        }
    }

    /// `information_schema` LIKE pattern matching this family's tables.
    pub fn like_pattern(&self) -> String {
        format!("{}\\_%", self.as_str())
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "horometro" | "hourmeter" => Some(DeviceType::HourMeter),
            "pesometro" | "weightmeter" => Some(DeviceType::WeightMeter),
            "plc" => Some(DeviceType::Plc),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A central table under reconciliation.
///
/// `device` and `plant` are `None` when the name does not follow the
/// `<type><separator><plant-id>` convention. Such tables are still probed for
/// freshness but can never be routed to a remote plant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredTable {
    pub name: String,
    pub device: Option<DeviceType>,
    pub plant: Option<u32>,
}

impl MonitoredTable {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (device, plant) = match parse_table_name(&name) {
            Some((device, plant)) => (Some(device), Some(plant)),
            None => (None, None),
        };
        Self {
            name,
            device,
            plant,
        }
    }

    /// Device type and plant id, when both could be parsed.
    pub fn route(&self) -> Option<(DeviceType, u32)> {
        self.device.zip(self.plant)
    }
}

fn table_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(hourmeter|horometro|weightmeter|pesometro|plc)[^0-9]*?(\d+)$")
            .expect("table name pattern is valid")
    })
}

/// Parse `(device type, plant id)` from a central table name.
///
/// Accepts `plc_31`, `plc31`, `horometro_61`, `HourMeter-7` and so on. Plant id
/// zero is rejected because plant ids are positive.
pub fn parse_table_name(name: &str) -> Option<(DeviceType, u32)> {
    let caps = table_name_regex().captures(name)?;
    let device = DeviceType::from_prefix(caps.get(1)?.as_str())?;
    let plant: u32 = caps.get(2)?.as_str().parse().ok()?;
    if plant == 0 {
        return None;
    }
    Some((device, plant))
}

/// Lists the central tables a reconciliation pass looks at.
pub struct TableDiscovery<'a, S: CentralStore + ?Sized> {
    store: &'a S,
    patterns: Vec<String>,
    excluded: HashSet<String>,
}

impl<'a, S: CentralStore + ?Sized> TableDiscovery<'a, S> {
    pub fn new(store: &'a S, patterns: Vec<String>, excluded: &[String]) -> Self {
        Self {
            store,
            patterns,
            excluded: excluded.iter().map(|t| t.trim().to_string()).collect(),
        }
    }

    /// Monitored tables sorted by name, with excluded tables removed.
    ///
    /// Fails with `CatalogUnavailable` when the catalog cannot be read; no
    /// partial list is returned in that case.
    pub async fn list_monitored_tables(&self) -> Result<Vec<MonitoredTable>> {
        let names = self.store.list_tables(&self.patterns).await?;
        Ok(select_monitored(names, &self.excluded))
    }
}

fn select_monitored(mut names: Vec<String>, excluded: &HashSet<String>) -> Vec<MonitoredTable> {
    names.retain(|name| !excluded.contains(name));
    names.sort();
    names.dedup();
    names.into_iter().map(MonitoredTable::new).collect()
}

/// Default LIKE patterns, one per device family.
pub fn default_patterns() -> Vec<String> {
    DeviceType::ALL.iter().map(|d| d.like_pattern()).collect()
}
