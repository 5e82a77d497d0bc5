// ABOUTME: Library root for plant-sync-reconciler
// ABOUTME: Repairs stalled sync between a central MySQL store and remote plant databases

pub mod audit;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod decision;
pub mod error;
pub mod freshness;
pub mod lock;
pub mod orchestrator;
pub mod purge;
pub mod remote;
pub mod store;
pub mod supervisor;
pub mod utils;

pub use catalog::{DeviceType, MonitoredTable};
pub use decision::{decide, SkipReason, Verdict};
pub use error::{ReconcileError, Result};
pub use orchestrator::{PassSummary, Reconciler, TableOutcome};
pub use remote::{RemoteHeartbeat, RemoteSource};
pub use store::CentralStore;
