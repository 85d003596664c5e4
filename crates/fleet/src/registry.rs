//! # Vehicle Registry
//!
//! The authoritative, in-memory map of vehicle id to latest known record.
//!
//! Every mutation happens under a single write lock, so readers never observe
//! a partially applied report. Snapshots share a read lock and may run
//! concurrently with each other.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use vehicle_position::{VehicleMode, VehiclePositionReport};

/// WGS84 coordinates of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Latest known state of a tracked vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRecord {
    pub vehicle_id: String,
    pub position: Position,
    pub mode: VehicleMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_designation: Option<String>,
    pub last_report_at: DateTime<Utc>,
}

impl From<VehiclePositionReport> for VehicleRecord {
    fn from(report: VehiclePositionReport) -> Self {
        Self {
            vehicle_id: report.vehicle_id,
            position: Position { latitude: report.latitude, longitude: report.longitude },
            mode: report.vehicle_mode,
            line_designation: report.line_designation,
            last_report_at: report.received_at,
        }
    }
}

/// A single registry mutation, as delivered to renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RegistryChange {
    /// First report for a vehicle.
    Added(VehicleRecord),

    /// A later report replaced the vehicle's record.
    Updated { previous: VehicleRecord, current: VehicleRecord },

    /// The vehicle is no longer tracked.
    Removed(VehicleRecord),
}

impl RegistryChange {
    /// Identifier of the vehicle the change applies to.
    #[must_use]
    pub fn vehicle_id(&self) -> &str {
        &self.record().vehicle_id
    }

    /// The record a renderer should show, or the one it should drop for
    /// [`RegistryChange::Removed`].
    #[must_use]
    pub const fn record(&self) -> &VehicleRecord {
        match self {
            Self::Added(record) | Self::Removed(record) => record,
            Self::Updated { current, .. } => current,
        }
    }

    /// Short name of the change kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Removed(_) => "removed",
        }
    }
}

/// The vehicle registry.
#[derive(Debug, Default)]
pub struct Registry {
    vehicles: RwLock<HashMap<String, VehicleRecord>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for a new vehicle or replace the existing one.
    ///
    /// Replacement is wholesale: no field of the previous record survives,
    /// including the line designation.
    pub fn upsert(&self, report: VehiclePositionReport) -> RegistryChange {
        let record = VehicleRecord::from(report);
        let previous = self.write().insert(record.vehicle_id.clone(), record.clone());

        match previous {
            Some(previous) => RegistryChange::Updated { previous, current: record },
            None => RegistryChange::Added(record),
        }
    }

    /// Stop tracking a vehicle, returning its last record.
    pub fn remove(&self, vehicle_id: &str) -> Option<VehicleRecord> {
        self.write().remove(vehicle_id)
    }

    /// Current record for a vehicle.
    #[must_use]
    pub fn get(&self, vehicle_id: &str) -> Option<VehicleRecord> {
        self.read().get(vehicle_id).cloned()
    }

    /// Point-in-time copy of every record, ordered by vehicle id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<VehicleRecord> {
        let mut records = self.read().values().cloned().collect::<Vec<_>>();
        records.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        records
    }

    /// Stop tracking every vehicle, returning the removed records ordered by
    /// vehicle id.
    pub fn clear(&self) -> Vec<VehicleRecord> {
        let mut records = self.write().drain().map(|(_, record)| record).collect::<Vec<_>>();
        records.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        records
    }

    /// Remove every vehicle last reported before `cutoff`, returning the
    /// removed records ordered by vehicle id.
    pub fn evict_stale(&self, cutoff: DateTime<Utc>) -> Vec<VehicleRecord> {
        let mut vehicles = self.write();
        let stale = vehicles
            .values()
            .filter(|record| record.last_report_at < cutoff)
            .map(|record| record.vehicle_id.clone())
            .collect::<Vec<_>>();

        let mut records =
            stale.iter().filter_map(|vehicle_id| vehicles.remove(vehicle_id)).collect::<Vec<_>>();
        drop(vehicles);

        records.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a record half written, so a
    // poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, VehicleRecord>> {
        self.vehicles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, VehicleRecord>> {
        self.vehicles.write().unwrap_or_else(PoisonError::into_inner)
    }
}
