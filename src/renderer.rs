//! Log-based map renderer.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use anyhow::Result;
use fleet::{ChangeListener, RegistryChange, VehicleRecord};
use tracing::{debug, info};

/// Renders vehicle markers as log lines: appearances and removals at `info`,
/// moves at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRenderer;

impl ChangeListener for LogRenderer {
    fn on_change(&self, change: &RegistryChange) -> Result<()> {
        match change {
            RegistryChange::Added(record) => info!("+ {}", Marker(record)),
            RegistryChange::Updated { current, .. } => debug!("~ {}", Marker(current)),
            RegistryChange::Removed(record) => info!("- {}", Marker(record)),
        }
        Ok(())
    }
}

/// Map marker label for a vehicle.
pub struct Marker<'a>(pub &'a VehicleRecord);

impl Display for Marker<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let record = self.0;
        write!(f, "{} {}", record.mode, record.vehicle_id)?;
        if let Some(line) = &record.line_designation {
            write!(f, " line {line}")?;
        }
        write!(f, " at ({:.5}, {:.5})", record.position.latitude, record.position.longitude)
    }
}

/// Vehicle counts per mode.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub by_mode: BTreeMap<&'static str, usize>,
}

pub fn summarize(records: &[VehicleRecord]) -> Summary {
    let mut summary = Summary { total: records.len(), ..Summary::default() };
    for record in records {
        *summary.by_mode.entry(record.mode.as_str()).or_default() += 1;
    }
    summary
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} vehicles", self.total)?;
        if self.by_mode.is_empty() {
            return Ok(());
        }
        let modes =
            self.by_mode.iter().map(|(mode, count)| format!("{mode}: {count}")).collect::<Vec<_>>();
        write!(f, " ({})", modes.join(", "))
    }
}
