//! Status feed - JSONL snapshots for an external display
//!
//! One line per snapshot, appended to a file that is created if absent.

use crate::domain::types::{Cents, GateState, LevelId, LEVELS};
use crate::io::surface::{ControlSurface, Phase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct LevelStatus {
    pub level: usize,
    pub occupancy: usize,
    pub capacity: usize,
    pub smoothed_temperature: Option<i16>,
    pub alarm: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub gate: String,
    pub state: GateState,
    pub cycles: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacilitySnapshot {
    pub ts: DateTime<Utc>,
    pub phase: Phase,
    pub alarm: bool,
    pub levels: Vec<LevelStatus>,
    pub gates: Vec<GateStatus>,
    /// One character per entrance sign
    pub signs: String,
    pub in_transit: usize,
    pub total_admitted: u64,
    pub revenue: String,
    pub revenue_cents: Cents,
}

impl FacilitySnapshot {
    /// Read the hardware boundary; occupancy and revenue come from their owners
    pub fn capture(
        surface: &ControlSurface,
        occupancy: [usize; LEVELS],
        capacity: usize,
        in_transit: usize,
        total_admitted: u64,
        revenue: Cents,
    ) -> Self {
        let levels = (0..LEVELS)
            .map(|l| {
                let readout = surface.level(LevelId(l)).readout();
                LevelStatus {
                    level: l,
                    occupancy: occupancy[l],
                    capacity,
                    smoothed_temperature: readout.smoothed,
                    alarm: readout.alarm,
                }
            })
            .collect();

        let gates = ControlSurface::gate_ids()
            .map(|id| {
                let slot = surface.gate(id).lock();
                GateStatus { gate: id.to_string(), state: slot.state, cycles: slot.cycles_completed }
            })
            .collect();

        let signs = surface
            .entrances()
            .iter()
            .map(|entrance| entrance.sign.get().display as char)
            .collect();

        Self {
            ts: Utc::now(),
            phase: surface.phase(),
            alarm: surface.alarm().is_raised(),
            levels,
            gates,
            signs,
            in_transit,
            total_admitted,
            revenue: revenue.to_string(),
            revenue_cents: revenue,
        }
    }

    pub fn total_occupancy(&self) -> usize {
        self.levels.iter().map(|l| l.occupancy).sum()
    }
}

/// Appends snapshots as JSON lines
pub struct StatusWriter {
    file_path: PathBuf,
}

impl StatusWriter {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self { file_path: file_path.as_ref().to_path_buf() }
    }

    pub fn append(&self, snapshot: &FacilitySnapshot) -> anyhow::Result<()> {
        let path = self.file_path.as_path();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string(snapshot)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", json)?;
        debug!(file = %path.display(), bytes = %json.len(), "status_written");
        Ok(())
    }
}
