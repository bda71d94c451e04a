//! Level arrival controller - one per level
//!
//! The level LPR is authoritative for occupancy: a car counts as parked only
//! once it is read here. A second read of a plate already parked on this level
//! is the car driving off toward an exit and changes nothing.

use crate::domain::error::ParkingError;
use crate::domain::types::{LevelId, Plate};
use crate::infra::metrics::Metrics;
use crate::io::surface::ControlSurface;
use crate::services::index::OccupancyIndex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a level read meant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelEvent {
    Parked,
    Leaving,
    Refused,
}

pub struct LevelController {
    level: LevelId,
    surface: Arc<ControlSurface>,
    index: Arc<OccupancyIndex>,
    metrics: Arc<Metrics>,
}

impl LevelController {
    pub fn new(
        level: LevelId,
        surface: Arc<ControlSurface>,
        index: Arc<OccupancyIndex>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { level, surface, index, metrics }
    }

    /// Keeps accounting through an evacuation; stops on shutdown only
    pub fn run(self) {
        info!(level = %self.level, "level_controller_started");
        let lpr = &self.surface.level(self.level).lpr;

        while let Some(plate) = self.surface.next_plate(lpr, false) {
            self.handle(plate);
        }

        info!(level = %self.level, "level_controller_stopped");
    }

    pub fn handle(&self, plate: Plate) -> LevelEvent {
        match self.index.mark_parked(self.level, plate) {
            Ok(car) => {
                self.metrics.record_parked();
                info!(
                    level = %self.level,
                    plate = %plate,
                    occupancy = self.index.occupancy(self.level),
                    since_admit_ms = %car.entered_at.elapsed().as_millis(),
                    "car_parked"
                );
                LevelEvent::Parked
            }
            Err(ParkingError::DuplicateEntry { level, .. }) if level == self.level => {
                debug!(level = %self.level, plate = %plate, "car_leaving_level");
                LevelEvent::Leaving
            }
            Err(e) => {
                if e.is_ordering_defect() {
                    self.metrics.record_ordering_defect();
                }
                warn!(level = %self.level, plate = %plate, error = %e, "level_arrival_refused");
                LevelEvent::Refused
            }
        }
    }
}
