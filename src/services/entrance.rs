//! Admission controller - one per entrance
//!
//! Reads plates from the entrance LPR, decides admit/reject/full, shows the
//! decision on the sign and, for admitted cars, runs one gate cycle before
//! accepting the next plate. Stops once the alarm is raised; the evacuation
//! coordinator owns the sign from then on.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::{sign, GateId, LevelId, Plate};
use crate::infra::metrics::Metrics;
use crate::io::surface::ControlSurface;
use crate::services::gate::{self, request_cycle};
use crate::services::index::OccupancyIndex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct EntranceController {
    id: usize,
    surface: Arc<ControlSurface>,
    index: Arc<OccupancyIndex>,
    metrics: Arc<Metrics>,
    rendezvous_timeout: Duration,
}

impl EntranceController {
    pub fn new(
        id: usize,
        surface: Arc<ControlSurface>,
        index: Arc<OccupancyIndex>,
        metrics: Arc<Metrics>,
        rendezvous_timeout: Duration,
    ) -> Self {
        Self { id, surface, index, metrics, rendezvous_timeout }
    }

    pub fn run(self) {
        info!(entrance = self.id, "entrance_controller_started");
        let lpr = &self.surface.entrance(self.id).lpr;

        while let Some(plate) = self.surface.next_plate(lpr, true) {
            self.handle(plate);
        }

        if self.surface.alarm().is_raised() {
            warn!(entrance = self.id, "entrance_controller_stopped_for_evacuation");
        } else {
            info!(entrance = self.id, "entrance_controller_stopped");
        }
    }

    /// Process one plate reading end to end
    pub fn handle(&self, plate: Plate) {
        match self.decide(plate) {
            Ok(level) => {
                self.metrics.record_admitted();
                self.show(level.sign_char());
                info!(entrance = self.id, plate = %plate, level = %level, "car_admitted");
                self.pass_gate(plate);
            }
            Err(ParkingError::RejectedPlate(_)) => {
                self.metrics.record_rejected();
                self.show(sign::REJECTED);
                info!(entrance = self.id, plate = %plate, "plate_rejected");
            }
            Err(ParkingError::CapacityExceeded) => {
                self.metrics.record_full();
                self.show(sign::FULL);
                info!(entrance = self.id, plate = %plate, "facility_full");
            }
            Err(e) => {
                // Duplicate or allocation failure: reject this car, keep the index intact
                if e.is_ordering_defect() {
                    self.metrics.record_ordering_defect();
                }
                self.show(sign::REJECTED);
                warn!(entrance = self.id, plate = %plate, error = %e, "admission_refused");
            }
        }
    }

    /// Whitelist check then capacity/level assignment
    fn decide(&self, plate: Plate) -> Result<LevelId> {
        if !self.index.lookup(&plate) {
            return Err(ParkingError::RejectedPlate(plate));
        }
        self.index.admit(plate, Instant::now())
    }

    /// Run one gate cycle for an admitted car
    fn pass_gate(&self, plate: Plate) {
        let id = GateId::Entrance(self.id);
        match request_cycle(&self.surface, id, self.rendezvous_timeout) {
            Ok(()) => debug!(entrance = self.id, plate = %plate, "car_entered"),
            Err(ParkingError::RendezvousTimeout { what, waited }) => {
                self.metrics.record_rendezvous_timeout();
                error!(
                    entrance = self.id,
                    plate = %plate,
                    what = what,
                    waited_ms = %waited.as_millis(),
                    "entrance_gate_timeout"
                );
                // The gate never opened, so the car is still outside
                if what == gate::WAIT_IDLE {
                    self.index.cancel_admission(&plate);
                }
            }
            Err(e) => info!(entrance = self.id, plate = %plate, reason = %e, "entrance_gate_cycle_skipped"),
        }
    }

    fn show(&self, display: u8) {
        // The evacuation coordinator owns the signs once the alarm is up
        if self.surface.alarm().is_raised() {
            return;
        }
        self.surface.entrance(self.id).sign.publish(|slot| {
            slot.display = display;
            slot.updates += 1;
        });
    }
}
