//! Exit controller - one per exit
//!
//! A parked car read at an exit gets a billing task (carrying its billing start
//! and exit time), one gate cycle, and only then is removed from the index.
//! Plates with no parked record are ignored and the gate stays closed.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::{GateId, ParkedCar, Plate};
use crate::infra::metrics::Metrics;
use crate::io::surface::ControlSurface;
use crate::services::billing::{BillingQueue, BillingTask};
use crate::services::gate::request_cycle;
use crate::services::index::OccupancyIndex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct ExitController {
    id: usize,
    surface: Arc<ControlSurface>,
    index: Arc<OccupancyIndex>,
    billing: Arc<BillingQueue>,
    metrics: Arc<Metrics>,
    rendezvous_timeout: Duration,
}

impl ExitController {
    pub fn new(
        id: usize,
        surface: Arc<ControlSurface>,
        index: Arc<OccupancyIndex>,
        billing: Arc<BillingQueue>,
        metrics: Arc<Metrics>,
        rendezvous_timeout: Duration,
    ) -> Self {
        Self { id, surface, index, billing, metrics, rendezvous_timeout }
    }

    pub fn run(self) {
        info!(exit = self.id, "exit_controller_started");
        let lpr = &self.surface.exit(self.id).lpr;

        while let Some(plate) = self.surface.next_plate(lpr, true) {
            match self.handle(plate) {
                Ok(Some(car)) => info!(exit = self.id, plate = %plate, level = %car.level, "car_exited"),
                Ok(None) => debug!(exit = self.id, plate = %plate, "exit_plate_not_parked"),
                Err(e) => {
                    if e.is_ordering_defect() {
                        self.metrics.record_ordering_defect();
                    }
                    error!(exit = self.id, plate = %plate, error = %e, "exit_failed");
                }
            }
        }

        if self.surface.alarm().is_raised() {
            warn!(exit = self.id, "exit_controller_stopped_for_evacuation");
        } else {
            info!(exit = self.id, "exit_controller_stopped");
        }
    }

    /// Bill, cycle the gate, then release the car's index entry
    ///
    /// Returns `Ok(None)` for a plate that is not parked (silent reject).
    pub fn handle(&self, plate: Plate) -> Result<Option<ParkedCar>> {
        let Some(car) = self.index.parked(&plate) else {
            return Ok(None);
        };

        let exited_at = Instant::now();
        self.billing.enqueue(BillingTask {
            plate,
            entered_at: car.entered_at,
            exited_at,
            enqueued_at: Instant::now(),
        })?;

        match request_cycle(&self.surface, GateId::Exit(self.id), self.rendezvous_timeout) {
            Ok(()) => {}
            Err(ParkingError::RendezvousTimeout { what, waited }) => {
                self.metrics.record_rendezvous_timeout();
                warn!(
                    exit = self.id,
                    plate = %plate,
                    what = what,
                    waited_ms = %waited.as_millis(),
                    "exit_gate_timeout"
                );
            }
            // Gates are held open or the process is stopping; the car is billed either way
            Err(e) => info!(exit = self.id, plate = %plate, reason = %e, "exit_gate_cycle_skipped"),
        }

        // Billed once, so the record goes even if the gate misbehaved
        let exited = self.index.mark_exited(&plate)?;
        self.metrics.record_exited();
        Ok(Some(exited))
    }
}
