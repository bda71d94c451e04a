//! Evacuation coordinator
//!
//! Sleeps until the alarm is raised, then takes every gate and sign for the
//! rest of the run: all gates are forced open and held, every level shows its
//! alarm, and the entrance signs spell out the evacuation message one
//! character per interval until shutdown.

use crate::io::surface::ControlSurface;
use crate::services::gate::force_open;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct EvacuationCoordinator {
    surface: Arc<ControlSurface>,
    message: Vec<u8>,
    interval: Duration,
}

impl EvacuationCoordinator {
    pub fn new(surface: Arc<ControlSurface>, message: &str, interval: Duration) -> Self {
        Self { surface, message: message.as_bytes().to_vec(), interval }
    }

    pub fn run(self) {
        info!("evacuation_coordinator_armed");
        if !self.surface.alarm().wait_raised(|| self.surface.is_shutdown()) {
            info!("evacuation_coordinator_stopped");
            return;
        }

        warn!(message = %String::from_utf8_lossy(&self.message), "evacuation_started");
        self.take_over();
        let shown = self.cycle_signs();
        info!(characters_shown = %shown, "evacuation_coordinator_stopped");
    }

    /// Force every gate open and mark every level alarmed
    pub fn take_over(&self) {
        for id in ControlSurface::gate_ids() {
            force_open(&self.surface, id);
        }
        for level in self.surface.levels() {
            level.readout.lock().alarm = true;
        }
    }

    /// Cycle the message over every entrance sign until shutdown
    ///
    /// Returns the number of characters shown.
    fn cycle_signs(&self) -> u64 {
        if self.message.is_empty() {
            warn!("evacuation_message_empty");
            return 0;
        }

        let mut shown = 0u64;
        let mut next_tick = Instant::now();
        for &c in self.message.iter().cycle() {
            if self.surface.is_shutdown() {
                break;
            }
            self.show_everywhere(c);
            shown += 1;

            next_tick += self.interval;
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            }
        }
        shown
    }

    fn show_everywhere(&self, c: u8) {
        for entrance in self.surface.entrances() {
            entrance.sign.publish(|slot| {
                slot.display = c;
                slot.updates += 1;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{GateState, LevelId, LEVELS};
    use crate::infra::metrics::Metrics;
    use crate::services::gate::{GateController, GateTimings};
    use std::thread;

    #[test]
    fn test_idle_until_shutdown_without_alarm() {
        let surface = Arc::new(ControlSurface::new());
        let coordinator = EvacuationCoordinator::new(surface.clone(), "EVACUATE ", Duration::from_millis(1));
        let handle = thread::spawn(move || coordinator.run());
        thread::sleep(Duration::from_millis(10));
        surface.begin_shutdown();
        handle.join().unwrap();
        assert_eq!(surface.entrance(0).sign.get().updates, 0);
        assert!(!surface.gate(crate::domain::types::GateId::Exit(0)).lock().evacuate);
    }

    #[test]
    fn test_alarm_opens_gates_and_cycles_message() {
        let surface = Arc::new(ControlSurface::new());
        let metrics = Arc::new(Metrics::new());
        let timings = GateTimings {
            raise: Duration::from_millis(1),
            hold: Duration::from_millis(1),
            lower: Duration::from_millis(1),
        };
        let gates: Vec<_> = ControlSurface::gate_ids()
            .map(|id| {
                let controller = GateController::new(id, surface.clone(), timings, metrics.clone());
                thread::spawn(move || controller.run())
            })
            .collect();
        let coordinator = EvacuationCoordinator::new(surface.clone(), "EVACUATE ", Duration::from_millis(2));
        let handle = thread::spawn(move || coordinator.run());

        surface.raise_alarm();

        // The coordinator is the only sign writer, so update k shows message[k - 1]
        let message = b"EVACUATE ";
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut last_update = 0;
        let mut seen = 0;
        while seen < 12 && Instant::now() < deadline {
            let next = surface.entrance(4).sign.wait_for(Some(deadline), |slot| {
                (slot.updates > last_update).then_some(*slot)
            });
            if let Some(slot) = next {
                let expected = message[((slot.updates - 1) % message.len() as u64) as usize];
                assert_eq!(slot.display, expected, "update {}", slot.updates);
                last_update = slot.updates;
                seen += 1;
            }
        }
        assert!(last_update >= 12);

        for id in ControlSurface::gate_ids() {
            let open = surface
                .gate(id)
                .wait_for(Some(deadline), |slot| (slot.state == GateState::Open).then_some(()));
            assert!(open.is_some(), "{} not open", id);
        }
        for l in 0..LEVELS {
            assert!(surface.level(LevelId(l)).readout().alarm);
        }

        surface.begin_shutdown();
        handle.join().unwrap();
        for gate in gates {
            gate.join().unwrap();
        }
    }
}
