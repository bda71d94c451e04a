//! Boom gate actuation
//!
//! One controller thread per gate is the only writer of the gate's state. A
//! caller (entrance or exit controller) asks for a cycle with [`request_cycle`]
//! and blocks until the gate is back in CLOSED, so at most one vehicle is in
//! transit per gate. An alarm forces the gate up and holds it there until
//! shutdown.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::{GateId, GateState};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::surface::{BoomGate, ControlSurface, GateSlot};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// `what` reported when the gate never became free for a new cycle
pub const WAIT_IDLE: &str = "idle gate";
/// `what` reported when an accepted cycle did not complete in time
pub const WAIT_CYCLE: &str = "gate cycle";

/// Dwell time in each moving/open state
#[derive(Debug, Clone, Copy)]
pub struct GateTimings {
    pub raise: Duration,
    pub hold: Duration,
    pub lower: Duration,
}

impl GateTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            raise: config.raise_duration(),
            hold: config.hold_duration(),
            lower: config.lower_duration(),
        }
    }
}

/// Why a timed dwell ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pause {
    Elapsed,
    Alarm,
    Shutdown,
}

pub struct GateController {
    id: GateId,
    surface: Arc<ControlSurface>,
    timings: GateTimings,
    metrics: Arc<Metrics>,
}

impl GateController {
    pub fn new(
        id: GateId,
        surface: Arc<ControlSurface>,
        timings: GateTimings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { id, surface, timings, metrics }
    }

    fn gate(&self) -> &BoomGate {
        self.surface.gate(self.id)
    }

    /// Actor loop. Returns on shutdown.
    pub fn run(self) {
        info!(gate = %self.id, "gate_controller_started");
        let gate = self.gate();
        let mut slot = gate.lock();

        loop {
            if self.surface.is_shutdown() {
                break;
            }
            if slot.evacuate {
                if let Err(e) = self.hold_open(&mut slot) {
                    error!(gate = %self.id, error = %e, "gate_evacuation_failed");
                    self.metrics.record_ordering_defect();
                }
                // Held open until shutdown
                break;
            }
            if slot.open_requested {
                let started = Instant::now();
                match self.cycle(&mut slot) {
                    Ok(Pause::Elapsed) => {
                        let cycle_us = started.elapsed().as_micros() as u64;
                        self.metrics.record_gate_cycle(cycle_us);
                        debug!(gate = %self.id, cycle_us = %cycle_us, "gate_cycle_completed");
                    }
                    Ok(Pause::Alarm) => {}
                    Ok(Pause::Shutdown) => break,
                    Err(e) => {
                        error!(gate = %self.id, error = %e, "gate_cycle_aborted");
                        self.metrics.record_ordering_defect();
                        slot.open_requested = false;
                    }
                }
                continue;
            }
            gate.wait(&mut slot);
        }

        info!(gate = %self.id, state = slot.state.as_str(), "gate_controller_stopped");
    }

    /// One full CLOSED→RAISING→OPEN→LOWERING→CLOSED cycle
    fn cycle(&self, slot: &mut MutexGuard<'_, GateSlot>) -> Result<Pause> {
        slot.open_requested = false;
        let steps = [
            (GateState::Raising, self.timings.raise),
            (GateState::Open, self.timings.hold),
            (GateState::Lowering, self.timings.lower),
        ];
        for (next, dwell) in steps {
            if self.alarm_up(slot) {
                return Ok(Pause::Alarm);
            }
            self.transition(slot, next)?;
            match self.pause(slot, dwell, true) {
                Pause::Elapsed => {}
                interrupted => return Ok(interrupted),
            }
        }
        if self.alarm_up(slot) {
            return Ok(Pause::Alarm);
        }
        self.transition(slot, GateState::Closed)?;
        slot.cycles_completed += 1;
        self.gate().notify();
        Ok(Pause::Elapsed)
    }

    /// Drive the gate to OPEN from wherever it is and keep it there
    fn hold_open(&self, slot: &mut MutexGuard<'_, GateSlot>) -> Result<()> {
        if matches!(slot.state, GateState::Closed | GateState::Lowering) {
            self.transition(slot, GateState::Raising)?;
        }
        if slot.state == GateState::Raising {
            if self.pause(slot, self.timings.raise, false) == Pause::Shutdown {
                return Ok(());
            }
            self.transition(slot, GateState::Open)?;
        }
        warn!(gate = %self.id, "gate_held_open_for_evacuation");

        while !self.surface.is_shutdown() {
            self.gate().wait(slot);
        }
        Ok(())
    }

    /// The alarm freezes a normal cycle even before evacuation takes the gate
    fn alarm_up(&self, slot: &GateSlot) -> bool {
        slot.evacuate || self.surface.alarm().is_raised()
    }

    fn transition(&self, slot: &mut GateSlot, next: GateState) -> Result<()> {
        let from = slot.state;
        if !from.can_transition_to(next) {
            return Err(ParkingError::IllegalTransition { gate: self.id, from, to: next });
        }
        if from == GateState::Closed {
            slot.cycle_log.clear();
        }
        slot.state = next;
        slot.cycle_log.push(next);
        debug!(gate = %self.id, from = from.as_str(), to = next.as_str(), "gate_transition");
        self.gate().notify();
        Ok(())
    }

    /// Dwell for `duration` with the gate lock released while waiting
    ///
    /// Shutdown always cuts the dwell short; the alarm does so only when
    /// `watch_alarm` is set (normal cycles, not the forced raise).
    fn pause(&self, slot: &mut MutexGuard<'_, GateSlot>, duration: Duration, watch_alarm: bool) -> Pause {
        let deadline = Instant::now() + duration;
        loop {
            if self.surface.is_shutdown() {
                return Pause::Shutdown;
            }
            if watch_alarm && self.alarm_up(slot) {
                return Pause::Alarm;
            }
            if !self.gate().wait_until(slot, deadline) {
                return Pause::Elapsed;
            }
        }
    }
}

/// Ask a gate for one open/close cycle and block until it is CLOSED again
///
/// A request made while the gate is mid-cycle waits for CLOSED first. Fails
/// with `Evacuating` once the alarm is up, `ShuttingDown` on shutdown, and
/// `RendezvousTimeout` if the gate controller does not respond by `timeout`.
pub fn request_cycle(surface: &ControlSurface, id: GateId, timeout: Duration) -> Result<()> {
    let gate = surface.gate(id);
    let deadline = Instant::now() + timeout;
    let mut slot = gate.lock();

    loop {
        if surface.is_shutdown() {
            return Err(ParkingError::ShuttingDown);
        }
        if slot.evacuate || surface.alarm().is_raised() {
            return Err(ParkingError::Evacuating);
        }
        if slot.state == GateState::Closed && !slot.open_requested {
            break;
        }
        if !gate.wait_until(&mut slot, deadline) {
            return Err(ParkingError::RendezvousTimeout { what: WAIT_IDLE, waited: timeout });
        }
    }

    slot.open_requested = true;
    let ticket = slot.cycles_completed + 1;
    gate.notify();

    loop {
        if slot.cycles_completed >= ticket {
            return Ok(());
        }
        if surface.is_shutdown() {
            return Err(ParkingError::ShuttingDown);
        }
        if slot.evacuate || surface.alarm().is_raised() {
            return Err(ParkingError::Evacuating);
        }
        if !gate.wait_until(&mut slot, deadline) {
            return Err(ParkingError::RendezvousTimeout { what: WAIT_CYCLE, waited: timeout });
        }
    }
}

/// Hand a gate to the evacuation override
pub fn force_open(surface: &ControlSurface, id: GateId) {
    surface.gate(id).publish(|slot| slot.evacuate = true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::{self, JoinHandle};

    fn timings() -> GateTimings {
        GateTimings {
            raise: Duration::from_millis(2),
            hold: Duration::from_millis(4),
            lower: Duration::from_millis(2),
        }
    }

    fn spawn_gate(surface: &Arc<ControlSurface>, id: GateId, timings: GateTimings) -> JoinHandle<()> {
        let controller = GateController::new(id, surface.clone(), timings, Arc::new(Metrics::new()));
        thread::spawn(move || controller.run())
    }

    fn wait_for_state(surface: &ControlSurface, id: GateId, state: GateState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        surface.gate(id).wait_for(Some(deadline), |slot| (slot.state == state).then_some(())).is_some()
    }

    #[test]
    fn test_cycle_visits_every_state_in_order() {
        let surface = Arc::new(ControlSurface::new());
        let id = GateId::Entrance(0);
        let handle = spawn_gate(&surface, id, timings());

        request_cycle(&surface, id, Duration::from_secs(5)).unwrap();
        {
            let slot = surface.gate(id).lock();
            assert_eq!(slot.state, GateState::Closed);
            assert_eq!(slot.cycles_completed, 1);
            assert_eq!(
                slot.cycle_log.as_slice(),
                &[GateState::Raising, GateState::Open, GateState::Lowering, GateState::Closed]
            );
        }

        surface.begin_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_requests_are_serialized() {
        let surface = Arc::new(ControlSurface::new());
        let id = GateId::Exit(2);
        let handle = spawn_gate(&surface, id, timings());

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let surface = surface.clone();
                thread::spawn(move || request_cycle(&surface, id, Duration::from_secs(5)))
            })
            .collect();
        for caller in callers {
            caller.join().unwrap().unwrap();
        }
        assert_eq!(surface.gate(id).lock().cycles_completed, 3);

        surface.begin_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_no_controller_times_out() {
        let surface = ControlSurface::new();
        let err = request_cycle(&surface, GateId::Entrance(1), Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, ParkingError::RendezvousTimeout { what: WAIT_CYCLE, .. }));
    }

    #[test]
    fn test_busy_gate_times_out_before_requesting() {
        let surface = ControlSurface::new();
        let id = GateId::Entrance(1);
        surface.gate(id).publish(|slot| slot.state = GateState::Open);
        let err = request_cycle(&surface, id, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, ParkingError::RendezvousTimeout { what: WAIT_IDLE, .. }));
        assert!(!surface.gate(id).lock().open_requested);
    }

    #[test]
    fn test_force_open_holds_gate_open() {
        let surface = Arc::new(ControlSurface::new());
        let id = GateId::Entrance(3);
        let handle = spawn_gate(&surface, id, timings());

        surface.alarm().raise();
        force_open(&surface, id);
        assert!(wait_for_state(&surface, id, GateState::Open));

        // Stays open well past a full cycle
        thread::sleep(Duration::from_millis(30));
        assert_eq!(surface.gate(id).lock().state, GateState::Open);
        assert!(matches!(
            request_cycle(&surface, id, Duration::from_millis(10)),
            Err(ParkingError::Evacuating)
        ));

        surface.begin_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_alarm_mid_cycle_never_closes() {
        let surface = Arc::new(ControlSurface::new());
        let id = GateId::Exit(0);
        let slow = GateTimings {
            raise: Duration::from_millis(5),
            hold: Duration::from_millis(200),
            lower: Duration::from_millis(5),
        };
        let handle = spawn_gate(&surface, id, slow);

        let caller = {
            let surface = surface.clone();
            thread::spawn(move || request_cycle(&surface, id, Duration::from_secs(5)))
        };
        assert!(wait_for_state(&surface, id, GateState::Open));
        surface.alarm().raise();
        force_open(&surface, id);

        assert!(matches!(caller.join().unwrap(), Err(ParkingError::Evacuating)));
        thread::sleep(Duration::from_millis(20));
        let slot = surface.gate(id).lock();
        assert_eq!(slot.state, GateState::Open);
        assert!(!slot.cycle_log.contains(&GateState::Closed));
        drop(slot);

        surface.begin_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_alarm_before_takeover_freezes_cycle() {
        let surface = Arc::new(ControlSurface::new());
        let id = GateId::Entrance(2);
        let slow = GateTimings {
            raise: Duration::from_millis(5),
            hold: Duration::from_millis(50),
            lower: Duration::from_millis(5),
        };
        let handle = spawn_gate(&surface, id, slow);

        let caller = {
            let surface = surface.clone();
            thread::spawn(move || request_cycle(&surface, id, Duration::from_secs(5)))
        };
        assert!(wait_for_state(&surface, id, GateState::Open));
        // Alarm only; nothing has forced the gate open yet
        surface.raise_alarm();

        assert!(matches!(caller.join().unwrap(), Err(ParkingError::Evacuating)));
        thread::sleep(Duration::from_millis(80));
        {
            let slot = surface.gate(id).lock();
            assert_eq!(slot.state, GateState::Open);
            assert!(!slot.cycle_log.contains(&GateState::Lowering));
            assert_eq!(slot.cycles_completed, 0);
        }

        surface.begin_shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_shutdown_releases_waiting_caller() {
        let surface = Arc::new(ControlSurface::new());
        let id = GateId::Entrance(4);
        surface.gate(id).publish(|slot| slot.state = GateState::Lowering);
        let caller = {
            let surface = surface.clone();
            thread::spawn(move || request_cycle(&surface, id, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(5));
        surface.begin_shutdown();
        assert!(matches!(caller.join().unwrap(), Err(ParkingError::ShuttingDown)));
    }
}
