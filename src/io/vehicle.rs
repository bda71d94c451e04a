//! Vehicle side of the rendezvous protocol
//!
//! What a simulated driver does at each sensor: put a plate in front of an
//! LPR, read the entrance sign, and wait for the gate to let it through. Used
//! by the traffic driver binary and the integration tests.

use crate::domain::error::{ParkingError, Result};
use crate::domain::types::{sign, GateId, LevelId, Plate};
use crate::io::surface::{ControlSurface, Lpr};
use std::time::{Duration, Instant};
use tracing::debug;

/// How the driver interprets the entrance sign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignReading {
    Level(LevelId),
    Full,
    Rejected,
    Other(u8),
}

impl From<u8> for SignReading {
    fn from(display: u8) -> Self {
        match display {
            sign::FULL => SignReading::Full,
            sign::REJECTED => SignReading::Rejected,
            c => LevelId::from_sign_char(c).map(SignReading::Level).unwrap_or(SignReading::Other(c)),
        }
    }
}

/// Put a plate in front of an LPR once the previous read has been consumed
pub fn present_plate(lpr: &Lpr, plate: Plate, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    lpr.wait_for(Some(deadline), |slot| {
        if slot.is_some() {
            return None;
        }
        *slot = Some(plate);
        Some(())
    })
    .ok_or(ParkingError::RendezvousTimeout { what: "free plate reader", waited: timeout })
}

/// Block until `gate` has completed more than `after` cycles
pub fn wait_gate_cycle(surface: &ControlSurface, gate: GateId, after: u64, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    surface
        .gate(gate)
        .wait_for(Some(deadline), |slot| {
            if slot.cycles_completed > after {
                Some(Ok(()))
            } else if slot.evacuate {
                Some(Err(ParkingError::Evacuating))
            } else if surface.is_shutdown() {
                Some(Err(ParkingError::ShuttingDown))
            } else {
                None
            }
        })
        .unwrap_or(Err(ParkingError::RendezvousTimeout { what: "gate cycle", waited: timeout }))
}

/// Drive up to an entrance and read the sign
///
/// For an assigned level, also waits until the gate has cycled (the car has
/// driven through).
pub fn enter(surface: &ControlSurface, entrance: usize, plate: Plate, timeout: Duration) -> Result<SignReading> {
    let station = surface.entrance(entrance);
    if station.gate.lock().evacuate {
        return Err(ParkingError::Evacuating);
    }
    let updates_before = station.sign.get().updates;
    let cycles_before = station.gate.lock().cycles_completed;

    present_plate(&station.lpr, plate, timeout)?;

    let deadline = Instant::now() + timeout;
    let shown = station
        .sign
        .wait_for(Some(deadline), |slot| (slot.updates > updates_before).then_some(slot.display))
        .ok_or(ParkingError::RendezvousTimeout { what: "entrance sign", waited: timeout })?;
    let reading = SignReading::from(shown);
    debug!(entrance = entrance, plate = %plate, sign = %char::from(shown), "sign_read");

    if let SignReading::Level(_) = reading {
        wait_gate_cycle(surface, GateId::Entrance(entrance), cycles_before, timeout)?;
    }
    Ok(reading)
}

/// Drive past a level's LPR (arriving at a bay, or leaving it)
pub fn pass_level(surface: &ControlSurface, level: LevelId, plate: Plate, timeout: Duration) -> Result<()> {
    present_plate(&surface.level(level).lpr, plate, timeout)
}

/// Drive up to an exit and wait for the gate to let the car out
///
/// During an evacuation the gate is already open and `Evacuating` is returned
/// without a plate read.
pub fn leave(surface: &ControlSurface, exit: usize, plate: Plate, timeout: Duration) -> Result<()> {
    let station = surface.exit(exit);
    let cycles_before = {
        let slot = station.gate.lock();
        // Held open: drive straight out
        if slot.evacuate {
            return Err(ParkingError::Evacuating);
        }
        slot.cycles_completed
    };
    present_plate(&station.lpr, plate, timeout)?;
    wait_gate_cycle(surface, GateId::Exit(exit), cycles_before, timeout)
}
