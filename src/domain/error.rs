//! Error taxonomy for the control engine
//!
//! Every variant is local to one actor: controllers log the error and return to
//! their idle wait. Only an alarm overrides state globally, and that is not an error.

use crate::domain::types::{GateId, GateState, LevelId, Plate};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ParkingError>;

#[derive(Debug, thiserror::Error)]
pub enum ParkingError {
    /// Plate is not on the whitelist (sign shows `X`)
    #[error("plate {0} is not on the whitelist")]
    RejectedPlate(Plate),

    /// No level has a free bay (sign shows `F`)
    #[error("facility is at capacity")]
    CapacityExceeded,

    /// Plate is already parked or in transit. Indicates a controller-ordering defect.
    #[error("plate {plate} is already recorded (level {level})")]
    DuplicateEntry { plate: Plate, level: LevelId },

    /// Plate has no parked record. Indicates a controller-ordering defect.
    #[error("plate {0} has no parked record")]
    NotFound(Plate),

    /// Could not grow an index bucket or queue
    #[error("allocation failed: {0}")]
    AllocationFailure(&'static str),

    /// Ledger file could not be opened or appended
    #[error("ledger write failed for {plate}: {source}")]
    LedgerWriteFailure {
        plate: Plate,
        #[source]
        source: std::io::Error,
    },

    /// A rendezvous partner did not respond in time
    #[error("rendezvous timed out after {waited:?} waiting for {what}")]
    RendezvousTimeout { what: &'static str, waited: Duration },

    /// Attempted gate transition outside the physical state machine
    #[error("illegal gate transition on {gate}: {from:?} -> {to:?}")]
    IllegalTransition { gate: GateId, from: GateState, to: GateState },

    /// Alarm is active; normal gate/sign ownership is suspended
    #[error("evacuation in progress")]
    Evacuating,

    #[error("shutting down")]
    ShuttingDown,
}

impl ParkingError {
    /// Errors that indicate a defect in actor ordering rather than a normal outcome
    pub fn is_ordering_defect(&self) -> bool {
        matches!(
            self,
            ParkingError::DuplicateEntry { .. }
                | ParkingError::NotFound(_)
                | ParkingError::IllegalTransition { .. }
        )
    }
}
