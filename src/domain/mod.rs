//! Domain models - core types for the parking facility
//!
//! - `types` - Plates, level/gate ids, gate states, money
//! - `error` - Error taxonomy shared by all actors
//! - `ring` - Fixed-capacity ring buffer used by the fire detector

pub mod error;
pub mod ring;
pub mod types;

pub use error::{ParkingError, Result};
pub use types::{Cents, GateId, GateState, LevelId, ParkedCar, Plate};
