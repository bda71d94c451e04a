//! IO modules - the boundary with hardware and files
//!
//! - `surface` - Typed control surface (LPRs, gates, signs, temperatures, alarm)
//! - `whitelist` - Whitelist file reader
//! - `ledger` - Append-only revenue ledger
//! - `status` - JSONL status snapshots for an external display
//! - `vehicle` - Driver side of the rendezvous protocol

pub mod ledger;
pub mod status;
pub mod surface;
pub mod vehicle;
pub mod whitelist;

pub use ledger::RevenueLedger;
pub use status::{FacilitySnapshot, StatusWriter};
pub use surface::{ControlSurface, Phase};
pub use whitelist::load_whitelist;
