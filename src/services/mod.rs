//! Services - the actors and the bootstrap that wires them
//!
//! - `index` - Whitelist and occupancy index
//! - `gate` - Boom gate controller and the cycle request protocol
//! - `entrance` - Admission controller
//! - `level` - Level arrival controller
//! - `exit` - Exit controller
//! - `billing` - Billing queue and workers
//! - `fire` - Fire detection
//! - `evacuation` - Alarm takeover of gates and signs
//! - `facility` - Builds shared state and spawns every actor

pub mod billing;
pub mod entrance;
pub mod evacuation;
pub mod exit;
pub mod facility;
pub mod fire;
pub mod gate;
pub mod index;
pub mod level;

// Re-export commonly used types
pub use billing::{create_billing_pipeline, BillingQueue, BillingTask, BillingWorker};
pub use facility::Facility;
pub use gate::{GateController, GateTimings};
pub use index::OccupancyIndex;
