//! Records exchanged with the NetViz telemetry sidecar.
//!
//! Event records flow out of the transfer engines, control commands flow in.
//! Both are single JSON objects tagged by their `event` field.

pub mod control;
pub mod events;

pub use control::ControlCommand;
pub use events::{EventRecord, TransferEvent};
