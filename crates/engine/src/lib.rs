//! The clusterdump collection engine.
//!
//! - `topology` derives the machine/unit mapping from the status document
//! - `fanout` runs commands across targets with bounded parallelism
//! - `addon` loads and executes the pluggable addon definitions
//! - `snapshot` is the control-plane seam (status queries, local snapshots)
//! - `collector` drives the whole run and produces the final bundle

pub mod addon;
pub mod collector;
pub mod fanout;
pub mod snapshot;
pub mod topology;

pub use addon::{AddonEngine, DEFAULT_ADDONS, ELEVATED_DEFAULT_ADDONS, extend_with_elevated_defaults, load_addons, select_enabled};
pub use collector::{Collector, CollectorConfig};
pub use fanout::{DEFAULT_POOL_WIDTH, FanOut, FanOutReport, FanOutTask, TargetOutcome, TaskCommand};
pub use snapshot::{CliControlPlane, ControlPlane};
pub use topology::{Topology, resolve, targets};
