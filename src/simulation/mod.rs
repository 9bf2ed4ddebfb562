//! Simulation core.
//!
//! ## Module Organization
//!
//! - `types`: packets, events, delivery feedback and simulation errors
//! - `geometry`: points, interpolation, dead reckoning and grid cells
//! - `signal_calculations`: per-link channel models
//! - `drone`: drone state, buffering, mobility and the depot
//! - `network`: the time-delayed broadcast medium
//! - `routing`: neighbour tables and pluggable relay strategies
//! - `mac`: depot upload scheduling
//! - `metrics`: counters and the end-of-run report
//! - `simulator`: RNG streams and the tick loop

pub mod drone;
pub mod geometry;
pub mod mac;
pub mod metrics;
pub mod network;
pub mod routing;
pub mod signal_calculations;
pub mod simulator;
pub mod types;

pub use geometry::Point;
pub use metrics::MetricsReport;
pub use simulator::{Simulator, Snapshot, SnapshotObserver};
pub use types::SimulationError;
