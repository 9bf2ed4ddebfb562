//! Discrete-time simulator of a delay-tolerant drone network that carries
//! sensed events back to a depot.

pub mod common;
pub mod simulation;
