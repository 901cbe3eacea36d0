//! Domain logic for the siphon dispatcher: configuration, capacity
//! policy, and the rate statistic. Pure types with zero internal
//! dependencies so they can be shared by the engine and the seams.

pub mod capacity;
pub mod config;
pub mod error;
pub mod rate;
