//! A single place to re-export the tracing ecosystem so every crate in this
//! workspace logs through the same version and feature set.
pub use tracing;
