//! Domain layer: tick planning and the fatal error type.

pub mod errors;
pub mod plan;
