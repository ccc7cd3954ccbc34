//! Domain layer: error taxonomy and the shared sync status.

pub mod errors;
pub mod status;
