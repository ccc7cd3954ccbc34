//! Domain layer: channel records, sync cursors, errors.

pub mod entities;
pub mod errors;
