//! Application layer: persistence contracts and top-level errors.

pub mod error;
pub mod repos;
