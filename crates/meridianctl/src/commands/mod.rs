//! Command implementations.

pub mod reset;
pub mod status;
pub mod ts;
