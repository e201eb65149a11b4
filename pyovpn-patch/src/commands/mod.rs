//! Command implementations

pub mod egg;
pub mod patch;
