//! Core types: errors, configuration, bin colors.

pub mod bins;
pub mod config;
pub mod errors;
