//! CLI command implementations.

pub mod address;
pub mod config;
pub mod interfaces;
pub mod parsers;
pub mod start;
