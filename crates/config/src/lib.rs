//! Configuration module for the media cache pre-warmer
//!
//! Handles loading configuration from TOML files, environment variable overrides
//! and validation of cross-field constraints.

pub mod config;

pub use config::*;
