//! Configuration module for the reeltide ingestion runner
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
