//! duotrack Common Utilities
//!
//! Shared infrastructure for all duotrack crates:
//! - Error types, result aliases and numeric failure codes
//! - Clock and timestamp utilities for track synchronization
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
