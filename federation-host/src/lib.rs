//! Federation host library
//!
//! This module exports the configuration and wiring of the host for the
//! binary and for testing purposes.

pub mod config;
pub mod host;
pub mod logging;
