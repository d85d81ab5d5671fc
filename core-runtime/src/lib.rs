//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the offline cache core:
//! - Logging and tracing infrastructure
//! - Configuration management and capability wiring
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its logging conventions and
//! for the typed events it publishes (lifecycle transitions, fetch outcomes,
//! preload results).

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
