//! # Core Runtime Module
//!
//! Provides the ambient runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management and bridge injection
//!
//! ## Overview
//!
//! Host applications build one [`CoreConfig`](config::CoreConfig) at process
//! start, call [`init_logging`](logging::init_logging) once, and hand the
//! configuration to `core_sync::SyncManager`.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, SyncSettings};
pub use error::{Error, Result};
