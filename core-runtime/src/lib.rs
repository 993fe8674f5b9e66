//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the backup engine:
//! - Logging and tracing initialisation
//! - Configuration loading, building and validation
//!
//! ## Overview
//!
//! This crate holds the ambient concerns shared by the service façade and
//! host binaries. It has no knowledge of the sync engine itself; the service
//! crate translates [`config::BackupConfig`] into engine settings.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
