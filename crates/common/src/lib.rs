#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Common types and utilities for the Taskflow orchestrator core.
//!
//! This crate provides the data model, error type, configuration loader,
//! and logging setup shared across `taskflow-core` and `taskflow-engine`.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;
