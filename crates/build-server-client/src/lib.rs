//! Build Server Client
//!
//! REST implementation of [`remote_run_core::BuildServer`]: uploads patch
//! files, queues personal builds against the uploaded changelist and reads
//! build state.

pub mod client;
pub mod config;
pub mod error;

pub use client::RestBuildServer;
pub use config::ServerConfig;
pub use error::{ClientError, Result};
