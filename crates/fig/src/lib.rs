//! Fig - Client setting behaviors
//!
//! This crate ties the runtimes together:
//! - Display scripts via `fig_script`
//! - Dynamic and plugin verifications via `fig_verification`
//! - Layered configuration (`FigConfig`)
//! - Client files on disk (`ClientFile`)

// Re-export core crates
pub use fig_script;
pub use fig_types;
pub use fig_verification;

pub mod client_file;
pub mod config;
pub mod service;

pub use client_file::{ClientFile, LoadError};
pub use config::{ConfigError, FigConfig, LoopGuardSection};
pub use service::BehaviorService;
