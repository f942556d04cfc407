//! Core types for headcni
//!
//! # Modules
//!
//! - `config`: environment file loading and path override variables
//! - `document`: dynamic JSON documents with typed accessors
//! - `error`: Error types and Result alias
//! - `netconf`: the meta-plugin's network configuration

pub mod config;
pub mod document;
pub mod error;
pub mod netconf;

// Re-exports
pub use document::Document;
pub use error::{Error, Result};
pub use netconf::{is_self_step, DefaultPaths, NetworkConfig, SELF_STEP_TYPES};
