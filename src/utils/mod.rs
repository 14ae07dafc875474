// src/utils/mod.rs
//! Common utilities: errors and configuration

pub mod config;
pub mod errors;
pub mod script_config;

pub use config::RuntimeConfig;
pub use errors::{Result, ScriptError};
pub use script_config::{ScriptConfig, ScriptDescriptor};
