//! # sightline-settings
//!
//! Layered configuration: compiled defaults, then the JSON settings file,
//! then environment variables, then validation. Settings are loaded once by
//! the binary and passed into each component's constructor.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;
pub mod validate;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
pub use validate::validate;
