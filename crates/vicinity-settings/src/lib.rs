//! # vicinity-settings
//!
//! Layered configuration for the vicinity server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VicinitySettings::default()`]
//! 2. **Settings file**: `~/.vicinity/settings.json` or an explicit path
//! 3. **Environment variables**: `VICINITY_*` overrides
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    resolve_path, settings_path, vicinity_dir,
};
pub use types::*;
