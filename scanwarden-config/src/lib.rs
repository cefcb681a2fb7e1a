//! Configuration library for scanwarden.
//!
//! Loads the orchestrator tuning and the provider settings of the server
//! from a TOML or JSON document, resolved from the environment, well-known
//! file locations or built-in defaults, and checks the result against the
//! guard rails the orchestrator relies on.
#![allow(missing_docs)]

pub mod settings;
pub mod validation;

pub use settings::{
    LocalProviderSettings, ProviderSettings, ScanConfigSettings, Settings, SettingsSource,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
