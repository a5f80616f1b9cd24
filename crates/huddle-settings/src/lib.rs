//! # huddle-settings
//!
//! Configuration with layered sources for the Huddle hub and client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HuddleSettings::default()`]
//! 2. **User file**: `~/.huddle/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HUDDLE_*` overrides (highest priority)
//!
//! Command-line flags in the `huddle` binary are applied on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, huddle_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<HuddleSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.huddle/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static HuddleSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: HuddleSettings) -> std::result::Result<(), HuddleSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = HuddleSettings::default();
        assert!(settings_path().ends_with(".huddle/settings.json"));
    }
}
