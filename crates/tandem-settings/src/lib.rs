//! # tandem-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`TandemSettings::default()`])
//! 2. **User file** `~/.tandem/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `TANDEM_*` overrides
//!
//! ```no_run
//! let settings = tandem_settings::load_settings().unwrap_or_default();
//! println!("database: {}", settings.resolved_database_path().display());
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{expand_home, TandemSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_under_tandem_home() {
        assert!(settings_path().ends_with(".tandem/settings.json"));
    }
}
