//! User preferences
//!
//! Stored as indented JSON with PascalCase keys:
//!
//! ```json
//! {
//!   "TelemetryUpdateFrequency": 20,
//!   "PortNumber": 7125
//! }
//! ```
//!
//! A missing or unreadable file is replaced with defaults, so the rest of the
//! relay only ever sees valid preferences.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::SamplingFrequency;
use crate::{RelayError, Result};

/// Preference file name
pub const PREFERENCES_FILE: &str = "userPreferences.json";

/// Directory name used under the platform application-data folder
pub const APP_DIR: &str = "pitwall-relay";

pub const DEFAULT_PORT: u16 = 7125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Preferences {
    /// On-track sampling rate in Hz
    pub telemetry_update_frequency: u32,
    pub port_number: u16,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            telemetry_update_frequency: SamplingFrequency::DEFAULT.hz(),
            port_number: DEFAULT_PORT,
        }
    }
}

impl Preferences {
    /// On-track sampling frequency, clamped to what the simulator supports
    pub fn sampling_frequency(&self) -> SamplingFrequency {
        SamplingFrequency::new(self.telemetry_update_frequency)
    }

    /// Bring out-of-range values back into range. Returns whether anything changed.
    fn normalize(&mut self) -> bool {
        let clamped = self.sampling_frequency().hz();
        let mut changed = false;
        if clamped != self.telemetry_update_frequency {
            warn!(
                requested = self.telemetry_update_frequency,
                using = clamped,
                "TelemetryUpdateFrequency out of range"
            );
            self.telemetry_update_frequency = clamped;
            changed = true;
        }
        if self.port_number == 0 {
            warn!("PortNumber 0 is not usable, using {}", DEFAULT_PORT);
            self.port_number = DEFAULT_PORT;
            changed = true;
        }
        changed
    }
}

/// Loads and saves [`Preferences`] at a fixed path
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location
    ///
    /// `%APPDATA%/pitwall-relay/userPreferences.json` when `APPDATA` is set,
    /// otherwise `userPreferences.json` in the working directory.
    pub fn at_default_location() -> Self {
        Self::new(default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load preferences, writing defaults when the file is missing or unusable.
    pub fn load(&self) -> Result<Preferences> {
        if !self.path.exists() {
            info!("Preferences file not found, creating {}", self.path.display());
            return self.reset();
        }

        info!("Loading preferences from {}", self.path.display());
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| RelayError::file_error(self.path.clone(), e));
        let parsed = text.and_then(|text| {
            serde_json::from_str::<Preferences>(&text).map_err(|e| {
                RelayError::parse_error(self.path.display().to_string(), e.to_string())
            })
        });

        match parsed {
            Ok(mut preferences) => {
                if preferences.normalize() {
                    self.save(&preferences)?;
                }
                Ok(preferences)
            }
            Err(e) => {
                warn!(error = %e, "Error loading preferences, using defaults");
                self.reset()
            }
        }
    }

    /// Write preferences as indented JSON, creating the directory if needed.
    pub fn save(&self, preferences: &Preferences) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| RelayError::file_error(dir.to_path_buf(), e))?;
        }
        let json = serde_json::to_string_pretty(preferences)?;
        std::fs::write(&self.path, json).map_err(|e| RelayError::file_error(self.path.clone(), e))
    }

    fn reset(&self) -> Result<Preferences> {
        let defaults = Preferences::default();
        self.save(&defaults)?;
        Ok(defaults)
    }
}

/// Directory the relay keeps its files in
///
/// `%APPDATA%/pitwall-relay` when `APPDATA` is set, otherwise the working
/// directory (returned as an empty relative path).
pub fn app_data_dir() -> PathBuf {
    app_data_dir_from(std::env::var_os("APPDATA"))
}

fn app_data_dir_from(app_data: Option<std::ffi::OsString>) -> PathBuf {
    match app_data {
        Some(app_data) if !app_data.is_empty() => PathBuf::from(app_data).join(APP_DIR),
        _ => PathBuf::new(),
    }
}

fn default_path() -> PathBuf {
    app_data_dir().join(PREFERENCES_FILE)
}
