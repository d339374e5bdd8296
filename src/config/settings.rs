//! Settings management with XDG Base Directory compliance.
//!
//! Settings are a JSON document holding logging and output preferences, the
//! defaults applied to watchers, and the watchers themselves.

use std::{
    env::var,
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::{Path, PathBuf},
};

use {
    parking_lot::{RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

use crate::watch::config::{MATCH_ALL_FILTER, NotifyFilters, WatchDefaults, WatcherOptions};

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write settings file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize settings.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// Serializable daemon settings with default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Change-kind mask for watchers that do not set one.
    pub default_notify_filter: NotifyFilters,
    /// Name filter for watchers that do not set one.
    pub default_filter: String,
    /// Whether event records are pretty-printed.
    pub pretty_json: bool,
    /// Watchers registered at start-up.
    pub watchers: Vec<WatcherOptions>,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            default_notify_filter: NotifyFilters::default(),
            default_filter: MATCH_ALL_FILTER.to_string(),
            pretty_json: false,
            watchers: Vec::new(),
        }
    }
}

impl WatcherSettings {
    /// Defaults applied to watchers that leave fields unset.
    pub fn watch_defaults(&self) -> WatchDefaults {
        WatchDefaults {
            filter: self.default_filter.clone(),
            notify_filter: self.default_notify_filter,
        }
    }

    /// Checks that declared watchers have unique, non-empty identifiers.
    ///
    /// Paths are not checked here; a missing path only disables its watcher.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` describing the first problem.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut seen = Vec::with_capacity(self.watchers.len());
        for watcher in &self.watchers {
            let id = watcher.source_identifier.as_str();
            if id.trim().is_empty() {
                return Err(SettingsError::InvalidValue {
                    reason: format!("watcher for {:?} has no source_identifier", watcher.path),
                });
            }
            if seen.contains(&id) {
                return Err(SettingsError::InvalidValue {
                    reason: format!("source_identifier '{id}' is declared twice"),
                });
            }
            seen.push(id);
        }
        Ok(())
    }
}

/// Handles loading, saving, and validation of settings.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe settings storage.
    settings: RwLock<WatcherSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
}

impl SettingsManager {
    /// Creates a new settings manager with the default config path.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Creates a new settings manager with a custom config path.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Path of the settings file; defaults are used if it
    ///   does not exist yet.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `SettingsManager` or a `SettingsError`.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the file exists but cannot be read or
    /// parsed, or declares invalid watchers.
    pub fn with_config_path(config_path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let config_path = config_path.as_ref().to_path_buf();
        if let Some(parent) = config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)?;
        }

        let settings: WatcherSettings = if config_path.exists() {
            debug!("Loading settings from existing file: {:?}", config_path);
            let contents = read_to_string(&config_path)?;
            from_str(&contents)?
        } else {
            debug!("No settings file at {:?}, using defaults", config_path);
            WatcherSettings::default()
        };
        settings.validate()?;

        Ok(SettingsManager {
            settings: RwLock::new(settings),
            config_path,
        })
    }

    /// Gets the current settings.
    pub fn get_settings(&self) -> RwLockReadGuard<'_, WatcherSettings> {
        self.settings.read()
    }

    /// Gets the configuration file path.
    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    /// Replaces the settings and saves them to disk.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the new settings are invalid or cannot be
    /// saved; invalid settings are not applied.
    pub fn update_settings(&self, new_settings: WatcherSettings) -> Result<(), SettingsError> {
        new_settings.validate()?;
        *self.settings.write() = new_settings;
        self.save_settings()
    }

    fn save_settings(&self) -> Result<(), SettingsError> {
        debug!("Saving settings to file: {:?}", self.config_path);
        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Ensures proper XDG directory usage for the settings file.
///
/// # Returns
///
/// The path to the configuration file.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push("fswatcher");
    config_dir.push("settings.json");
    config_dir
}

/// Gets the XDG config home directory.
///
/// Uses `XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
fn get_xdg_config_home() -> PathBuf {
    if let Ok(config_home) = var("XDG_CONFIG_HOME")
        && !config_home.is_empty()
    {
        return PathBuf::from(config_home);
    }

    if let Ok(home) = var("HOME") {
        let mut path = PathBuf::from(home);
        path.push(".config");
        return path;
    }

    PathBuf::from(".")
}
