//! Daemon settings and their on-disk location.
//!
//! Settings follow the XDG Base Directory layout and declare the watchers
//! registered at start-up.

pub mod settings;

pub use settings::{SettingsError, SettingsManager, WatcherSettings, get_config_path};
