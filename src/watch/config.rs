//! Configuration for watch subscriptions.

use std::{
    path::{Path, PathBuf, absolute},
    time::Duration,
};

use {
    bitflags::bitflags,
    serde::{Deserialize, Serialize},
};

use crate::error::domain::WatchError;

bitflags! {
    /// Kinds of change a subscription listens for.
    ///
    /// Bit values follow the conventional Windows notify-filter layout so
    /// masks written by other tools keep their meaning.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct NotifyFilters: u32 {
        /// File names (create, delete, rename of files).
        const FILE_NAME = 1;
        /// Directory names (create, delete, rename of directories).
        const DIRECTORY_NAME = 1 << 1;
        /// Attributes.
        const ATTRIBUTES = 1 << 2;
        /// Size.
        const SIZE = 1 << 3;
        /// Last write time.
        const LAST_WRITE = 1 << 4;
        /// Last access time.
        const LAST_ACCESS = 1 << 5;
        /// Creation time.
        const CREATION_TIME = 1 << 6;
        /// Security descriptor or permissions.
        const SECURITY = 1 << 8;
    }
}

impl Default for NotifyFilters {
    fn default() -> Self {
        Self::LAST_WRITE | Self::FILE_NAME | Self::DIRECTORY_NAME
    }
}

/// Name filter that matches every entry.
pub const MATCH_ALL_FILTER: &str = "*";

/// What a subscription watches.
///
/// Fixed once the subscription is registered; changing it means
/// unregistering and registering again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// File or directory to watch.
    path: PathBuf,
    /// Wildcard applied to entry names.
    filter: String,
    /// Whether subdirectories are watched too.
    include_subdirectories: bool,
    /// Kinds of change to report.
    notify_filter: NotifyFilters,
}

impl WatchConfig {
    /// Creates a configuration for `path` with the default filter and mask.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: MATCH_ALL_FILTER.to_string(),
            include_subdirectories: false,
            notify_filter: NotifyFilters::default(),
        }
    }

    /// Sets the wildcard name filter. An empty filter matches everything.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = if filter.is_empty() {
            MATCH_ALL_FILTER.to_string()
        } else {
            filter
        };
        self
    }

    /// Sets whether subdirectories are watched.
    #[must_use]
    pub fn recursive(mut self, include_subdirectories: bool) -> Self {
        self.include_subdirectories = include_subdirectories;
        self
    }

    /// Sets the change-kind mask.
    #[must_use]
    pub fn with_notify_filter(mut self, notify_filter: NotifyFilters) -> Self {
        self.notify_filter = notify_filter;
        self
    }

    /// Watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wildcard name filter.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether subdirectories are watched.
    pub fn include_subdirectories(&self) -> bool {
        self.include_subdirectories
    }

    /// Change-kind mask.
    pub fn notify_filter(&self) -> NotifyFilters {
        self.notify_filter
    }

    /// Returns a copy whose path is absolute and known to exist.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::InvalidPath` if the path is neither an existing
    /// file nor an existing directory.
    pub fn resolved(&self) -> Result<Self, WatchError> {
        Ok(Self {
            path: resolve_path(&self.path)?,
            ..self.clone()
        })
    }
}

/// Makes `path` absolute against the working directory and checks it exists.
///
/// Wildcards are not expanded; they belong in the name filter.
///
/// # Errors
///
/// Returns `WatchError::InvalidPath` if the path is neither an existing
/// file nor an existing directory.
pub fn resolve_path(path: &Path) -> Result<PathBuf, WatchError> {
    let resolved = absolute(path)?;

    if resolved.is_file() || resolved.is_dir() {
        Ok(resolved)
    } else {
        Err(WatchError::InvalidPath {
            path: path.to_path_buf(),
        })
    }
}

/// Rate limiting applied to one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitPolicy {
    /// Deliver every event as it arrives.
    #[default]
    None,
    /// Collect events for a fixed window opened by the first arrival.
    Throttle(Duration),
    /// Deliver once no event has arrived for the window.
    Debounce(Duration),
}

impl RateLimitPolicy {
    /// Throttle policy with a window in milliseconds.
    #[must_use]
    pub fn throttle_ms(window_ms: u64) -> Self {
        Self::Throttle(Duration::from_millis(window_ms)).normalized()
    }

    /// Debounce policy with a window in milliseconds.
    #[must_use]
    pub fn debounce_ms(window_ms: u64) -> Self {
        Self::Debounce(Duration::from_millis(window_ms)).normalized()
    }

    /// Collapses zero-length windows into `None`.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Throttle(window) | Self::Debounce(window) if window.is_zero() => Self::None,
            other => other,
        }
    }

    /// Window length, if any.
    #[must_use]
    pub fn window(&self) -> Option<Duration> {
        match self.normalized() {
            Self::None => None,
            Self::Throttle(window) | Self::Debounce(window) => Some(window),
        }
    }
}

/// Defaults applied to options that leave a field unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDefaults {
    /// Name filter used when none is given.
    pub filter: String,
    /// Change-kind mask used when none is given.
    pub notify_filter: NotifyFilters,
}

impl Default for WatchDefaults {
    fn default() -> Self {
        Self {
            filter: MATCH_ALL_FILTER.to_string(),
            notify_filter: NotifyFilters::default(),
        }
    }
}

/// Declarative description of one watcher, as written in settings files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherOptions {
    /// Unique name of the subscription.
    pub source_identifier: String,
    /// File or directory to watch.
    pub path: PathBuf,
    /// Wildcard name filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Change-kind mask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_filter: Option<NotifyFilters>,
    /// Whether subdirectories are watched.
    #[serde(default)]
    pub include_subdirectories: bool,
    /// Throttle window in milliseconds (0 = off).
    #[serde(default)]
    pub throttle_ms: u64,
    /// Debounce window in milliseconds (0 = off).
    #[serde(default)]
    pub debounce_ms: u64,
}

impl WatcherOptions {
    /// Creates options for `path` with everything else left at defaults.
    pub fn new(source_identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            path: path.into(),
            filter: None,
            notify_filter: None,
            include_subdirectories: false,
            throttle_ms: 0,
            debounce_ms: 0,
        }
    }

    /// Selects the rate limit policy from the two window settings.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::InvalidOptions` if both windows are positive.
    pub fn rate_limit_policy(&self) -> Result<RateLimitPolicy, WatchError> {
        match (self.throttle_ms, self.debounce_ms) {
            (0, 0) => Ok(RateLimitPolicy::None),
            (throttle_ms, 0) => Ok(RateLimitPolicy::throttle_ms(throttle_ms)),
            (0, debounce_ms) => Ok(RateLimitPolicy::debounce_ms(debounce_ms)),
            (_, _) => Err(WatchError::invalid_options(format!(
                "'{}' sets both throttle_ms and debounce_ms; choose one",
                self.source_identifier
            ))),
        }
    }

    /// Builds the watch configuration, filling gaps from `defaults`.
    pub fn watch_config(&self, defaults: &WatchDefaults) -> WatchConfig {
        WatchConfig::new(self.path.clone())
            .with_filter(self.filter.clone().unwrap_or_else(|| defaults.filter.clone()))
            .with_notify_filter(self.notify_filter.unwrap_or(defaults.notify_filter))
            .recursive(self.include_subdirectories)
    }

    /// Validates the options and splits them into registration arguments.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::InvalidOptions` for an empty source identifier
    /// or when both rate limit windows are set.
    pub fn resolve(
        &self,
        defaults: &WatchDefaults,
    ) -> Result<(String, WatchConfig, RateLimitPolicy), WatchError> {
        if self.source_identifier.trim().is_empty() {
            return Err(WatchError::invalid_options(
                "source_identifier must not be empty",
            ));
        }

        Ok((
            self.source_identifier.clone(),
            self.watch_config(defaults),
            self.rate_limit_policy()?,
        ))
    }
}
