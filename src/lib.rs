//! fswatcher - Rate-limited file system watch delivery
//!
//! Turns bursty native file system notifications into a controlled stream of
//! delivered events. Each subscription has its own lifecycle (active,
//! suspended, stopped) and its own rate limiting policy (none, throttle,
//! debounce). Native watcher faults bypass rate limiting and reach the sink
//! immediately.

pub mod bridge;
pub mod config;
pub mod error;
pub mod state;
pub mod watch;

// Re-export key types for convenience
pub use {
    bridge::{EventRecord, FaultRecord, JsonLineWriter},
    config::{SettingsError, SettingsManager, WatcherSettings},
    error::WatchError,
    state::Lifecycle,
    watch::{
        AggregatedChangeEvent, ChangeType, ChannelSink, DeliveredEvent, EventSink, NativeFault,
        NativeWatchSource, NotifyFilters, RateLimitPolicy, RawChangeEvent, RegistryEvent,
        SubscriptionSnapshot, WatchConfig, WatchRegistry, WatcherOptions,
    },
};
