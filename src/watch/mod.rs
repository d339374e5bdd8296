//! File system watch delivery pipeline.
//!
//! Native watch sources raise raw change callbacks. Each subscription turns
//! them into deliveries through its rate limiter and hands them to an event
//! sink. The registry keeps subscriptions unique by source identifier.

pub mod config;
pub mod events;
pub mod rate_limiter;
pub mod registry;
pub mod sink;
pub mod source;
pub mod subscription;

pub use {
    config::{NotifyFilters, RateLimitPolicy, WatchConfig, WatchDefaults, WatcherOptions},
    events::{
        AggregatedChangeEvent, ChangeType, DeliveredEvent, FaultKind, FileChange, NativeFault,
        RawChangeEvent,
    },
    rate_limiter::RateLimiter,
    registry::{RegistryEvent, WatchRegistry},
    sink::{ChannelSink, EventSink, SinkMessage},
    source::{ManualSource, ManualSourceHandle, NativeWatchSource, NotifySource, WatchCallbacks},
    subscription::{Subscription, SubscriptionSnapshot},
};
