//! Shared state observed concurrently by subscriptions, callbacks and timers.

pub mod lifecycle;

pub use lifecycle::{Lifecycle, LifecycleCell};
