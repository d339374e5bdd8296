//! Subscription state machine.
//!
//! A subscription binds one source identifier to one native watch source and
//! one rate limiter. It starts `Active`, may toggle between `Active` and
//! `Suspended`, and ends `Stopped`.
//!
//! Raw callbacks enter through `Ingress`, which is shared with the native
//! source's callback handles. Ingress serializes callbacks per subscription
//! and drops everything that arrives while the subscription is not active.

use std::{path::PathBuf, sync::Arc};

use {
    parking_lot::Mutex,
    serde::Serialize,
    tokio::runtime::Handle,
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::domain::WatchError,
    state::lifecycle::{Lifecycle, LifecycleCell},
    watch::{
        config::{NotifyFilters, RateLimitPolicy, WatchConfig},
        events::{FileChange, NativeFault, RawChangeEvent},
        rate_limiter::RateLimiter,
        sink::EventSink,
        source::{NativeWatchSource, WatchCallbacks},
    },
};

/// Point-in-time view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    /// Unique identifier of the subscription.
    pub source_identifier: String,
    /// Watched path.
    pub path: PathBuf,
    /// Wildcard name filter.
    pub filter: String,
    /// Change-kind mask.
    pub notify_filter: NotifyFilters,
    /// Whether subdirectories are watched.
    pub include_subdirectories: bool,
    /// `true` iff the subscription is active.
    pub enable_raising_events: bool,
    /// Lifecycle state when the snapshot was taken.
    pub state: Lifecycle,
}

/// Entry point for raw callbacks of one subscription.
struct Ingress {
    source_identifier: String,
    lifecycle: LifecycleCell,
    limiter: RateLimiter,
    sink: Arc<dyn EventSink>,
    /// Serializes callbacks that the native source raises concurrently.
    ingest: Mutex<()>,
}

impl Ingress {
    fn accept(&self, event: RawChangeEvent) {
        let _ingest = self.ingest.lock();
        if !self.lifecycle.is_active() {
            trace!(
                "Ignoring {:?} for '{}' while {}",
                event.change_type(),
                self.source_identifier,
                self.lifecycle.get()
            );
            return;
        }
        self.limiter.submit(event);
    }

    fn fault(&self, cause: NativeFault) {
        if self.lifecycle.is_stopped() {
            return;
        }
        warn!("Watcher '{}' reported: {}", self.source_identifier, cause);
        self.sink.deliver_fault(&self.source_identifier, cause);
    }

    fn callbacks(self: &Arc<Self>) -> WatchCallbacks {
        let on = |build: fn(FileChange) -> RawChangeEvent| {
            let ingress = self.clone();
            Arc::new(move |change: FileChange| ingress.accept(build(change)))
        };
        let renamed = self.clone();
        let failed = self.clone();

        WatchCallbacks {
            on_changed: on(RawChangeEvent::Changed),
            on_created: on(RawChangeEvent::Created),
            on_deleted: on(RawChangeEvent::Deleted),
            on_renamed: Arc::new(move |(change, old): (FileChange, FileChange)| {
                renamed.accept(RawChangeEvent::Renamed { change, old });
            }),
            on_error: Arc::new(move |cause: NativeFault| failed.fault(cause)),
        }
    }
}

/// Live binding between a source identifier, a watch configuration, a rate
/// limit policy and a native watch source.
pub struct Subscription {
    config: WatchConfig,
    policy: RateLimitPolicy,
    ingress: Arc<Ingress>,
    source: Box<dyn NativeWatchSource>,
}

impl Subscription {
    /// Configures `source`, wires its callbacks and enables raising.
    ///
    /// # Arguments
    ///
    /// * `source_identifier` - Unique identifier of the subscription.
    /// * `config` - What to watch.
    /// * `policy` - How to rate limit deliveries.
    /// * `source` - Native watch source the subscription takes ownership of.
    /// * `sink` - Consumer of deliveries and faults.
    /// * `runtime` - Runtime for rate limiter timers.
    ///
    /// # Returns
    ///
    /// An `Active` subscription.
    ///
    /// # Errors
    ///
    /// Returns `WatchError` if the source rejects the configuration or cannot
    /// be enabled. The source is disposed in that case.
    pub fn start(
        source_identifier: impl Into<String>,
        config: WatchConfig,
        policy: RateLimitPolicy,
        mut source: Box<dyn NativeWatchSource>,
        sink: Arc<dyn EventSink>,
        runtime: Handle,
    ) -> Result<Self, WatchError> {
        let source_identifier = source_identifier.into();
        let policy = policy.normalized();
        let lifecycle = LifecycleCell::new(Lifecycle::Active);

        let ingress = Arc::new(Ingress {
            limiter: RateLimiter::new(
                policy,
                source_identifier.clone(),
                lifecycle.clone(),
                sink.clone(),
                runtime,
            ),
            source_identifier,
            lifecycle,
            sink,
            ingest: Mutex::new(()),
        });

        if let Err(e) = source.configure(&config) {
            source.dispose();
            return Err(e);
        }
        source.subscribe(ingress.callbacks());
        if let Err(e) = source.enable() {
            source.unsubscribe();
            source.dispose();
            return Err(e);
        }

        info!(
            "Watching {:?} as '{}' ({:?})",
            config.path(),
            ingress.source_identifier,
            policy
        );

        Ok(Self {
            config,
            policy,
            ingress,
            source,
        })
    }

    /// Unique identifier of the subscription.
    pub fn source_identifier(&self) -> &str {
        &self.ingress.source_identifier
    }

    /// What the subscription watches.
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Effective rate limit policy.
    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        self.ingress.lifecycle.get()
    }

    /// Point-in-time view of the subscription.
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let state = self.state();
        SubscriptionSnapshot {
            source_identifier: self.ingress.source_identifier.clone(),
            path: self.config.path().to_path_buf(),
            filter: self.config.filter().to_string(),
            notify_filter: self.config.notify_filter(),
            include_subdirectories: self.config.include_subdirectories(),
            enable_raising_events: state == Lifecycle::Active,
            state,
        }
    }

    /// Stops raising deliveries while keeping the native source allocated.
    ///
    /// Suspending a suspended subscription changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::NotFound` if the subscription is stopped, or the
    /// source's error if it cannot be disabled; the subscription stays active
    /// in the latter case.
    pub fn suspend(&mut self) -> Result<SubscriptionSnapshot, WatchError> {
        let lifecycle = &self.ingress.lifecycle;
        if lifecycle.transition(Lifecycle::Active, Lifecycle::Suspended) {
            if let Err(e) = self.source.disable() {
                lifecycle.transition(Lifecycle::Suspended, Lifecycle::Active);
                return Err(e);
            }
            info!("Suspended '{}'", self.source_identifier());
        } else if lifecycle.is_stopped() {
            return Err(WatchError::not_found(self.source_identifier()));
        }

        Ok(self.snapshot())
    }

    /// Resumes raising deliveries.
    ///
    /// Resuming an active subscription changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::NotFound` if the subscription is stopped, or the
    /// source's error if it cannot be re-enabled; the subscription stays
    /// suspended in the latter case.
    pub fn resume(&mut self) -> Result<SubscriptionSnapshot, WatchError> {
        let lifecycle = &self.ingress.lifecycle;
        // Active before enabling, so events raised by `enable` itself are kept.
        if lifecycle.transition(Lifecycle::Suspended, Lifecycle::Active) {
            if let Err(e) = self.source.enable() {
                lifecycle.transition(Lifecycle::Active, Lifecycle::Suspended);
                return Err(e);
            }
            info!("Resumed '{}'", self.source_identifier());
        } else if lifecycle.is_stopped() {
            return Err(WatchError::not_found(self.source_identifier()));
        }

        Ok(self.snapshot())
    }

    /// Releases the native source. Terminal and idempotent.
    ///
    /// A rate limiter timer already expiring when this runs finds the
    /// subscription stopped and delivers nothing.
    ///
    /// # Returns
    ///
    /// The snapshot taken before stopping.
    pub fn stop(&mut self) -> SubscriptionSnapshot {
        let snapshot = self.snapshot();
        if self.ingress.lifecycle.stop() == Lifecycle::Stopped {
            return snapshot;
        }

        let dropped = self.ingress.limiter.cancel();
        if dropped > 0 {
            debug!(
                "Dropped {} buffered event(s) while stopping '{}'",
                dropped,
                self.source_identifier()
            );
        }

        if let Err(e) = self.source.disable() {
            warn!(
                "Failed to disable watcher '{}': {}",
                self.source_identifier(),
                e
            );
        }
        self.source.unsubscribe();
        self.source.dispose();

        info!("Stopped watching as '{}'", self.source_identifier());
        snapshot
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.ingress.lifecycle.is_stopped() {
            self.stop();
        }
    }
}
