//! Registry of live subscriptions keyed by source identifier.
//!
//! One registry is created at startup and passed to whatever drives it. All
//! mutations go through one `parking_lot` mutex, so a source identifier maps
//! to at most one live subscription at any time. Changes are broadcast to
//! observers over a `tokio` broadcast channel.

use std::{collections::BTreeMap, mem::take, sync::Arc};

use {
    parking_lot::Mutex,
    tokio::{
        runtime::Handle,
        sync::broadcast::{Receiver, Sender, channel},
    },
    tracing::{debug, info},
};

use crate::{
    error::domain::WatchError,
    watch::{
        config::{RateLimitPolicy, WatchConfig, WatchDefaults, WatcherOptions},
        sink::EventSink,
        source::{NativeWatchSource, NotifySource},
        subscription::{Subscription, SubscriptionSnapshot},
    },
};

/// Registry change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A subscription was registered and is active.
    Registered(SubscriptionSnapshot),
    /// A subscription was unregistered; carries its pre-stop snapshot.
    Unregistered(SubscriptionSnapshot),
    /// A subscription was suspended.
    Suspended(SubscriptionSnapshot),
    /// A subscription was resumed.
    Resumed(SubscriptionSnapshot),
    /// Every subscription was stopped; carries how many there were.
    StoppedAll(usize),
}

/// Mapping from source identifier to live subscription.
pub struct WatchRegistry {
    /// Live subscriptions, ordered by identifier.
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
    /// Consumer shared by every subscription.
    sink: Arc<dyn EventSink>,
    /// Runtime for rate limiter timers.
    runtime: Handle,
    /// Broadcast channel for registry change notifications.
    events_tx: Sender<RegistryEvent>,
}

impl WatchRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `sink` - Consumer of every subscription's deliveries and faults.
    /// * `runtime` - Runtime the rate limiter timers are spawned on.
    ///
    /// # Returns
    ///
    /// A new `WatchRegistry`.
    pub fn new(sink: Arc<dyn EventSink>, runtime: Handle) -> Self {
        let (events_tx, _) = channel(64);

        Self {
            subscriptions: Mutex::new(BTreeMap::new()),
            sink,
            runtime,
            events_tx,
        }
    }

    /// Creates an empty registry whose timers run on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::RuntimeUnavailable` if called outside a tokio runtime.
    pub fn with_current_runtime(sink: Arc<dyn EventSink>) -> Result<Self, WatchError> {
        let runtime = Handle::try_current().map_err(|_| WatchError::RuntimeUnavailable)?;
        Ok(Self::new(sink, runtime))
    }

    /// Registers and starts a subscription on the given native source.
    ///
    /// # Arguments
    ///
    /// * `source_identifier` - Unique identifier for the subscription.
    /// * `config` - What to watch.
    /// * `policy` - How to rate limit deliveries.
    /// * `source` - Native watch source the subscription takes ownership of.
    ///
    /// # Returns
    ///
    /// The snapshot of the new, active subscription.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::DuplicateIdentifier` if the identifier is taken;
    /// the existing subscription is untouched. Returns the source's error if
    /// it cannot be started.
    pub fn register<S>(
        &self,
        source_identifier: impl Into<String>,
        config: WatchConfig,
        policy: RateLimitPolicy,
        source: S,
    ) -> Result<SubscriptionSnapshot, WatchError>
    where
        S: NativeWatchSource + 'static,
    {
        let source_identifier = source_identifier.into();
        let mut subscriptions = self.subscriptions.lock();

        if let Some(existing) = subscriptions.get(&source_identifier) {
            return Err(WatchError::DuplicateIdentifier {
                source_identifier,
                path: existing.config().path().to_path_buf(),
            });
        }

        let subscription = Subscription::start(
            source_identifier.clone(),
            config,
            policy,
            Box::new(source),
            self.sink.clone(),
            self.runtime.clone(),
        )?;
        let snapshot = subscription.snapshot();
        subscriptions.insert(source_identifier, subscription);
        drop(subscriptions);

        let _ = self
            .events_tx
            .send(RegistryEvent::Registered(snapshot.clone()));
        Ok(snapshot)
    }

    /// Registers a subscription backed by the platform file system watcher.
    ///
    /// The path is made absolute before registering, so snapshots report
    /// where the watch really points.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::InvalidPath` if the path does not exist, plus
    /// everything `register` returns.
    pub fn register_notify(
        &self,
        source_identifier: impl Into<String>,
        config: WatchConfig,
        policy: RateLimitPolicy,
    ) -> Result<SubscriptionSnapshot, WatchError> {
        let config = config.resolved()?;
        self.register(source_identifier, config, policy, NotifySource::new())
    }

    /// Registers a file system watcher described by declarative options.
    ///
    /// # Arguments
    ///
    /// * `options` - Watcher description, typically read from settings.
    /// * `defaults` - Filter and mask used where `options` leaves them unset.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::InvalidOptions` if the options are inconsistent,
    /// plus everything `register_notify` returns.
    pub fn register_options(
        &self,
        options: &WatcherOptions,
        defaults: &WatchDefaults,
    ) -> Result<SubscriptionSnapshot, WatchError> {
        let (source_identifier, config, policy) = options.resolve(defaults)?;
        self.register_notify(source_identifier, config, policy)
    }

    /// Removes and stops a subscription.
    ///
    /// # Returns
    ///
    /// The snapshot taken before the subscription was stopped.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::NotFound` if no subscription uses the identifier,
    /// including when it was already unregistered.
    pub fn unregister(&self, source_identifier: &str) -> Result<SubscriptionSnapshot, WatchError> {
        let mut subscriptions = self.subscriptions.lock();
        let mut subscription = subscriptions
            .remove(source_identifier)
            .ok_or_else(|| WatchError::not_found(source_identifier))?;
        let snapshot = subscription.stop();
        drop(subscriptions);

        let _ = self
            .events_tx
            .send(RegistryEvent::Unregistered(snapshot.clone()));
        Ok(snapshot)
    }

    /// Suspends a subscription.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::NotFound` if no subscription uses the identifier,
    /// or the source's error if it cannot be disabled.
    pub fn suspend(&self, source_identifier: &str) -> Result<SubscriptionSnapshot, WatchError> {
        let snapshot = self.with_subscription(source_identifier, Subscription::suspend)?;
        let _ = self
            .events_tx
            .send(RegistryEvent::Suspended(snapshot.clone()));
        Ok(snapshot)
    }

    /// Resumes a suspended subscription.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::NotFound` if no subscription uses the identifier,
    /// or the source's error if it cannot be re-enabled.
    pub fn resume(&self, source_identifier: &str) -> Result<SubscriptionSnapshot, WatchError> {
        let snapshot = self.with_subscription(source_identifier, Subscription::resume)?;
        let _ = self
            .events_tx
            .send(RegistryEvent::Resumed(snapshot.clone()));
        Ok(snapshot)
    }

    /// Snapshot of one subscription, if registered.
    pub fn get(&self, source_identifier: &str) -> Option<SubscriptionSnapshot> {
        self.subscriptions
            .lock()
            .get(source_identifier)
            .map(Subscription::snapshot)
    }

    /// Snapshots of every subscription, ordered by source identifier.
    pub fn list(&self) -> Vec<SubscriptionSnapshot> {
        self.subscriptions
            .lock()
            .values()
            .map(Subscription::snapshot)
            .collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Whether no subscription is registered.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    /// Stops every subscription and clears the registry.
    ///
    /// Safe to call on an empty registry and while deliveries are in flight;
    /// deliveries for the stopped subscriptions are discarded.
    ///
    /// # Returns
    ///
    /// How many subscriptions were stopped.
    pub fn stop_all(&self) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let stopped = take(&mut *subscriptions);
        let count = stopped.len();
        for (source_identifier, mut subscription) in stopped {
            debug!("Stopping '{}'", source_identifier);
            subscription.stop();
        }
        drop(subscriptions);

        if count > 0 {
            info!("Stopped {} watcher(s)", count);
        }
        let _ = self.events_tx.send(RegistryEvent::StoppedAll(count));
        count
    }

    /// Subscribes to registry change notifications.
    ///
    /// # Returns
    ///
    /// A broadcast receiver for registry events.
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        self.events_tx.subscribe()
    }

    fn with_subscription<F>(
        &self,
        source_identifier: &str,
        transition: F,
    ) -> Result<SubscriptionSnapshot, WatchError>
    where
        F: FnOnce(&mut Subscription) -> Result<SubscriptionSnapshot, WatchError>,
    {
        let mut subscriptions = self.subscriptions.lock();
        let subscription = subscriptions
            .get_mut(source_identifier)
            .ok_or_else(|| WatchError::not_found(source_identifier))?;
        transition(subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::{OpenOptions, write},
        io::Write,
        path::Path,
        sync::Arc,
        time::Duration,
    };

    use {
        tempfile::TempDir,
        tokio::{
            runtime::Handle,
            time::{Instant, sleep},
        },
    };

    use crate::{
        error::domain::WatchError,
        state::lifecycle::Lifecycle,
        watch::{
            config::{NotifyFilters, RateLimitPolicy, WatchConfig, WatchDefaults, WatcherOptions},
            registry::{RegistryEvent, WatchRegistry},
            source::{ManualSource, ManualSourceHandle},
            testing::RecordingSink,
        },
    };

    fn registry() -> (WatchRegistry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (WatchRegistry::new(sink.clone(), Handle::current()), sink)
    }

    fn register_manual(
        registry: &WatchRegistry,
        source_identifier: &str,
        path: &str,
        policy: RateLimitPolicy,
    ) -> Result<ManualSourceHandle, WatchError> {
        let (source, handle) = ManualSource::new();
        registry.register(source_identifier, WatchConfig::new(path), policy, source)?;
        Ok(handle)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_duplicate_identifier_leaves_original_untouched() {
        let (registry, sink) = registry();
        let original = register_manual(&registry, "w1", "/tmp/d", RateLimitPolicy::None).unwrap();

        let error = register_manual(&registry, "w1", "/tmp/other", RateLimitPolicy::None)
            .unwrap_err();
        assert!(matches!(
            &error,
            WatchError::DuplicateIdentifier { path, .. } if path.to_str() == Some("/tmp/d")
        ));

        let list = registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path.to_str(), Some("/tmp/d"));
        assert!(list[0].enable_raising_events);

        assert!(original.changed("/tmp/d/a"));
        assert_eq!(sink.deliveries().len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_unregister_twice_reports_not_found() {
        let (registry, _) = registry();
        let handle = register_manual(&registry, "w1", "/tmp/d", RateLimitPolicy::None).unwrap();

        let snapshot = registry.unregister("w1").unwrap();
        assert_eq!(snapshot.source_identifier, "w1");
        assert!(snapshot.enable_raising_events);
        assert!(handle.is_disposed());

        assert!(registry.unregister("w1").unwrap_err().is_not_found());
        assert!(registry.suspend("w1").unwrap_err().is_not_found());
        assert!(registry.resume("w1").unwrap_err().is_not_found());
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_identifier_is_reusable_after_unregister() {
        let (registry, _) = registry();
        register_manual(&registry, "w1", "/tmp/d", RateLimitPolicy::None).unwrap();
        registry.unregister("w1").unwrap();

        register_manual(&registry, "w1", "/tmp/e", RateLimitPolicy::None).unwrap();
        assert_eq!(registry.get("w1").unwrap().path.to_str(), Some("/tmp/e"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_suspend_then_resume() {
        let (registry, sink) = registry();
        let handle = register_manual(&registry, "w1", "/tmp/d", RateLimitPolicy::None).unwrap();

        let suspended = registry.suspend("w1").unwrap();
        assert!(!suspended.enable_raising_events);
        assert_eq!(suspended.state, Lifecycle::Suspended);

        handle.changed("/tmp/d/a");
        handle.created("/tmp/d/b");
        assert!(sink.deliveries().is_empty());

        let resumed = registry.resume("w1").unwrap();
        assert!(resumed.enable_raising_events);

        handle.changed("/tmp/d/c");
        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].event.representative().name(), Some("c"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_late_timer_after_unregister_is_dropped() {
        let (registry, sink) = registry();
        let handle =
            register_manual(&registry, "w1", "/tmp/d", RateLimitPolicy::throttle_ms(50)).unwrap();

        handle.changed("/tmp/d/a");
        handle.changed("/tmp/d/b");
        registry.unregister("w1").unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(sink.deliveries().is_empty());
        assert!(!handle.changed("/tmp/d/c"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_list_is_ordered_and_stop_all_clears() {
        let (registry, _) = registry();
        assert_eq!(registry.stop_all(), 0);

        let handles: Vec<_> = ["w3", "w1", "w2"]
            .into_iter()
            .map(|id| register_manual(&registry, id, "/tmp/d", RateLimitPolicy::None).unwrap())
            .collect();

        let ids: Vec<_> = registry
            .list()
            .into_iter()
            .map(|snapshot| snapshot.source_identifier)
            .collect();
        assert_eq!(ids, vec!["w1", "w2", "w3"]);

        assert_eq!(registry.stop_all(), 3);
        assert!(registry.is_empty());
        assert!(handles.iter().all(ManualSourceHandle::is_disposed));
        assert_eq!(registry.stop_all(), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_broadcasts_changes() {
        let (registry, _) = registry();
        let mut events = registry.subscribe();

        register_manual(&registry, "w1", "/tmp/d", RateLimitPolicy::None).unwrap();
        registry.suspend("w1").unwrap();
        registry.unregister("w1").unwrap();
        registry.stop_all();

        assert!(matches!(events.recv().await, Ok(RegistryEvent::Registered(_))));
        assert!(matches!(events.recv().await, Ok(RegistryEvent::Suspended(_))));
        assert!(matches!(
            events.recv().await,
            Ok(RegistryEvent::Unregistered(snapshot)) if snapshot.state == Lifecycle::Suspended
        ));
        assert_eq!(events.recv().await.ok(), Some(RegistryEvent::StoppedAll(0)));
    }

    #[test]
    fn test_with_current_runtime_requires_runtime() {
        let sink = Arc::new(RecordingSink::default());
        assert!(matches!(
            WatchRegistry::with_current_runtime(sink),
            Err(WatchError::RuntimeUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_register_options_validates_path() {
        let sink = Arc::new(RecordingSink::default());
        let registry = WatchRegistry::with_current_runtime(sink).unwrap();
        let temp_dir = TempDir::new().unwrap();

        let missing = WatcherOptions::new("w1", temp_dir.path().join("missing"));
        assert!(matches!(
            registry.register_options(&missing, &WatchDefaults::default()),
            Err(WatchError::InvalidPath { .. })
        ));

        let options = WatcherOptions::new("w1", temp_dir.path());
        let snapshot = registry
            .register_options(&options, &WatchDefaults::default())
            .unwrap();
        assert!(snapshot.path.is_absolute());
        assert_eq!(snapshot.notify_filter, NotifyFilters::default());
        assert_eq!(registry.stop_all(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_throttled_writes_to_two_files_collapse() {
        let temp_dir = TempDir::new().unwrap();
        let file_a = temp_dir.path().join("a.txt");
        let file_b = temp_dir.path().join("b.txt");
        write(&file_a, "").unwrap();
        write(&file_b, "").unwrap();

        let (registry, sink) = registry();
        registry
            .register_notify(
                "w1",
                WatchConfig::new(temp_dir.path()).with_notify_filter(NotifyFilters::LAST_WRITE),
                RateLimitPolicy::throttle_ms(50),
            )
            .unwrap();

        let append = |path: &Path| {
            let mut file = OpenOptions::new().append(true).open(path).unwrap();
            file.write_all(b"x").unwrap();
        };
        let start = Instant::now();
        append(&file_a);
        append(&file_b);

        sleep(Duration::from_millis(300)).await;

        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 1);
        let event = &deliveries[0].event;
        assert_eq!(event.len(), 2);
        assert_eq!(
            event.representative().full_path().and_then(|p| p.file_name()),
            file_a.file_name()
        );
        let elapsed = deliveries[0].at - start;
        assert!(elapsed >= Duration::from_millis(50) && elapsed < Duration::from_millis(150));

        registry.stop_all();
    }
}
