//! In-process watch source driven by explicit calls.
//!
//! `ManualSource` behaves like an OS watcher that never sees the disk: the
//! paired `ManualSourceHandle` raises events on demand. It is used to embed
//! the pipeline behind non-filesystem producers and to drive subscriptions
//! deterministically in tests and benchmarks.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::RwLock;

use crate::{
    error::domain::WatchError,
    watch::{
        config::WatchConfig,
        events::{FileChange, NativeFault, RawChangeEvent},
        source::{NativeWatchSource, WatchCallbacks},
    },
};

/// State shared between a source and its handles.
#[derive(Default)]
struct Shared {
    callbacks: RwLock<Option<WatchCallbacks>>,
    config: RwLock<Option<WatchConfig>>,
    enabled: AtomicBool,
    disposed: AtomicBool,
}

/// Watch source whose events are raised through a `ManualSourceHandle`.
pub struct ManualSource {
    shared: Arc<Shared>,
}

/// Raises events on the `ManualSource` it was created with.
///
/// Events raised while the source is disabled, unsubscribed or disposed
/// are dropped, as an OS watcher would drop them.
#[derive(Clone)]
pub struct ManualSourceHandle {
    shared: Arc<Shared>,
}

impl ManualSource {
    /// Creates a source and the handle that drives it.
    pub fn new() -> (Self, ManualSourceHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: shared.clone(),
            },
            ManualSourceHandle { shared },
        )
    }
}

impl NativeWatchSource for ManualSource {
    fn configure(&mut self, config: &WatchConfig) -> Result<(), WatchError> {
        *self.shared.config.write() = Some(config.clone());
        Ok(())
    }

    fn subscribe(&mut self, callbacks: WatchCallbacks) {
        *self.shared.callbacks.write() = Some(callbacks);
    }

    fn unsubscribe(&mut self) {
        *self.shared.callbacks.write() = None;
    }

    fn enable(&mut self) -> Result<(), WatchError> {
        if !self.shared.disposed.load(Ordering::Acquire) {
            self.shared.enabled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn disable(&mut self) -> Result<(), WatchError> {
        self.shared.enabled.store(false, Ordering::Release);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    fn dispose(&mut self) {
        self.shared.enabled.store(false, Ordering::Release);
        self.shared.disposed.store(true, Ordering::Release);
        *self.shared.callbacks.write() = None;
    }
}

impl Debug for ManualSourceHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ManualSourceHandle")
            .field("enabled", &self.is_enabled())
            .field("subscribed", &self.is_subscribed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ManualSourceHandle {
    /// Raises an arbitrary event. Returns whether a callback was invoked.
    pub fn raise(&self, event: RawChangeEvent) -> bool {
        if !self.shared.enabled.load(Ordering::Acquire) {
            return false;
        }

        // Clone the handles so no lock is held while callbacks run.
        let callbacks = self.shared.callbacks.read().clone();
        match callbacks {
            Some(callbacks) => {
                callbacks.raise(event);
                true
            }
            None => false,
        }
    }

    /// Raises a creation event for `path`.
    pub fn created(&self, path: impl Into<PathBuf>) -> bool {
        self.raise(RawChangeEvent::Created(FileChange::new(path)))
    }

    /// Raises a change event for `path`.
    pub fn changed(&self, path: impl Into<PathBuf>) -> bool {
        self.raise(RawChangeEvent::Changed(FileChange::new(path)))
    }

    /// Raises a deletion event for `path`.
    pub fn deleted(&self, path: impl Into<PathBuf>) -> bool {
        self.raise(RawChangeEvent::Deleted(FileChange::new(path)))
    }

    /// Raises a rename event from `old` to `new`.
    pub fn renamed(&self, old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> bool {
        self.raise(RawChangeEvent::Renamed {
            change: FileChange::new(new),
            old: FileChange::new(old),
        })
    }

    /// Raises a native fault.
    pub fn fault(&self, cause: NativeFault) -> bool {
        if !self.shared.enabled.load(Ordering::Acquire) {
            return false;
        }

        let callbacks = self.shared.callbacks.read().clone();
        match callbacks {
            Some(callbacks) => {
                (callbacks.on_error)(cause);
                true
            }
            None => false,
        }
    }

    /// Whether the source is raising.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Whether callbacks are wired.
    pub fn is_subscribed(&self) -> bool {
        self.shared.callbacks.read().is_some()
    }

    /// Whether the source has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Configuration the source was given, if any.
    pub fn config(&self) -> Option<WatchConfig> {
        self.shared.config.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use crate::watch::{
        config::WatchConfig,
        events::{FileChange, NativeFault},
        source::{ManualSource, NativeWatchSource, WatchCallbacks},
    };

    fn counting_callbacks(count: Arc<AtomicUsize>) -> WatchCallbacks {
        let bump = move || {
            count.fetch_add(1, Ordering::SeqCst);
        };
        let (a, b, c, d, e) = (
            bump.clone(),
            bump.clone(),
            bump.clone(),
            bump.clone(),
            bump,
        );

        WatchCallbacks {
            on_changed: Arc::new(move |_: FileChange| a()),
            on_created: Arc::new(move |_: FileChange| b()),
            on_deleted: Arc::new(move |_: FileChange| c()),
            on_renamed: Arc::new(move |_: (FileChange, FileChange)| d()),
            on_error: Arc::new(move |_: NativeFault| e()),
        }
    }

    #[test]
    fn test_events_require_enable_and_subscription() {
        let (mut source, handle) = ManualSource::new();
        let count = Arc::new(AtomicUsize::new(0));

        source.configure(&WatchConfig::new("/tmp/d")).unwrap();
        assert!(!handle.changed("/tmp/d/a"));

        source.subscribe(counting_callbacks(count.clone()));
        assert!(!handle.changed("/tmp/d/a"));

        source.enable().unwrap();
        assert!(handle.is_enabled());
        assert!(handle.changed("/tmp/d/a"));
        assert!(handle.renamed("/tmp/d/a", "/tmp/d/b"));
        assert!(handle.fault(NativeFault::overflow(vec![])));
        assert_eq!(count.load(Ordering::SeqCst), 3);

        source.disable().unwrap();
        assert!(!handle.deleted("/tmp/d/b"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dispose_unwires_and_blocks_enable() {
        let (mut source, handle) = ManualSource::new();
        source.subscribe(counting_callbacks(Arc::new(AtomicUsize::new(0))));
        source.enable().unwrap();

        source.dispose();
        assert!(handle.is_disposed());
        assert!(!handle.is_subscribed());

        source.enable().unwrap();
        assert!(!handle.is_enabled());
        assert!(!handle.created("/tmp/d/a"));

        // Dispose is idempotent.
        source.dispose();
    }

    #[test]
    fn test_handle_debug_shows_source_state() {
        let (mut source, handle) = ManualSource::new();
        source.enable().unwrap();

        let rendered = format!("{handle:?}");
        assert!(rendered.contains("enabled: true"));
        assert!(rendered.contains("subscribed: false"));
        assert!(rendered.contains("disposed: false"));
    }

    #[test]
    fn test_config_is_visible_through_handle() {
        let (mut source, handle) = ManualSource::new();
        assert!(handle.config().is_none());

        source
            .configure(&WatchConfig::new("/tmp/d").with_filter("*.txt"))
            .unwrap();
        assert_eq!(handle.config().unwrap().filter(), "*.txt");
    }
}
