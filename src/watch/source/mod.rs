//! Native watch source capability.
//!
//! A native watch source is the OS-level primitive that raises raw change
//! callbacks for one path. Subscriptions consume it only through the
//! `NativeWatchSource` trait: configure once, wire a set of callback
//! handles, toggle raising, and dispose.

use std::sync::Arc;

use crate::{
    error::domain::WatchError,
    watch::{
        config::WatchConfig,
        events::{FileChange, NativeFault, RawChangeEvent},
    },
};

pub mod manual;
pub mod notify_source;

pub use {
    manual::{ManualSource, ManualSourceHandle},
    notify_source::{NameFilter, NotifySource},
};

/// Function handle invoked by a native source.
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Callback handles a subscription wires into its native source.
///
/// Handles may be invoked from any thread, concurrently with each other.
#[derive(Clone)]
pub struct WatchCallbacks {
    /// Contents or metadata of an entry changed.
    pub on_changed: Callback<FileChange>,
    /// An entry was created.
    pub on_created: Callback<FileChange>,
    /// An entry was deleted.
    pub on_deleted: Callback<FileChange>,
    /// An entry was renamed; carries `(new, old)`.
    pub on_renamed: Callback<(FileChange, FileChange)>,
    /// The source failed.
    pub on_error: Callback<NativeFault>,
}

impl WatchCallbacks {
    /// Routes a raw event to the matching handle.
    ///
    /// Fault events are routed to `on_error`; the identifier they carry is
    /// ignored because the receiving subscription supplies its own.
    pub fn raise(&self, event: RawChangeEvent) {
        match event {
            RawChangeEvent::Created(change) => (self.on_created)(change),
            RawChangeEvent::Changed(change) => (self.on_changed)(change),
            RawChangeEvent::Deleted(change) => (self.on_deleted)(change),
            RawChangeEvent::Renamed { change, old } => (self.on_renamed)((change, old)),
            RawChangeEvent::Fault { cause, .. } => (self.on_error)(cause),
        }
    }
}

/// OS-level primitive that raises raw change callbacks for a path.
///
/// Filtering by name, recursion and change kind is the source's job; the
/// subscription sees only what the source decides to raise.
pub trait NativeWatchSource: Send {
    /// Applies the watch configuration. Called once, before anything else.
    ///
    /// # Errors
    ///
    /// Returns `WatchError` if the configuration cannot be applied, for
    /// example because the path does not exist.
    fn configure(&mut self, config: &WatchConfig) -> Result<(), WatchError>;

    /// Wires callback handles, replacing any previously wired set.
    fn subscribe(&mut self, callbacks: WatchCallbacks);

    /// Unwires callback handles. No handle is invoked after this returns,
    /// except one already executing on another thread.
    fn unsubscribe(&mut self);

    /// Starts raising callbacks.
    ///
    /// # Errors
    ///
    /// Returns `WatchError` if the OS refuses to (re)arm the watch.
    fn enable(&mut self) -> Result<(), WatchError>;

    /// Stops raising callbacks. The source stays allocated.
    ///
    /// # Errors
    ///
    /// Returns `WatchError` if the OS watch cannot be released.
    fn disable(&mut self) -> Result<(), WatchError>;

    /// Whether the source is currently raising callbacks.
    fn is_enabled(&self) -> bool;

    /// Releases OS resources. Safe to call after `disable` and more than once.
    fn dispose(&mut self);
}
