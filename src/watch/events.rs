//! File system change events, raw and aggregated.

use std::{
    path::{Path, PathBuf},
    slice::from_ref,
};

use {
    notify::{Error as NotifyError, ErrorKind},
    serde::Serialize,
    thiserror::Error,
};

/// Kind of change reported by a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeType {
    /// A file or directory was created.
    Created,
    /// A file or directory was deleted.
    Deleted,
    /// Contents or metadata changed.
    Changed,
    /// A file or directory was renamed.
    Renamed,
    /// The native watcher reported an error.
    Fault,
}

/// Path information shared by every file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    /// Full path of the affected entry.
    pub full_path: PathBuf,
    /// Base name of the affected entry.
    pub name: String,
}

impl FileChange {
    /// Creates a change for `full_path`, deriving the base name from it.
    pub fn new(full_path: impl Into<PathBuf>) -> Self {
        let full_path = full_path.into();
        let name = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| full_path.to_string_lossy().into_owned());

        Self { full_path, name }
    }
}

/// Category of a native watcher fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultKind {
    /// The OS event queue overflowed; notifications were dropped.
    Overflow,
    /// The watched path disappeared.
    PathNotFound,
    /// The OS no longer knows the watch.
    WatchNotFound,
    /// The OS limit on watches was reached.
    MaxFilesWatch,
    /// The watcher was configured with values the backend rejects.
    InvalidConfig,
    /// An IO error inside the backend.
    Io,
    /// Anything else.
    Generic,
}

/// Error raised by a native watch source.
///
/// Faults are informational: they signal that notifications may have been
/// lost. They travel to the fault sink as data and never change the state
/// of the subscription that raised them.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind:?}: {message}")]
pub struct NativeFault {
    /// Fault category.
    pub kind: FaultKind,
    /// Backend description of the fault.
    pub message: String,
    /// Paths the backend associated with the fault, if any.
    pub paths: Vec<PathBuf>,
}

impl NativeFault {
    /// Creates a new fault.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            paths: Vec::new(),
        }
    }

    /// Creates an overflow fault for a rescan request from the backend.
    pub fn overflow(paths: Vec<PathBuf>) -> Self {
        Self {
            kind: FaultKind::Overflow,
            message: "Too many changes at once; some notifications were dropped".to_string(),
            paths,
        }
    }
}

impl From<&NotifyError> for NativeFault {
    fn from(error: &NotifyError) -> Self {
        let kind = match &error.kind {
            ErrorKind::Generic(_) => FaultKind::Generic,
            ErrorKind::Io(_) => FaultKind::Io,
            ErrorKind::PathNotFound => FaultKind::PathNotFound,
            ErrorKind::WatchNotFound => FaultKind::WatchNotFound,
            ErrorKind::InvalidConfig(_) => FaultKind::InvalidConfig,
            ErrorKind::MaxFilesWatch => FaultKind::MaxFilesWatch,
            #[allow(unreachable_patterns)]
            _ => FaultKind::Generic,
        };

        Self {
            kind,
            message: error.to_string(),
            paths: error.paths.clone(),
        }
    }
}

/// One unprocessed change notification from a native watch source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChangeEvent {
    /// An entry was created.
    Created(FileChange),
    /// An entry changed.
    Changed(FileChange),
    /// An entry was deleted.
    Deleted(FileChange),
    /// An entry was renamed from `old` to `change`.
    Renamed {
        /// New location.
        change: FileChange,
        /// Previous location.
        old: FileChange,
    },
    /// The native watcher of `source_identifier` failed.
    Fault {
        /// Subscription whose watcher failed.
        source_identifier: String,
        /// What went wrong.
        cause: NativeFault,
    },
}

impl RawChangeEvent {
    /// Kind of change.
    #[must_use]
    pub fn change_type(&self) -> ChangeType {
        match self {
            Self::Created(_) => ChangeType::Created,
            Self::Changed(_) => ChangeType::Changed,
            Self::Deleted(_) => ChangeType::Deleted,
            Self::Renamed { .. } => ChangeType::Renamed,
            Self::Fault { .. } => ChangeType::Fault,
        }
    }

    /// Path information, absent for faults.
    #[must_use]
    pub fn file_change(&self) -> Option<&FileChange> {
        match self {
            Self::Created(change)
            | Self::Changed(change)
            | Self::Deleted(change)
            | Self::Renamed { change, .. } => Some(change),
            Self::Fault { .. } => None,
        }
    }

    /// Full path of the affected entry, absent for faults.
    #[must_use]
    pub fn full_path(&self) -> Option<&Path> {
        self.file_change().map(|change| change.full_path.as_path())
    }

    /// Base name of the affected entry, absent for faults.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.file_change().map(|change| change.name.as_str())
    }

    /// Previous location for renames.
    #[must_use]
    pub fn old(&self) -> Option<&FileChange> {
        match self {
            Self::Renamed { old, .. } => Some(old),
            _ => None,
        }
    }

    /// Whether this event reports a native watcher fault.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }
}

/// All raw events observed in one rate limiter window.
///
/// The representative is always the first event of the window; later
/// events do not change it, whatever their kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedChangeEvent {
    /// Arrival-ordered members; never empty.
    members: Vec<RawChangeEvent>,
}

impl AggregatedChangeEvent {
    /// Wraps a closed window. Returns `None` for an empty batch.
    #[must_use]
    pub fn from_batch(members: Vec<RawChangeEvent>) -> Option<Self> {
        if members.is_empty() {
            None
        } else {
            Some(Self { members })
        }
    }

    /// The first event observed in the window.
    #[must_use]
    pub fn representative(&self) -> &RawChangeEvent {
        &self.members[0]
    }

    /// Every event observed in the window, in arrival order.
    #[must_use]
    pub fn members(&self) -> &[RawChangeEvent] {
        &self.members
    }

    /// Number of member events (at least 1).
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always `false`; provided for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Converts into the delivered shape: a single-member window is
    /// delivered as the bare event rather than a wrapper.
    #[must_use]
    pub fn into_delivered(mut self) -> DeliveredEvent {
        if self.members.len() == 1 {
            DeliveredEvent::Single(self.members.remove(0))
        } else {
            DeliveredEvent::Aggregated(self)
        }
    }
}

/// Unit handed to a sink once per closed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveredEvent {
    /// Exactly one raw event.
    Single(RawChangeEvent),
    /// Two or more raw events collapsed by the rate limiter.
    Aggregated(AggregatedChangeEvent),
}

impl DeliveredEvent {
    /// The event that stands for the whole delivery.
    #[must_use]
    pub fn representative(&self) -> &RawChangeEvent {
        match self {
            Self::Single(event) => event,
            Self::Aggregated(aggregate) => aggregate.representative(),
        }
    }

    /// Every raw event in the delivery, in arrival order.
    #[must_use]
    pub fn members(&self) -> &[RawChangeEvent] {
        match self {
            Self::Single(event) => from_ref(event),
            Self::Aggregated(aggregate) => aggregate.members(),
        }
    }

    /// Number of raw events in the delivery.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members().len()
    }

    /// Always `false`; a delivery carries at least one event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    /// Whether the rate limiter collapsed several events into this delivery.
    #[must_use]
    pub fn is_aggregated(&self) -> bool {
        matches!(self, Self::Aggregated(_))
    }
}
