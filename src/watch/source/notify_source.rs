//! OS-backed watch source built on the `notify` crate.
//!
//! This source owns one `RecommendedWatcher`, translates its events into
//! raw change events according to the subscription's change-kind mask, and
//! applies the wildcard name filter before raising callbacks.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    notify::{
        Config, Error as NotifyError, ErrorKind, Event, RecommendedWatcher, RecursiveMode,
        Watcher,
        event::{CreateKind, EventKind, MetadataKind, ModifyKind, RemoveKind, RenameMode},
    },
    parking_lot::RwLock,
    regex::{Regex, RegexBuilder, escape},
    tracing::{debug, trace},
};

use crate::{
    error::domain::WatchError,
    watch::{
        config::{MATCH_ALL_FILTER, NotifyFilters, WatchConfig},
        events::{FileChange, NativeFault, RawChangeEvent},
        source::{NativeWatchSource, WatchCallbacks},
    },
};

/// Wildcard filter applied to entry names.
///
/// `*` matches any run of characters and `?` matches one character.
/// `""`, `*` and `*.*` match every name.
#[derive(Debug, Clone)]
pub struct NameFilter {
    /// Compiled pattern, or `None` when every name matches.
    regex: Option<Regex>,
}

impl NameFilter {
    /// Compiles a wildcard pattern.
    ///
    /// # Errors
    ///
    /// Returns `WatchError::InvalidOptions` if the pattern cannot be compiled.
    pub fn new(pattern: &str) -> Result<Self, WatchError> {
        if pattern.is_empty() || pattern == MATCH_ALL_FILTER || pattern == "*.*" {
            return Ok(Self { regex: None });
        }

        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        translated.push('$');

        let regex = RegexBuilder::new(&translated)
            .case_insensitive(cfg!(windows))
            .build()
            .map_err(|e| {
                WatchError::invalid_options(format!("Invalid filter '{pattern}': {e}"))
            })?;

        Ok(Self { regex: Some(regex) })
    }

    /// Whether `name` passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.as_ref().is_none_or(|regex| regex.is_match(name))
    }

    /// Whether a raw event passes the filter. Renames pass if either name does.
    pub fn accepts(&self, event: &RawChangeEvent) -> bool {
        match event {
            RawChangeEvent::Renamed { change, old } => {
                self.matches(&change.name) || self.matches(&old.name)
            }
            RawChangeEvent::Fault { .. } => true,
            other => other.name().is_none_or(|name| self.matches(name)),
        }
    }
}

/// Routing state shared with the notify callback thread.
struct Router {
    callbacks: RwLock<Option<WatchCallbacks>>,
    raising: AtomicBool,
}

impl Router {
    fn route(
        &self,
        result: Result<Event, NotifyError>,
        filter: &NameFilter,
        notify_filter: NotifyFilters,
    ) {
        if !self.raising.load(Ordering::Acquire) {
            return;
        }

        // Clone the handles so no lock is held while callbacks run.
        let Some(callbacks) = self.callbacks.read().clone() else {
            return;
        };

        match result {
            Ok(event) => {
                trace!("Raw file system event: {:?}", event);

                if event.need_rescan() {
                    (callbacks.on_error)(NativeFault::overflow(event.paths.clone()));
                }

                for raw in classify(&event, notify_filter) {
                    if filter.accepts(&raw) {
                        callbacks.raise(raw);
                    } else {
                        trace!("Filtered out {:?}", raw.full_path());
                    }
                }
            }
            Err(e) => (callbacks.on_error)(NativeFault::from(&e)),
        }
    }
}

/// Watch source backed by the platform's recommended `notify` watcher.
pub struct NotifySource {
    /// Live watcher; `None` before `configure` and after `dispose`.
    watcher: Option<RecommendedWatcher>,
    /// Shared with the watcher's event handler.
    router: Arc<Router>,
    /// Resolved path being watched.
    path: Option<PathBuf>,
    /// Recursion mode derived from the configuration.
    mode: RecursiveMode,
    /// Whether the OS watch is currently armed.
    armed: bool,
}

impl Default for NotifySource {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifySource {
    /// Creates an unconfigured source.
    pub fn new() -> Self {
        Self {
            watcher: None,
            router: Arc::new(Router {
                callbacks: RwLock::new(None),
                raising: AtomicBool::new(false),
            }),
            path: None,
            mode: RecursiveMode::NonRecursive,
            armed: false,
        }
    }

    /// Resolved path being watched, once configured.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl NativeWatchSource for NotifySource {
    fn configure(&mut self, config: &WatchConfig) -> Result<(), WatchError> {
        let resolved = config.resolved()?;
        let filter = NameFilter::new(resolved.filter())?;
        let notify_filter = resolved.notify_filter();

        let router = self.router.clone();
        let watcher = RecommendedWatcher::new(
            move |result: Result<Event, NotifyError>| {
                router.route(result, &filter, notify_filter);
            },
            Config::default(),
        )?;

        self.mode = if resolved.include_subdirectories() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.path = Some(resolved.path().to_path_buf());
        self.watcher = Some(watcher);

        debug!("Configured watcher for {:?}", resolved.path());
        Ok(())
    }

    fn subscribe(&mut self, callbacks: WatchCallbacks) {
        *self.router.callbacks.write() = Some(callbacks);
    }

    fn unsubscribe(&mut self) {
        *self.router.callbacks.write() = None;
    }

    fn enable(&mut self) -> Result<(), WatchError> {
        let (Some(watcher), Some(path)) = (self.watcher.as_mut(), self.path.as_ref()) else {
            return Err(WatchError::invalid_options(
                "watch source must be configured before it is enabled",
            ));
        };

        if !self.armed {
            watcher.watch(path, self.mode)?;
            self.armed = true;
            debug!("Started watching {:?}", path);
        }

        self.router.raising.store(true, Ordering::Release);
        Ok(())
    }

    fn disable(&mut self) -> Result<(), WatchError> {
        self.router.raising.store(false, Ordering::Release);

        if let (true, Some(watcher), Some(path)) =
            (self.armed, self.watcher.as_mut(), self.path.as_ref())
        {
            self.armed = false;
            match watcher.unwatch(path) {
                Ok(()) => debug!("Stopped watching {:?}", path),
                // The OS already dropped the watch, e.g. because the path vanished.
                Err(e) if matches!(e.kind, ErrorKind::WatchNotFound) => {
                    debug!("Watch for {:?} was already gone", path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.router.raising.load(Ordering::Acquire)
    }

    fn dispose(&mut self) {
        if let Err(e) = self.disable() {
            debug!("Ignoring error while disposing watcher: {}", e);
        }
        self.unsubscribe();
        self.watcher = None;
    }
}

/// Translates one notify event into raw change events allowed by `mask`.
pub(crate) fn classify(event: &Event, mask: NotifyFilters) -> Vec<RawChangeEvent> {
    let each = |build: fn(FileChange) -> RawChangeEvent| -> Vec<RawChangeEvent> {
        event
            .paths
            .iter()
            .map(|path| build(FileChange::new(path.clone())))
            .collect()
    };

    match event.kind {
        EventKind::Create(kind) if mask.intersects(create_filters(kind)) => {
            each(RawChangeEvent::Created)
        }
        EventKind::Remove(kind) if mask.intersects(remove_filters(kind)) => {
            each(RawChangeEvent::Deleted)
        }
        EventKind::Modify(ModifyKind::Data(_))
            if mask.intersects(NotifyFilters::LAST_WRITE | NotifyFilters::SIZE) =>
        {
            each(RawChangeEvent::Changed)
        }
        EventKind::Modify(ModifyKind::Metadata(kind)) if mask.intersects(metadata_filters(kind)) => {
            each(RawChangeEvent::Changed)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both))
            if mask.intersects(name_filters()) =>
        {
            match event.paths.as_slice() {
                [from, to] => vec![RawChangeEvent::Renamed {
                    change: FileChange::new(to.clone()),
                    old: FileChange::new(from.clone()),
                }],
                _ => Vec::new(),
            }
        }
        // Backends that cannot pair rename halves report them as `Any`.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any))
            if mask.intersects(name_filters()) =>
        {
            each(RawChangeEvent::Changed)
        }
        EventKind::Modify(ModifyKind::Any | ModifyKind::Other)
            if mask.contains(NotifyFilters::LAST_WRITE) =>
        {
            each(RawChangeEvent::Changed)
        }
        _ => Vec::new(),
    }
}

fn name_filters() -> NotifyFilters {
    NotifyFilters::FILE_NAME | NotifyFilters::DIRECTORY_NAME
}

fn create_filters(kind: CreateKind) -> NotifyFilters {
    match kind {
        CreateKind::File => NotifyFilters::FILE_NAME,
        CreateKind::Folder => NotifyFilters::DIRECTORY_NAME,
        _ => name_filters(),
    }
}

fn remove_filters(kind: RemoveKind) -> NotifyFilters {
    match kind {
        RemoveKind::File => NotifyFilters::FILE_NAME,
        RemoveKind::Folder => NotifyFilters::DIRECTORY_NAME,
        _ => name_filters(),
    }
}

fn metadata_filters(kind: MetadataKind) -> NotifyFilters {
    match kind {
        MetadataKind::AccessTime => NotifyFilters::LAST_ACCESS,
        MetadataKind::WriteTime => NotifyFilters::LAST_WRITE,
        MetadataKind::Permissions | MetadataKind::Ownership => {
            NotifyFilters::SECURITY | NotifyFilters::ATTRIBUTES
        }
        _ => NotifyFilters::ATTRIBUTES,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::write,
        path::PathBuf,
        sync::{Arc, mpsc::channel},
        time::Duration,
    };

    use {
        notify::{
            Event,
            event::{
                AccessKind, CreateKind, DataChange, EventKind, MetadataKind, ModifyKind,
                RemoveKind, RenameMode,
            },
        },
        parking_lot::Mutex,
        tempfile::TempDir,
    };

    use crate::{
        error::domain::WatchError,
        watch::{
            config::{NotifyFilters, WatchConfig},
            events::{ChangeType, FileChange, NativeFault, RawChangeEvent},
            source::{
                NativeWatchSource, WatchCallbacks,
                notify_source::{NameFilter, NotifySource, classify},
            },
        },
    };

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    fn kinds(events: &[RawChangeEvent]) -> Vec<ChangeType> {
        events.iter().map(RawChangeEvent::change_type).collect()
    }

    #[test]
    fn test_name_filter_wildcards() {
        let test_cases = vec![
            ("*", "anything.txt", true),
            ("*.*", "noext", true),
            ("", "noext", true),
            ("*.jpg", "photo.jpg", true),
            ("*.jpg", "test.txt", false),
            ("test?.txt", "test1.txt", true),
            ("test?.txt", "test12.txt", false),
            ("a+b.txt", "a+b.txt", true),
            ("a+b.txt", "aab.txt", false),
        ];

        for (pattern, name, expected) in test_cases {
            let filter = NameFilter::new(pattern).unwrap();
            assert_eq!(
                filter.matches(name),
                expected,
                "Failed for pattern {pattern} and name {name}"
            );
        }
    }

    #[test]
    fn test_name_filter_accepts_renames_by_either_name() {
        let filter = NameFilter::new("*.txt").unwrap();
        let renamed = RawChangeEvent::Renamed {
            change: FileChange::new("/d/a.bak"),
            old: FileChange::new("/d/a.txt"),
        };
        assert!(filter.accepts(&renamed));
        assert!(!filter.accepts(&RawChangeEvent::Changed(FileChange::new("/d/a.bak"))));
    }

    #[test]
    fn test_classify_last_write_only_reports_data_changes() {
        let mask = NotifyFilters::LAST_WRITE;

        let created = event(EventKind::Create(CreateKind::File), &["/d/a.txt"]);
        assert!(classify(&created, mask).is_empty());

        let written = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/d/a.txt"],
        );
        assert_eq!(kinds(&classify(&written, mask)), vec![ChangeType::Changed]);

        let removed = event(EventKind::Remove(RemoveKind::File), &["/d/a.txt"]);
        assert!(classify(&removed, mask).is_empty());
    }

    #[test]
    fn test_classify_respects_file_and_directory_names() {
        let files_only = NotifyFilters::FILE_NAME;

        let file = event(EventKind::Create(CreateKind::File), &["/d/a.txt"]);
        assert_eq!(kinds(&classify(&file, files_only)), vec![ChangeType::Created]);

        let folder = event(EventKind::Create(CreateKind::Folder), &["/d/sub"]);
        assert!(classify(&folder, files_only).is_empty());
        assert_eq!(
            kinds(&classify(&folder, NotifyFilters::DIRECTORY_NAME)),
            vec![ChangeType::Created]
        );

        let unknown = event(EventKind::Remove(RemoveKind::Any), &["/d/x"]);
        assert_eq!(kinds(&classify(&unknown, files_only)), vec![ChangeType::Deleted]);
    }

    #[test]
    fn test_classify_pairs_renames() {
        let renamed = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/old.txt", "/d/new.txt"],
        );
        let raw = classify(&renamed, NotifyFilters::default());

        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].name(), Some("new.txt"));
        assert_eq!(raw[0].old().map(|old| old.name.as_str()), Some("old.txt"));

        let half = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/d/old.txt"],
        );
        assert!(classify(&half, NotifyFilters::default()).is_empty());
    }

    #[test]
    fn test_classify_metadata_mapping() {
        let access = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
            &["/d/a"],
        );
        assert!(classify(&access, NotifyFilters::LAST_WRITE).is_empty());
        assert_eq!(classify(&access, NotifyFilters::LAST_ACCESS).len(), 1);

        let permissions = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/d/a"],
        );
        assert_eq!(classify(&permissions, NotifyFilters::SECURITY).len(), 1);
        assert_eq!(classify(&permissions, NotifyFilters::ATTRIBUTES).len(), 1);

        let opened = event(EventKind::Access(AccessKind::Any), &["/d/a"]);
        assert!(classify(&opened, NotifyFilters::all()).is_empty());
    }

    #[test]
    fn test_configure_rejects_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = NotifySource::new();

        let result = source.configure(&WatchConfig::new(temp_dir.path().join("missing")));
        assert!(matches!(result, Err(WatchError::InvalidPath { .. })));
    }

    #[test]
    fn test_enable_requires_configure() {
        let mut source = NotifySource::new();
        assert!(source.enable().is_err());
        assert!(!source.is_enabled());
    }

    #[test]
    fn test_raises_changed_for_written_file() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = channel::<RawChangeEvent>();
        let tx = Arc::new(Mutex::new(tx));

        let forward = |build: fn(FileChange) -> RawChangeEvent| {
            let tx = tx.clone();
            Arc::new(move |change: FileChange| {
                let _ = tx.lock().send(build(change));
            })
        };
        let callbacks = WatchCallbacks {
            on_changed: forward(RawChangeEvent::Changed),
            on_created: forward(RawChangeEvent::Created),
            on_deleted: forward(RawChangeEvent::Deleted),
            on_renamed: Arc::new(|_: (FileChange, FileChange)| {}),
            on_error: Arc::new(|_: NativeFault| {}),
        };

        let mut source = NotifySource::new();
        source
            .configure(
                &WatchConfig::new(temp_dir.path()).with_notify_filter(NotifyFilters::LAST_WRITE),
            )
            .unwrap();
        source.subscribe(callbacks);
        source.enable().unwrap();

        let file = temp_dir.path().join("test.txt");
        write(&file, "hello").unwrap();

        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received.change_type(), ChangeType::Changed);
        assert_eq!(received.name(), Some("test.txt"));

        source.disable().unwrap();
        assert!(!source.is_enabled());
        source.dispose();
        source.dispose();
    }
}
