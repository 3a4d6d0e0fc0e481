//! Decoded event types.
//!
//! # Event Flow
//!
//! ```text
//! kernel read buffer
//!        │
//!        ▼
//!   decoder::decode  ──► DecodedBatch (events and per-record errors, in order)
//!        │
//!        ▼
//!   event channel / Dispatcher
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use dw_core::EventMask;
use smallvec::SmallVec;

use crate::classify;
use crate::error::WatchError;
use crate::session::WatchId;

/// Snapshot of the watch that produced an event, taken at decode time.
///
/// The snapshot stays valid after the watch is removed from the registry;
/// registry operations on [`path`](Self::path) then fail with `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchRef {
    /// Kernel watch id.
    pub id: WatchId,
    /// Normalized path of the watch.
    pub path: Utf8PathBuf,
    /// Interest mask the watch was started with.
    pub mask: EventMask,
}

/// One decoded kernel record.
///
/// # Examples
///
/// ```
/// use dw_watcher::{DecodedEvent, WatchId, WatchRef};
/// use dw_core::{EventMask, semantic};
/// use camino::Utf8PathBuf;
///
/// let event = DecodedEvent {
///     name: Some("logs".to_owned()),
///     path: Utf8PathBuf::from("/srv/data/logs"),
///     mask: EventMask::CREATED | EventMask::IS_DIR,
///     cookie: None,
///     watch: WatchRef {
///         id: WatchId::new(1),
///         path: Utf8PathBuf::from("/srv/data"),
///         mask: semantic::DIR_CREATED,
///     },
/// };
/// assert!(event.is_dir_created());
/// assert!(!event.is_file_created());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Name of the entry inside the watched directory, if the record has one.
    pub name: Option<String>,

    /// Full normalized path: the watch path joined with the name, or the
    /// watch path itself for events about the watched path.
    pub path: Utf8PathBuf,

    /// Raw primitive bits the kernel reported.
    pub mask: EventMask,

    /// Rename cookie pairing `MOVED_FROM` with `MOVED_TO`; `None` when zero.
    pub cookie: Option<u32>,

    /// The watch that produced the record.
    pub watch: WatchRef,
}

impl DecodedEvent {
    /// Returns the file name component of [`path`](Self::path).
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }

    /// Returns `true` if the subject is a directory.
    #[inline]
    #[must_use]
    pub const fn is_dir_event(&self) -> bool {
        classify::is_dir_event(self.mask)
    }

    /// Returns `true` if a directory was created or moved in.
    #[inline]
    #[must_use]
    pub const fn is_dir_created(&self) -> bool {
        classify::is_dir_created(self.mask)
    }

    /// Returns `true` if a directory was deleted or moved out.
    #[inline]
    #[must_use]
    pub const fn is_dir_removed(&self) -> bool {
        classify::is_dir_removed(self.mask)
    }

    /// Returns `true` if a directory was written, modified, or had its attributes changed.
    #[inline]
    #[must_use]
    pub const fn is_dir_changed(&self) -> bool {
        classify::is_dir_changed(self.mask)
    }

    /// Returns `true` if a file was created or moved in.
    #[inline]
    #[must_use]
    pub const fn is_file_created(&self) -> bool {
        classify::is_file_created(self.mask)
    }

    /// Returns `true` if a file was deleted or moved out.
    #[inline]
    #[must_use]
    pub const fn is_file_removed(&self) -> bool {
        classify::is_file_removed(self.mask)
    }

    /// Returns `true` if a file was written, modified, or had its attributes changed.
    #[inline]
    #[must_use]
    pub const fn is_file_changed(&self) -> bool {
        classify::is_file_changed(self.mask)
    }

    /// Returns `true` if this event reports the deletion of `root`.
    #[inline]
    #[must_use]
    pub fn is_root_deletion(&self, root: &Utf8Path) -> bool {
        classify::is_root_deletion(self.mask, &self.path, root)
    }

    /// Returns `true` if this event reports that `root` was moved.
    #[inline]
    #[must_use]
    pub fn is_root_moved(&self, root: &Utf8Path) -> bool {
        classify::is_root_moved(self.mask, &self.path, root)
    }

    /// Returns `true` if the kernel dropped the watch.
    #[inline]
    #[must_use]
    pub const fn is_ignored(&self) -> bool {
        classify::is_ignored(self.mask)
    }

    /// Returns `true` if the filesystem under the watch was unmounted.
    #[inline]
    #[must_use]
    pub const fn is_unmounted(&self) -> bool {
        classify::is_unmounted(self.mask)
    }
}

/// Everything decoded from one read, in buffer order.
///
/// Per-record failures sit next to the events they interrupted, so the read
/// loop can forward both without reordering.
///
/// # Memory Efficiency
///
/// Uses [`SmallVec`] with inline storage for up to 8 records, avoiding heap
/// allocation for the typical read.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    records: SmallVec<[Result<DecodedEvent, WatchError>; 8]>,
}

impl DecodedBatch {
    /// Creates an empty batch.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a decoded event.
    #[inline]
    pub fn push_event(&mut self, event: DecodedEvent) {
        self.records.push(Ok(event));
    }

    /// Appends a per-record error.
    #[inline]
    pub fn push_error(&mut self, error: WatchError) {
        self.records.push(Err(error));
    }

    /// Returns the number of records, events and errors together.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing was decoded.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the decoded events, skipping errors.
    pub fn events(&self) -> impl Iterator<Item = &DecodedEvent> {
        self.records.iter().filter_map(|record| record.as_ref().ok())
    }

    /// Iterates over the per-record errors, skipping events.
    pub fn errors(&self) -> impl Iterator<Item = &WatchError> {
        self.records.iter().filter_map(|record| record.as_ref().err())
    }

    /// Returns the number of decoded events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events().count()
    }
}

impl IntoIterator for DecodedBatch {
    type Item = Result<DecodedEvent, WatchError>;
    type IntoIter = smallvec::IntoIter<[Result<DecodedEvent, WatchError>; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, mask: EventMask) -> DecodedEvent {
        DecodedEvent {
            name: Utf8Path::new(path).file_name().map(str::to_owned),
            path: Utf8PathBuf::from(path),
            mask,
            cookie: None,
            watch: WatchRef {
                id: WatchId::new(1),
                path: Utf8PathBuf::from("/root"),
                mask: EventMask::all(),
            },
        }
    }

    #[test]
    fn test_batch_preserves_order() {
        let mut batch = DecodedBatch::new();
        batch.push_event(event("/root/a", EventMask::CREATED));
        batch.push_error(WatchError::UnknownHandle(WatchId::new(5)));
        batch.push_event(event("/root/b", EventMask::DELETED));

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.event_count(), 2);
        assert_eq!(batch.errors().count(), 1);

        let kinds: Vec<_> = batch
            .into_iter()
            .map(|record| record.map(|e| e.path.into_string()).map_err(|e| e.to_string()))
            .collect();
        assert_eq!(kinds[0], Ok("/root/a".to_owned()));
        assert!(kinds[1].is_err());
        assert_eq!(kinds[2], Ok("/root/b".to_owned()));
    }

    #[test]
    fn test_empty_batch() {
        let batch = DecodedBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.events().count(), 0);
    }

    #[test]
    fn test_event_classification_methods() {
        let created = event("/root/dir", EventMask::CREATED | EventMask::IS_DIR);
        assert!(created.is_dir_event());
        assert!(created.is_dir_created());
        assert!(!created.is_file_created());
        assert_eq!(created.file_name(), Some("dir"));

        let root_gone = event("/root", EventMask::SELF_DELETED);
        assert!(root_gone.is_root_deletion(Utf8Path::new("/root")));
        assert!(!root_gone.is_root_moved(Utf8Path::new("/root")));

        let dropped = event("/root", EventMask::IGNORED);
        assert!(dropped.is_ignored());
        assert!(!dropped.is_unmounted());
    }
}
