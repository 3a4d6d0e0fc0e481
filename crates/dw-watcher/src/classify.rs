//! Semantic predicates over raw event masks.
//!
//! Predicates are combinatorial, not exclusive: a directory creation satisfies
//! both [`is_dir_created`] and [`is_dir_event`]. The `is_file_*` predicates
//! require that [`EventMask::IS_DIR`] is absent.

use camino::Utf8Path;
use dw_core::{EventMask, semantic};

/// Returns `true` if the subject of the event is a directory.
#[inline]
#[must_use]
pub const fn is_dir_event(mask: EventMask) -> bool {
    mask.contains(EventMask::IS_DIR)
}

/// A directory was created in, or moved into, a watched directory.
#[inline]
#[must_use]
pub const fn is_dir_created(mask: EventMask) -> bool {
    is_dir_event(mask) && mask.intersects(semantic::FILE_CREATED)
}

/// A directory was deleted from, or moved out of, a watched directory.
#[inline]
#[must_use]
pub const fn is_dir_removed(mask: EventMask) -> bool {
    is_dir_event(mask) && mask.intersects(semantic::FILE_REMOVED)
}

/// A directory was closed after writing, modified, or had its attributes changed.
#[inline]
#[must_use]
pub const fn is_dir_changed(mask: EventMask) -> bool {
    is_dir_event(mask) && mask.intersects(semantic::FILE_CHANGED)
}

/// A file was created in, or moved into, a watched directory.
#[inline]
#[must_use]
pub const fn is_file_created(mask: EventMask) -> bool {
    !is_dir_event(mask) && mask.intersects(semantic::FILE_CREATED)
}

/// A file was deleted from, or moved out of, a watched directory.
#[inline]
#[must_use]
pub const fn is_file_removed(mask: EventMask) -> bool {
    !is_dir_event(mask) && mask.intersects(semantic::FILE_REMOVED)
}

/// A file was closed after writing, modified, or had its attributes changed.
#[inline]
#[must_use]
pub const fn is_file_changed(mask: EventMask) -> bool {
    !is_dir_event(mask) && mask.intersects(semantic::FILE_CHANGED)
}

/// The watched root itself was deleted.
///
/// `path` is the event path and must equal `root`.
#[inline]
#[must_use]
pub fn is_root_deletion(mask: EventMask, path: &Utf8Path, root: &Utf8Path) -> bool {
    mask.contains(EventMask::SELF_DELETED) && path == root
}

/// The watched root itself was moved.
#[inline]
#[must_use]
pub fn is_root_moved(mask: EventMask, path: &Utf8Path, root: &Utf8Path) -> bool {
    mask.contains(EventMask::SELF_MOVED) && path == root
}

/// The kernel queue overflowed.
///
/// Applies to raw record masks. The decoder turns such records into
/// [`WatchError::QueueOverflow`](crate::WatchError::QueueOverflow), so no
/// decoded event carries this bit.
#[inline]
#[must_use]
pub const fn is_overflow(mask: EventMask) -> bool {
    mask.contains(EventMask::QUEUE_OVERFLOW)
}

/// The kernel dropped the watch.
#[inline]
#[must_use]
pub const fn is_ignored(mask: EventMask) -> bool {
    mask.contains(EventMask::IGNORED)
}

/// The filesystem under the watch was unmounted.
#[inline]
#[must_use]
pub const fn is_unmounted(mask: EventMask) -> bool {
    mask.contains(EventMask::UNMOUNTED)
}
