//! Event mask algebra.
//!
//! This module provides [`EventMask`], a flat bitset whose primitive flags are
//! bit-exact with the values the kernel writes into inotify records, and a
//! separate table of composite semantic masks in [`semantic`].
//!
//! Primitive flags say what happened ("created", "is a directory"). Semantic
//! masks name useful combinations of them ("a directory was created"). The two
//! tables are separate: a raw event never carries a semantic mask, only
//! primitive bits that may satisfy several semantic masks at once.
//!
//! # Examples
//!
//! ```
//! use dw_core::{EventMask, semantic};
//!
//! let raw = EventMask::CREATED | EventMask::IS_DIR;
//! assert!(raw.intersects(semantic::DIR_CREATED));
//! assert!(dw_core::check_mask(EventMask::IS_DIR, raw));
//! assert_eq!(raw.to_string(), "CREATED | IS_DIR");
//! ```

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

bitflags! {
    /// Primitive event flags, bit-exact with the kernel's inotify constants.
    ///
    /// Serializes as a human-readable flag list such as
    /// `"CREATED | MOVED_TO | IS_DIR"`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EventMask: u32 {
        /// File was accessed (read).
        const ACCESSED = 0x0000_0001;
        /// File was modified (write, truncate).
        const MODIFIED = 0x0000_0002;
        /// Metadata changed (permissions, timestamps, ownership, links).
        const ATTRIB_CHANGED = 0x0000_0004;
        /// File opened for writing was closed.
        const CLOSE_WRITE = 0x0000_0008;
        /// File not opened for writing was closed.
        const CLOSE_READ = 0x0000_0010;
        /// File or directory was opened.
        const OPENED = 0x0000_0020;
        /// Entry was renamed out of the watched directory.
        const MOVED_FROM = 0x0000_0040;
        /// Entry was renamed into the watched directory.
        const MOVED_TO = 0x0000_0080;
        /// Entry was created in the watched directory.
        const CREATED = 0x0000_0100;
        /// Entry was deleted from the watched directory.
        const DELETED = 0x0000_0200;
        /// The watched path itself was deleted.
        const SELF_DELETED = 0x0000_0400;
        /// The watched path itself was moved.
        const SELF_MOVED = 0x0000_0800;
        /// Filesystem containing the watched path was unmounted.
        const UNMOUNTED = 0x0000_2000;
        /// The kernel event queue overflowed and events were dropped.
        const QUEUE_OVERFLOW = 0x0000_4000;
        /// The watch was removed, explicitly or because its path is gone.
        const IGNORED = 0x0000_8000;
        /// The subject of the event is a directory.
        const IS_DIR = 0x4000_0000;
    }
}

/// Composite semantic masks built from the primitive [`EventMask`] flags.
///
/// Directory masks include [`EventMask::IS_DIR`]; their file counterparts are
/// the same bits without it. Use the predicates in `dw-watcher` to test an
/// event against these meanings, since a plain bit test cannot express
/// "and is not a directory".
pub mod semantic {
    use super::EventMask;

    /// Either half of a rename.
    pub const MOVE: EventMask = EventMask::MOVED_FROM.union(EventMask::MOVED_TO);

    /// A directory was created in, or moved into, a watched directory.
    pub const DIR_CREATED: EventMask = EventMask::CREATED
        .union(EventMask::MOVED_TO)
        .union(EventMask::IS_DIR);

    /// A directory was deleted from, or moved out of, a watched directory.
    pub const DIR_REMOVED: EventMask = EventMask::DELETED
        .union(EventMask::MOVED_FROM)
        .union(EventMask::IS_DIR);

    /// A directory was closed after writing, modified, or had its attributes changed.
    pub const DIR_CHANGED: EventMask = EventMask::CLOSE_WRITE
        .union(EventMask::MODIFIED)
        .union(EventMask::ATTRIB_CHANGED)
        .union(EventMask::IS_DIR);

    /// A file was created in, or moved into, a watched directory.
    pub const FILE_CREATED: EventMask = EventMask::CREATED.union(EventMask::MOVED_TO);

    /// A file was deleted from, or moved out of, a watched directory.
    pub const FILE_REMOVED: EventMask = EventMask::DELETED.union(EventMask::MOVED_FROM);

    /// A file was closed after writing, modified, or had its attributes changed.
    pub const FILE_CHANGED: EventMask = EventMask::CLOSE_WRITE
        .union(EventMask::MODIFIED)
        .union(EventMask::ATTRIB_CHANGED);

    /// The watched root itself was deleted or moved.
    pub const ROOT_EVENT: EventMask = EventMask::SELF_DELETED.union(EventMask::SELF_MOVED);

    /// Every flag a watch can express interest in.
    ///
    /// Excludes the flags only the kernel sets on output
    /// (`UNMOUNTED`, `QUEUE_OVERFLOW`, `IGNORED`).
    pub const ALL_EVENTS: EventMask = EventMask::ACCESSED
        .union(EventMask::MODIFIED)
        .union(EventMask::ATTRIB_CHANGED)
        .union(EventMask::CLOSE_WRITE)
        .union(EventMask::CLOSE_READ)
        .union(EventMask::OPENED)
        .union(EventMask::MOVED_FROM)
        .union(EventMask::MOVED_TO)
        .union(EventMask::CREATED)
        .union(EventMask::DELETED)
        .union(EventMask::SELF_DELETED)
        .union(EventMask::SELF_MOVED)
        .union(EventMask::IS_DIR);
}

/// Returns `true` if any bit of `check` is set in `mask`.
#[inline]
#[must_use]
pub const fn check_mask(check: EventMask, mask: EventMask) -> bool {
    mask.intersects(check)
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

/// Named entries of the [`semantic`] table, for configuration and CLI parsing.
///
/// # Examples
///
/// ```
/// use dw_core::{SemanticMask, semantic};
///
/// let parsed: SemanticMask = "dir-created".parse().unwrap();
/// assert_eq!(parsed.mask(), semantic::DIR_CREATED);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum SemanticMask {
    /// [`semantic::DIR_CREATED`]
    DirCreated,
    /// [`semantic::DIR_REMOVED`]
    DirRemoved,
    /// [`semantic::DIR_CHANGED`]
    DirChanged,
    /// [`semantic::FILE_CREATED`]
    FileCreated,
    /// [`semantic::FILE_REMOVED`]
    FileRemoved,
    /// [`semantic::FILE_CHANGED`]
    FileChanged,
    /// [`semantic::ROOT_EVENT`]
    Root,
    /// [`semantic::MOVE`]
    Move,
    /// [`semantic::ALL_EVENTS`]
    All,
}

impl SemanticMask {
    /// Every named mask, in table order.
    pub const ALL: [Self; 9] = [
        Self::DirCreated,
        Self::DirRemoved,
        Self::DirChanged,
        Self::FileCreated,
        Self::FileRemoved,
        Self::FileChanged,
        Self::Root,
        Self::Move,
        Self::All,
    ];

    /// Returns the bits this name stands for.
    #[must_use]
    pub const fn mask(self) -> EventMask {
        match self {
            Self::DirCreated => semantic::DIR_CREATED,
            Self::DirRemoved => semantic::DIR_REMOVED,
            Self::DirChanged => semantic::DIR_CHANGED,
            Self::FileCreated => semantic::FILE_CREATED,
            Self::FileRemoved => semantic::FILE_REMOVED,
            Self::FileChanged => semantic::FILE_CHANGED,
            Self::Root => semantic::ROOT_EVENT,
            Self::Move => semantic::MOVE,
            Self::All => semantic::ALL_EVENTS,
        }
    }

    /// Returns the kebab-case name used in configuration files and on the command line.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DirCreated => "dir-created",
            Self::DirRemoved => "dir-removed",
            Self::DirChanged => "dir-changed",
            Self::FileCreated => "file-created",
            Self::FileRemoved => "file-removed",
            Self::FileChanged => "file-changed",
            Self::Root => "root",
            Self::Move => "move",
            Self::All => "all",
        }
    }

    /// ORs a set of names into one mask.
    pub fn combine(names: impl IntoIterator<Item = Self>) -> EventMask {
        names
            .into_iter()
            .fold(EventMask::empty(), |acc, name| acc | name.mask())
    }
}

impl fmt::Display for SemanticMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SemanticMask {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownMask {
                name: s.to_owned(),
                expected: Self::ALL.map(Self::label).join(", "),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_flags_match_kernel_values() {
        assert_eq!(EventMask::ACCESSED.bits(), 0x1);
        assert_eq!(EventMask::CLOSE_WRITE.bits(), 0x8);
        assert_eq!(EventMask::CREATED.bits(), 0x100);
        assert_eq!(EventMask::SELF_MOVED.bits(), 0x800);
        assert_eq!(EventMask::IGNORED.bits(), 0x8000);
        assert_eq!(EventMask::IS_DIR.bits(), 0x4000_0000);
    }

    #[test]
    fn test_dir_masks_are_file_masks_plus_is_dir() {
        assert_eq!(semantic::DIR_CREATED, semantic::FILE_CREATED | EventMask::IS_DIR);
        assert_eq!(semantic::DIR_REMOVED, semantic::FILE_REMOVED | EventMask::IS_DIR);
        assert_eq!(semantic::DIR_CHANGED, semantic::FILE_CHANGED | EventMask::IS_DIR);
    }

    #[test]
    fn test_all_events_excludes_output_only_flags() {
        assert!(semantic::ALL_EVENTS.contains(semantic::DIR_CHANGED));
        assert!(semantic::ALL_EVENTS.contains(semantic::ROOT_EVENT));
        assert!(!semantic::ALL_EVENTS.intersects(
            EventMask::IGNORED | EventMask::QUEUE_OVERFLOW | EventMask::UNMOUNTED
        ));
    }

    #[test]
    fn test_check_mask_is_any_bit() {
        let raw = EventMask::MOVED_TO | EventMask::IS_DIR;
        assert!(check_mask(semantic::FILE_CREATED, raw));
        assert!(check_mask(EventMask::IS_DIR, raw));
        assert!(!check_mask(semantic::FILE_REMOVED, raw));
    }

    #[test]
    fn test_display_lists_flag_names() {
        insta::assert_snapshot!(semantic::DIR_CREATED.to_string(), @"MOVED_TO | CREATED | IS_DIR");
        insta::assert_snapshot!(semantic::ROOT_EVENT.to_string(), @"SELF_DELETED | SELF_MOVED");
    }

    #[test]
    fn test_serde_uses_flag_names() {
        let json = serde_json::to_string(&semantic::FILE_REMOVED).unwrap();
        assert_eq!(json, r#""MOVED_FROM | DELETED""#);

        let parsed: EventMask = serde_json::from_str(r#""CREATED | IS_DIR""#).unwrap();
        assert_eq!(parsed, EventMask::CREATED | EventMask::IS_DIR);
    }

    #[test]
    fn test_semantic_mask_parse() {
        assert_eq!("file-changed".parse::<SemanticMask>().unwrap(), SemanticMask::FileChanged);
        assert_eq!(" ALL ".parse::<SemanticMask>().unwrap(), SemanticMask::All);
        let err = "dir-exploded".parse::<SemanticMask>().unwrap_err();
        assert!(matches!(&err, ConfigError::UnknownMask { name, .. } if name == "dir-exploded"));
        assert!(err.to_string().contains("dir-created, dir-removed"));
    }

    #[test]
    fn test_semantic_mask_combine() {
        let mask = SemanticMask::combine([SemanticMask::DirCreated, SemanticMask::Root]);
        assert_eq!(mask, semantic::DIR_CREATED | semantic::ROOT_EVENT);
        assert_eq!(SemanticMask::combine([]), EventMask::empty());
    }

    #[test]
    fn test_semantic_mask_labels_round_trip() {
        for name in SemanticMask::ALL {
            assert_eq!(name.label().parse::<SemanticMask>().unwrap(), name);
        }
    }
}
