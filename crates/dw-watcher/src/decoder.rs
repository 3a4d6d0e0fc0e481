//! Decoding of raw kernel records.
//!
//! A read returns one or more back-to-back records. Each is a 16-byte header
//! of four native-endian 32-bit fields (`wd`, `mask`, `cookie`, `len`)
//! followed by `len` bytes holding a NUL-padded entry name. `len` is zero for
//! events about the watched path itself.
//!
//! [`decode`] keeps no state between calls.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use dw_core::EventMask;

use crate::classify;
use crate::error::WatchError;
use crate::events::{DecodedBatch, DecodedEvent};
use crate::registry::{WatchRegistry, clean_path};
use crate::session::WatchId;

/// Size of a record header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Longest entry name the kernel reports, excluding the terminating NUL.
pub const NAME_MAX: usize = 255;

/// Read buffer size: room for 16 records carrying maximum-length names.
pub const EVENT_BUFFER_SIZE: usize = 16 * (HEADER_SIZE + NAME_MAX + 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordHeader {
    wd: i32,
    mask: u32,
    cookie: u32,
    len: u32,
}

impl RecordHeader {
    /// Parses the header at the start of `bytes`.
    fn parse(bytes: &[u8]) -> Option<Self> {
        let field = |at: usize| -> Option<[u8; 4]> { bytes.get(at..at + 4)?.try_into().ok() };
        Some(Self {
            wd: i32::from_ne_bytes(field(0)?),
            mask: u32::from_ne_bytes(field(4)?),
            cookie: u32::from_ne_bytes(field(8)?),
            len: u32::from_ne_bytes(field(12)?),
        })
    }
}

/// Decodes every record in `buffer`, resolving watches through `registry`.
///
/// Per-record failures are collected in the batch in buffer order and
/// decoding moves on to the next record. A record whose name runs past the
/// end of the buffer ends decoding, since the next header cannot be located.
///
/// `IGNORED` records mark their watch stopped in the registry. `IGNORED`
/// records for watches the registry has already forgotten are dropped.
///
/// # Errors
///
/// Returns [`WatchError::IncompleteRead`] if the buffer is shorter than one
/// header.
pub fn decode(buffer: &[u8], registry: &WatchRegistry) -> Result<DecodedBatch, WatchError> {
    if buffer.len() < HEADER_SIZE {
        return Err(WatchError::IncompleteRead(buffer.len()));
    }

    let mut batch = DecodedBatch::new();
    let mut offset = 0;

    while offset + HEADER_SIZE <= buffer.len() {
        let Some(header) = buffer.get(offset..).and_then(RecordHeader::parse) else {
            break;
        };

        let name_start = offset + HEADER_SIZE;
        let name_end = name_start + header.len as usize;
        let Some(name_bytes) = buffer.get(name_start..name_end) else {
            tracing::warn!(offset, len = header.len, read = buffer.len(), "Truncated event record");
            batch.push_error(WatchError::TruncatedRecord {
                offset,
                needed: name_end - offset,
                available: buffer.len() - offset,
            });
            break;
        };
        let record_offset = offset;
        offset = name_end;

        let mask = EventMask::from_bits_retain(header.mask);
        if classify::is_overflow(mask) {
            tracing::warn!("Kernel event queue overflowed");
            batch.push_error(WatchError::QueueOverflow);
            continue;
        }

        let id = WatchId::new(header.wd);
        let Some(watch) = registry.resolve(id) else {
            if classify::is_ignored(mask) {
                tracing::trace!(id = %id, "Dropping IGNORED record for forgotten watch");
            } else {
                tracing::warn!(id = %id, mask = %mask, "Event record for unknown watch");
                batch.push_error(WatchError::UnknownHandle(id));
            }
            continue;
        };

        if classify::is_ignored(mask) {
            registry.release(id);
        }

        let trimmed = trim_nul(name_bytes);
        let name = match std::str::from_utf8(trimmed) {
            Ok("") => None,
            Ok(name) => Some(name.to_owned()),
            Err(_) => {
                let raw = watch.path.as_std_path().join(OsStr::from_bytes(trimmed));
                tracing::warn!(path = %raw.display(), "Skipping event with non-UTF-8 name");
                batch.push_error(WatchError::non_utf8_path(raw));
                continue;
            }
        };

        let path = match &name {
            Some(name) => clean_path(&watch.path.join(name)),
            None => watch.path.clone(),
        };

        tracing::trace!(
            offset = record_offset,
            id = %id,
            mask = %mask,
            path = %path,
            "Decoded event record"
        );

        batch.push_event(DecodedEvent {
            name,
            path,
            mask,
            cookie: (header.cookie != 0).then_some(header.cookie),
            watch,
        });
    }

    Ok(batch)
}

/// Strips the NUL padding after an entry name.
fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use camino::Utf8PathBuf;
    use dw_core::{DEFAULT_WATCH_MASK, WatcherOptions, semantic};
    use tempfile::TempDir;

    use super::*;
    use crate::testing::{ScriptedSession, named_record, record};

    struct Fixture {
        _dir: TempDir,
        root: Utf8PathBuf,
        registry: WatchRegistry,
        id: WatchId,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let registry = WatchRegistry::new(
            &root,
            DEFAULT_WATCH_MASK,
            WatcherOptions::default(),
            Arc::new(ScriptedSession::new()),
        );
        registry.add(&root, semantic::FILE_CREATED).unwrap();
        let id = registry.start(&root).unwrap().id().unwrap();
        Fixture {
            _dir: dir,
            root,
            registry,
            id,
        }
    }

    #[test]
    fn test_trim_nul() {
        assert_eq!(trim_nul(b"abc\0\0\0"), b"abc");
        assert_eq!(trim_nul(b"\0\0"), b"");
        assert_eq!(trim_nul(b""), b"");
        assert_eq!(trim_nul(b"abc"), b"abc");
    }

    #[test]
    fn test_header_parse() {
        let bytes = record(7, EventMask::CREATED, 42, b"", 0);
        let header = RecordHeader::parse(&bytes).unwrap();
        assert_eq!(header.wd, 7);
        assert_eq!(header.mask, 0x100);
        assert_eq!(header.cookie, 42);
        assert_eq!(header.len, 0);
        assert!(RecordHeader::parse(&bytes[..12]).is_none());
    }

    #[test]
    fn test_incomplete_read() {
        let f = fixture();
        let err = decode(&[0u8; 10], &f.registry).unwrap_err();
        assert!(matches!(err, WatchError::IncompleteRead(10)));
        assert!(matches!(decode(&[], &f.registry), Err(WatchError::IncompleteRead(0))));
    }

    #[test]
    fn test_two_back_to_back_records() {
        let f = fixture();
        let mut buffer = named_record(f.id, EventMask::DELETED, "report.txt");
        buffer.extend(named_record(f.id, EventMask::CREATED, "report.txt.new"));

        let batch = decode(&buffer, &f.registry).unwrap();
        let events: Vec<_> = batch.events().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(batch.errors().count(), 0);

        assert_eq!(events[0].name.as_deref(), Some("report.txt"));
        assert_eq!(events[0].path, f.root.join("report.txt"));
        assert!(events[0].is_file_removed());

        assert_eq!(events[1].name.as_deref(), Some("report.txt.new"));
        assert_eq!(events[1].path, f.root.join("report.txt.new"));
        assert!(events[1].is_file_created());
        assert_eq!(events[1].watch.id, f.id);
        assert_eq!(events[1].watch.mask, semantic::FILE_CREATED);
    }

    #[test]
    fn test_empty_name_uses_watch_path() {
        let f = fixture();
        let buffer = record(f.id.get(), EventMask::SELF_DELETED, 0, b"", 0);

        let batch = decode(&buffer, &f.registry).unwrap();
        let event = batch.events().next().unwrap();
        assert!(event.name.is_none());
        assert_eq!(event.path, f.root);
        assert!(event.is_root_deletion(&f.root));
    }

    #[test]
    fn test_cookie_zero_is_none() {
        let f = fixture();
        let mut buffer = record(f.id.get(), EventMask::MOVED_FROM, 17, b"a", 16);
        buffer.extend(record(f.id.get(), EventMask::MOVED_TO, 17, b"b", 16));
        buffer.extend(record(f.id.get(), EventMask::CREATED, 0, b"c", 16));

        let batch = decode(&buffer, &f.registry).unwrap();
        let cookies: Vec<_> = batch.events().map(|e| e.cookie).collect();
        assert_eq!(cookies, vec![Some(17), Some(17), None]);
    }

    #[test]
    fn test_unknown_handle_continues() {
        let f = fixture();
        let mut buffer = named_record(WatchId::new(999), EventMask::CREATED, "lost");
        buffer.extend(named_record(f.id, EventMask::CREATED, "kept"));

        let batch = decode(&buffer, &f.registry).unwrap();
        assert_eq!(batch.len(), 2);
        let mut records = batch.into_iter();
        assert!(matches!(
            records.next(),
            Some(Err(WatchError::UnknownHandle(id))) if id == WatchId::new(999)
        ));
        let kept = records.next().unwrap().unwrap();
        assert_eq!(kept.name.as_deref(), Some("kept"));
    }

    #[test]
    fn test_truncated_record_stops_decoding() {
        let f = fixture();
        let mut buffer = named_record(f.id, EventMask::CREATED, "whole");
        let first_len = buffer.len();
        let mut partial = named_record(f.id, EventMask::CREATED, "cut-short");
        partial.truncate(HEADER_SIZE + 4);
        buffer.extend(partial);

        let batch = decode(&buffer, &f.registry).unwrap();
        assert_eq!(batch.event_count(), 1);
        let err = batch.errors().next().unwrap();
        assert!(matches!(
            err,
            WatchError::TruncatedRecord { offset, needed: 32, available: 20 }
                if *offset == first_len
        ));
    }

    #[test]
    fn test_trailing_partial_header_is_ignored() {
        let f = fixture();
        let mut buffer = named_record(f.id, EventMask::CREATED, "whole");
        buffer.extend_from_slice(&[0u8; 6]);

        let batch = decode(&buffer, &f.registry).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.event_count(), 1);
    }

    #[test]
    fn test_queue_overflow_is_reported() {
        let f = fixture();
        let mut buffer = record(-1, EventMask::QUEUE_OVERFLOW, 0, b"", 0);
        buffer.extend(named_record(f.id, EventMask::CREATED, "after"));

        let batch = decode(&buffer, &f.registry).unwrap();
        assert!(matches!(batch.errors().next(), Some(WatchError::QueueOverflow)));
        assert_eq!(batch.event_count(), 1);
    }

    #[test]
    fn test_non_utf8_name_is_reported() {
        let f = fixture();
        let buffer = record(f.id.get(), EventMask::CREATED, 0, b"bad\xff\xfe", 16);

        let batch = decode(&buffer, &f.registry).unwrap();
        assert_eq!(batch.event_count(), 0);
        assert!(matches!(batch.errors().next(), Some(WatchError::NonUtf8Path(_))));
    }

    #[test]
    fn test_name_is_normalized_into_path() {
        let f = fixture();
        let buffer = named_record(f.id, EventMask::CREATED, "nested");

        let batch = decode(&buffer, &f.registry).unwrap();
        let event = batch.events().next().unwrap();
        assert_eq!(event.path.parent(), Some(f.root.as_path()));
        assert_eq!(event.file_name(), Some("nested"));
    }

    #[test]
    fn test_ignored_releases_watch() {
        let f = fixture();
        let buffer = record(f.id.get(), EventMask::IGNORED, 0, b"", 0);

        let batch = decode(&buffer, &f.registry).unwrap();
        let event = batch.events().next().unwrap();
        assert!(event.is_ignored());
        assert_eq!(f.registry.running_count(), 0);
        assert!(!f.registry.by_path(&f.root).unwrap().is_running());

        // A second IGNORED for the released id is dropped.
        let batch = decode(&buffer, &f.registry).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_decoder_has_no_cross_call_state() {
        let f = fixture();
        let first = named_record(f.id, EventMask::CREATED, "one");
        let second = named_record(f.id, EventMask::CREATED, "two");

        let a = decode(&first, &f.registry).unwrap();
        let b = decode(&second, &f.registry).unwrap();
        assert_eq!(a.events().next().unwrap().path, f.root.join("one"));
        assert_eq!(b.events().next().unwrap().path, f.root.join("two"));
    }
}
