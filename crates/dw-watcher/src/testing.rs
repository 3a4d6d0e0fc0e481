//! In-memory session and record builders for unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender, unbounded};
use dw_core::EventMask;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::decoder::HEADER_SIZE;
use crate::session::{Session, WatchId};

/// A [`Session`] that hands out ids from a counter and reads scripted bytes.
pub(crate) struct ScriptedSession {
    next_id: AtomicI32,
    active: Mutex<FxHashMap<WatchId, (Utf8PathBuf, EventMask)>>,
    failing_adds: Mutex<FxHashSet<Utf8PathBuf>>,
    fail_remove: AtomicBool,
    feed_tx: Sender<Vec<u8>>,
    feed_rx: Receiver<Vec<u8>>,
}

impl ScriptedSession {
    pub(crate) fn new() -> Self {
        let (feed_tx, feed_rx) = unbounded();
        Self {
            next_id: AtomicI32::new(1),
            active: Mutex::new(FxHashMap::default()),
            failing_adds: Mutex::new(FxHashSet::default()),
            fail_remove: AtomicBool::new(false),
            feed_tx,
            feed_rx,
        }
    }

    /// Makes every later `add_watch` for `path` fail.
    pub(crate) fn fail_add(&self, path: impl Into<Utf8PathBuf>) {
        self.failing_adds.lock().insert(path.into());
    }

    /// Makes every later `remove_watch` fail while `enabled`.
    pub(crate) fn fail_remove(&self, enabled: bool) {
        self.fail_remove.store(enabled, Ordering::SeqCst);
    }

    /// Queues one chunk of bytes for a later `read`.
    pub(crate) fn feed(&self, bytes: Vec<u8>) {
        let _ = self.feed_tx.send(bytes);
    }

    pub(crate) fn is_active(&self, id: WatchId) -> bool {
        self.active.lock().contains_key(&id)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub(crate) fn path_of(&self, id: WatchId) -> Option<Utf8PathBuf> {
        self.active.lock().get(&id).map(|(path, _)| path.clone())
    }

    pub(crate) fn mask_of(&self, id: WatchId) -> Option<EventMask> {
        self.active.lock().get(&id).map(|(_, mask)| *mask)
    }
}

impl Session for ScriptedSession {
    fn add_watch(&self, path: &Utf8Path, mask: EventMask) -> io::Result<WatchId> {
        if self.failing_adds.lock().contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "scripted add failure"));
        }
        let id = WatchId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.active.lock().insert(id, (path.to_owned(), mask));
        Ok(id)
    }

    fn remove_watch(&self, id: WatchId) -> io::Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(io::Error::other("scripted remove failure"));
        }
        self.active
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown watch id"))
    }

    fn forget(&self, id: WatchId) {
        self.active.lock().remove(&id);
    }

    fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let chunk = self
            .feed_rx
            .recv()
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        let len = chunk.len().min(buffer.len());
        buffer[..len].copy_from_slice(&chunk[..len]);
        Ok(len)
    }
}

/// Encodes one kernel record.
///
/// `name_len` is the length field written to the header; the name is NUL
/// padded (or cut) to that many bytes.
pub(crate) fn record(wd: i32, mask: EventMask, cookie: u32, name: &[u8], name_len: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + name_len as usize);
    bytes.extend_from_slice(&wd.to_ne_bytes());
    bytes.extend_from_slice(&mask.bits().to_ne_bytes());
    bytes.extend_from_slice(&cookie.to_ne_bytes());
    bytes.extend_from_slice(&name_len.to_ne_bytes());
    let mut padded = name.to_vec();
    padded.resize(name_len as usize, 0);
    bytes.extend_from_slice(&padded);
    bytes
}

/// Encodes a record whose name is padded to the next 16-byte boundary.
pub(crate) fn named_record(wd: WatchId, mask: EventMask, name: &str) -> Vec<u8> {
    let name_len = if name.is_empty() {
        0
    } else {
        (name.len() + 1).next_multiple_of(16)
    };
    record(wd.get(), mask, 0, name.as_bytes(), u32::try_from(name_len).unwrap_or(u32::MAX))
}
