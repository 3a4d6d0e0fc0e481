//! The kernel notification session.
//!
//! A [`Session`] is the seam between the watch registry and the kernel: it
//! registers and deregisters watches and hands back raw record bytes. The
//! registry never interprets watch ids beyond using them as hash keys.
//!
//! [`InotifySession`] is the Linux implementation. It reads through a
//! duplicate of the inotify descriptor switched to blocking mode, so the read
//! loop can sit in `read(2)` while other threads add and remove watches.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd};

use camino::Utf8Path;
use dw_core::EventMask;
use inotify::{Inotify, WatchDescriptor, WatchMask, Watches};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Opaque kernel-assigned watch identifier.
///
/// Values are neither small nor monotonic in general; treat them as keys only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(i32);

impl WatchId {
    /// Wraps a raw watch descriptor.
    #[inline]
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw watch descriptor.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A kernel notification session.
///
/// Implementations must be usable from several threads at once: the read loop
/// blocks in [`read`](Session::read) while handlers add watches.
///
/// # Examples
///
/// ```no_run
/// use dw_watcher::{InotifySession, Session};
/// use dw_core::semantic;
/// use camino::Utf8Path;
///
/// # fn example() -> std::io::Result<()> {
/// let session = InotifySession::new()?;
/// let id = session.add_watch(Utf8Path::new("/tmp"), semantic::FILE_CREATED)?;
/// session.remove_watch(id)?;
/// # Ok(())
/// # }
/// ```
pub trait Session: Send + Sync + 'static {
    /// Registers interest in `path` and returns the kernel's watch id.
    fn add_watch(&self, path: &Utf8Path, mask: EventMask) -> io::Result<WatchId>;

    /// Deregisters a watch previously returned by [`add_watch`](Session::add_watch).
    fn remove_watch(&self, id: WatchId) -> io::Result<()>;

    /// Drops the session's record of a watch the kernel has already removed.
    ///
    /// Makes no kernel call. Unknown ids are ignored.
    fn forget(&self, id: WatchId);

    /// Blocks until at least one record is available and copies raw record
    /// bytes into `buffer`, returning the number of bytes read.
    fn read(&self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// Watch bookkeeping the inotify crate needs to remove a watch again.
struct Descriptors {
    watches: Watches,
    by_id: FxHashMap<WatchId, WatchDescriptor>,
}

/// A [`Session`] backed by Linux inotify.
pub struct InotifySession {
    inotify: Inotify,
    descriptors: Mutex<Descriptors>,
    reader: File,
}

impl fmt::Debug for InotifySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InotifySession")
            .field("fd", &self.inotify.as_fd().as_raw_fd())
            .field("watches", &self.descriptors.lock().by_id.len())
            .finish_non_exhaustive()
    }
}

impl InotifySession {
    /// Opens a new inotify instance.
    ///
    /// # Errors
    ///
    /// Returns the OS error if inotify cannot be initialized (for example
    /// when the per-user instance limit is reached) or if the read descriptor
    /// cannot be duplicated.
    pub fn new() -> io::Result<Self> {
        let inotify = Inotify::init()?;
        let reader = File::from(inotify.as_fd().try_clone_to_owned()?);
        set_blocking(&reader)?;

        tracing::debug!(fd = reader.as_raw_fd(), "Opened inotify session");

        Ok(Self {
            descriptors: Mutex::new(Descriptors {
                watches: inotify.watches(),
                by_id: FxHashMap::default(),
            }),
            inotify,
            reader,
        })
    }

    /// Returns the number of watch descriptors the session still tracks.
    #[cfg(test)]
    pub(crate) fn descriptor_count(&self) -> usize {
        self.descriptors.lock().by_id.len()
    }
}

impl Session for InotifySession {
    fn add_watch(&self, path: &Utf8Path, mask: EventMask) -> io::Result<WatchId> {
        let mut descriptors = self.descriptors.lock();
        let wd = descriptors
            .watches
            .add(path.as_std_path(), WatchMask::from_bits_truncate(mask.bits()))?;
        let id = WatchId::new(wd.get_watch_descriptor_id());
        descriptors.by_id.insert(id, wd);
        Ok(id)
    }

    fn remove_watch(&self, id: WatchId) -> io::Result<()> {
        let mut descriptors = self.descriptors.lock();
        let wd = descriptors.by_id.remove(&id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("watch id {id} is not registered with this session"),
            )
        })?;
        descriptors.watches.remove(wd)
    }

    fn forget(&self, id: WatchId) {
        if self.descriptors.lock().by_id.remove(&id).is_some() {
            tracing::trace!(id = %id, "Forgot watch descriptor");
        }
    }

    fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        loop {
            match (&self.reader).read(buffer) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                result => return result,
            }
        }
    }
}

/// Clears `O_NONBLOCK` on the file description behind `file`.
///
/// The inotify crate opens its descriptor non-blocking; the read loop wants
/// `read(2)` to park until records arrive.
fn set_blocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?);
    fcntl(fd, FcntlArg::F_SETFL(flags - OFlag::O_NONBLOCK)).map_err(io::Error::from)?;
    Ok(())
}
