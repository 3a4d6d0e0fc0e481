//! A single watched path.
//!
//! A [`WatchHandle`] pairs a path and mask with the kernel watch id it holds
//! while running. Handles live inside the [`WatchRegistry`](crate::WatchRegistry);
//! everything outside the registry sees cloned snapshots.

use camino::{Utf8Path, Utf8PathBuf};
use dw_core::EventMask;

use crate::error::WatchError;
use crate::session::{Session, WatchId};

/// A watched path, its interest mask, and its kernel state.
///
/// A handle starts out unset and stopped. Starting it registers the path with
/// the session and records the returned id; stopping it removes the kernel
/// watch and forgets the id.
///
/// # Examples
///
/// ```
/// use dw_watcher::WatchHandle;
/// use dw_core::semantic;
///
/// let handle = WatchHandle::new("/srv/data", semantic::FILE_CREATED);
/// assert!(!handle.is_running());
/// assert!(handle.id().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHandle {
    path: Utf8PathBuf,
    mask: EventMask,
    id: Option<WatchId>,
    running: bool,
}

impl WatchHandle {
    /// Creates an unstarted handle.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, mask: EventMask) -> Self {
        Self {
            path: path.into(),
            mask,
            id: None,
            running: false,
        }
    }

    /// Returns the watched path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the interest mask this handle registers with the kernel.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> EventMask {
        self.mask
    }

    /// Returns the kernel watch id while the handle is running.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> Option<WatchId> {
        self.id
    }

    /// Returns `true` if the kernel watch is active.
    #[inline]
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Registers the path with `session`.
    ///
    /// On failure the handle stays stopped with no id.
    pub(crate) fn start(&mut self, session: &dyn Session) -> Result<WatchId, WatchError> {
        if self.running {
            return Err(WatchError::AlreadyRunning(self.path.clone()));
        }

        let id = session
            .add_watch(&self.path, self.mask)
            .map_err(|source| WatchError::StartFailed {
                path: self.path.clone(),
                source,
            })?;

        self.id = Some(id);
        self.running = true;
        Ok(id)
    }

    /// Removes the kernel watch.
    ///
    /// On failure the handle stays running and keeps its id.
    pub(crate) fn stop(&mut self, session: &dyn Session) -> Result<WatchId, WatchError> {
        let id = match (self.running, self.id) {
            (true, Some(id)) => id,
            _ => return Err(WatchError::NotRunning(self.path.clone())),
        };

        session
            .remove_watch(id)
            .map_err(|source| WatchError::StopFailed {
                path: self.path.clone(),
                source,
            })?;

        self.release();
        Ok(id)
    }

    /// Marks the handle stopped without a kernel call.
    ///
    /// Used when the kernel has already dropped the watch.
    pub(crate) fn release(&mut self) {
        self.id = None;
        self.running = false;
    }
}
