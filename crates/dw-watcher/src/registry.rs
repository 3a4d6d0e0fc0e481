//! The registry of watched paths.
//!
//! [`WatchRegistry`] owns every [`WatchHandle`] and the index from kernel watch
//! id back to path. Both maps sit behind one mutex, held for the whole of each
//! operation, so a running entry's id always resolves to that entry.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dw_core::{DEFAULT_WATCH_MASK, WatcherOptions};
//! use dw_watcher::{InotifySession, WatchRegistry};
//!
//! # fn example() -> Result<(), dw_watcher::WatchError> {
//! let session = Arc::new(InotifySession::new()?);
//! let registry =
//!     WatchRegistry::new("/srv/data", DEFAULT_WATCH_MASK, WatcherOptions::default(), session);
//!
//! registry.add("/srv/data", DEFAULT_WATCH_MASK)?;
//! registry.recursive_add("/srv/data", DEFAULT_WATCH_MASK)?;
//! registry.start_all()?;
//! assert!(registry.running_count() > 0);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fs;
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use dw_core::{EventMask, WatcherOptions};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::WatchError;
use crate::events::WatchRef;
use crate::handle::WatchHandle;
use crate::session::{Session, WatchId};

#[derive(Default)]
struct RegistryState {
    entries: FxHashMap<Utf8PathBuf, WatchHandle>,
    by_id: FxHashMap<WatchId, Utf8PathBuf>,
}

impl RegistryState {
    /// Starts the entry at `path` and indexes its id.
    fn start_entry(
        &mut self,
        session: &dyn Session,
        path: &Utf8Path,
    ) -> Result<WatchId, WatchError> {
        let handle = self
            .entries
            .get_mut(path)
            .ok_or_else(|| WatchError::NotFound(path.to_owned()))?;
        let id = handle.start(session)?;

        // The kernel hands back an existing id when the inode is already
        // watched under another path (bind mounts, renamed directories).
        let Some(owner) = self
            .by_id
            .get(&id)
            .filter(|owner| owner.as_path() != path)
            .cloned()
        else {
            self.by_id.insert(id, path.to_owned());
            tracing::debug!(path = %path, id = %id, "Started watch");
            return Ok(id);
        };

        tracing::warn!(
            path = %path,
            owner = %owner,
            id = %id,
            "Watch id already held by another path"
        );
        if let Some(handle) = self.entries.get_mut(path) {
            handle.release();
        }
        self.restore_mask(session, &owner);
        Err(WatchError::AlreadyWatched(owner))
    }

    /// Re-registers `owner` with its own mask.
    ///
    /// Adding a watch on an inode that is already watched replaces the
    /// kernel's mask for it, so a rejected start must put the owner's back.
    fn restore_mask(&self, session: &dyn Session, owner: &Utf8Path) {
        let Some(mask) = self.entries.get(owner).map(WatchHandle::mask) else {
            return;
        };
        if let Err(err) = session.add_watch(owner, mask) {
            tracing::warn!(path = %owner, error = %err, "Failed to restore watch mask");
        }
    }

    /// Stops the entry at `path` and drops its id from the index.
    fn stop_entry(
        &mut self,
        session: &dyn Session,
        path: &Utf8Path,
    ) -> Result<WatchId, WatchError> {
        let handle = self
            .entries
            .get_mut(path)
            .ok_or_else(|| WatchError::NotFound(path.to_owned()))?;
        let id = handle.stop(session)?;
        self.by_id.remove(&id);
        tracing::debug!(path = %path, id = %id, "Stopped watch");
        Ok(id)
    }

    fn sorted_paths(&self, filter: impl Fn(&WatchHandle) -> bool) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, handle)| filter(handle))
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort_unstable();
        paths
    }
}

/// The set of watched paths for one watcher.
///
/// Every method takes `&self`; the registry is shared between the read loop,
/// handlers, and the caller through an [`Arc`]. Lookups return snapshots.
pub struct WatchRegistry {
    root: Utf8PathBuf,
    default_mask: EventMask,
    options: WatcherOptions,
    session: Arc<dyn Session>,
    state: Mutex<RegistryState>,
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WatchRegistry")
            .field("root", &self.root)
            .field("default_mask", &self.default_mask)
            .field("options", &self.options)
            .field("entries", &state.entries.len())
            .field("running", &state.by_id.len())
            .finish_non_exhaustive()
    }
}

impl WatchRegistry {
    /// Creates an empty registry for `root`.
    ///
    /// The root is only recorded; add it with [`add`](Self::add).
    pub fn new(
        root: impl AsRef<Utf8Path>,
        default_mask: EventMask,
        options: WatcherOptions,
        session: Arc<dyn Session>,
    ) -> Self {
        Self {
            root: clean_path(root.as_ref()),
            default_mask,
            options,
            session,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Returns the normalized root path.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the default mask.
    #[inline]
    #[must_use]
    pub const fn default_mask(&self) -> EventMask {
        self.default_mask
    }

    /// Returns the watcher options.
    #[inline]
    #[must_use]
    pub const fn options(&self) -> &WatcherOptions {
        &self.options
    }

    /// Returns the mask a new watch gets when `requested` is passed to `add`.
    #[inline]
    #[must_use]
    pub const fn effective_mask(&self, requested: EventMask) -> EventMask {
        if self.options.use_default_mask_for_new_watches {
            self.default_mask
        } else {
            requested
        }
    }

    /// Registers an unstarted watch for `path`.
    ///
    /// The path is normalized lexically. No kernel call is made until the
    /// watch is started.
    ///
    /// # Errors
    ///
    /// - [`WatchError::PathNotFound`] if the path does not exist
    /// - [`WatchError::AlreadyWatched`] if the path is already registered
    pub fn add(
        &self,
        path: impl AsRef<Utf8Path>,
        mask: EventMask,
    ) -> Result<WatchHandle, WatchError> {
        let path = clean_path(path.as_ref());
        if !path.exists() {
            return Err(WatchError::PathNotFound(path));
        }

        let mut state = self.state.lock();
        if state.entries.contains_key(&path) {
            return Err(WatchError::AlreadyWatched(path));
        }

        let handle = WatchHandle::new(path.clone(), self.effective_mask(mask));
        tracing::debug!(path = %path, mask = %handle.mask(), "Added watch");
        state.entries.insert(path, handle.clone());
        Ok(handle)
    }

    /// Removes the watch for `path`.
    ///
    /// A running watch whose path still exists is stopped first. When the
    /// path is already gone the kernel has dropped the watch itself, so no
    /// kernel call is made.
    ///
    /// # Errors
    ///
    /// - [`WatchError::NotFound`] if the path is not registered
    /// - [`WatchError::StopFailed`] if the kernel refuses; the entry is kept
    pub fn remove(&self, path: impl AsRef<Utf8Path>) -> Result<(), WatchError> {
        let path = clean_path(path.as_ref());
        let mut state = self.state.lock();

        let (running, id) = state
            .entries
            .get(&path)
            .map(|handle| (handle.is_running(), handle.id()))
            .ok_or_else(|| WatchError::NotFound(path.clone()))?;

        if running {
            if path.symlink_metadata().is_ok() {
                state.stop_entry(self.session.as_ref(), &path)?;
            } else if let Some(id) = id {
                state.by_id.remove(&id);
                self.session.forget(id);
            }
        }

        state.entries.remove(&path);
        tracing::debug!(path = %path, "Removed watch");
        Ok(())
    }

    /// Starts the registered watch for `path`.
    ///
    /// # Errors
    ///
    /// - [`WatchError::NotFound`] if the path is not registered
    /// - [`WatchError::AlreadyRunning`] if the watch is running
    /// - [`WatchError::StartFailed`] if the kernel refuses
    /// - [`WatchError::AlreadyWatched`] if the kernel reports the path's inode
    ///   is already watched under another registered path; the owner's kernel
    ///   mask is re-registered and the owner keeps running
    pub fn start(&self, path: impl AsRef<Utf8Path>) -> Result<WatchHandle, WatchError> {
        let path = clean_path(path.as_ref());
        let mut state = self.state.lock();
        state.start_entry(self.session.as_ref(), &path)?;
        state
            .entries
            .get(&path)
            .cloned()
            .ok_or(WatchError::NotFound(path))
    }

    /// Stops the registered watch for `path`.
    ///
    /// # Errors
    ///
    /// - [`WatchError::NotFound`] if the path is not registered
    /// - [`WatchError::NotRunning`] if the watch is stopped
    /// - [`WatchError::StopFailed`] if the kernel refuses
    pub fn stop(&self, path: impl AsRef<Utf8Path>) -> Result<(), WatchError> {
        let path = clean_path(path.as_ref());
        self.state.lock().stop_entry(self.session.as_ref(), &path)?;
        Ok(())
    }

    /// Starts every watch that is not running, in path order.
    ///
    /// Stops at the first failure; watches started before it stay running.
    pub fn start_all(&self) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        for path in state.sorted_paths(|handle| !handle.is_running()) {
            state.start_entry(self.session.as_ref(), &path)?;
        }
        Ok(())
    }

    /// Stops every running watch, in path order.
    ///
    /// Stops at the first failure; watches stopped before it stay stopped.
    pub fn stop_all(&self) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        for path in state.sorted_paths(WatchHandle::is_running) {
            state.stop_entry(self.session.as_ref(), &path)?;
        }
        Ok(())
    }

    /// Adds every directory below `root`, deepest first.
    ///
    /// The walk is iterative and visits children in name order. Each
    /// directory's descendants are added before the directory itself; `root`
    /// is not added. Symlinks are not followed and entries with non-UTF-8
    /// names are skipped.
    ///
    /// # Errors
    ///
    /// Fails on the first directory that cannot be read or added. Watches
    /// added before the failure stay registered.
    pub fn recursive_add(
        &self,
        root: impl AsRef<Utf8Path>,
        mask: EventMask,
    ) -> Result<(), WatchError> {
        let root = clean_path(root.as_ref());
        let mut stack: Vec<(Utf8PathBuf, bool)> = child_dirs(&root)?
            .into_iter()
            .rev()
            .map(|dir| (dir, false))
            .collect();

        while let Some((dir, expanded)) = stack.pop() {
            if expanded {
                self.add(&dir, mask)?;
                continue;
            }
            let children = child_dirs(&dir)?;
            stack.push((dir, true));
            stack.extend(children.into_iter().rev().map(|child| (child, false)));
        }

        Ok(())
    }

    /// Returns a snapshot of the watch for `path`.
    #[must_use]
    pub fn by_path(&self, path: impl AsRef<Utf8Path>) -> Option<WatchHandle> {
        let path = clean_path(path.as_ref());
        self.state.lock().entries.get(&path).cloned()
    }

    /// Returns a snapshot of the running watch holding `id`.
    #[must_use]
    pub fn by_id(&self, id: WatchId) -> Option<WatchHandle> {
        let state = self.state.lock();
        state
            .by_id
            .get(&id)
            .and_then(|path| state.entries.get(path))
            .cloned()
    }

    /// Returns `true` if `path` is registered.
    #[must_use]
    pub fn contains(&self, path: impl AsRef<Utf8Path>) -> bool {
        let path = clean_path(path.as_ref());
        self.state.lock().entries.contains_key(&path)
    }

    /// Returns every registered path, started or not, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<Utf8PathBuf> {
        self.state.lock().sorted_paths(|_| true)
    }

    /// Returns the number of registered watches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns the number of running watches.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|handle| handle.is_running())
            .count()
    }

    /// Returns the snapshot key the decoder attaches to events for `id`.
    pub(crate) fn resolve(&self, id: WatchId) -> Option<WatchRef> {
        let state = self.state.lock();
        let path = state.by_id.get(&id)?;
        let handle = state.entries.get(path)?;
        Some(WatchRef {
            id,
            path: path.clone(),
            mask: handle.mask(),
        })
    }

    /// Marks the watch holding `id` stopped after the kernel dropped it.
    pub(crate) fn release(&self, id: WatchId) {
        let mut state = self.state.lock();
        let Some(path) = state.by_id.remove(&id) else {
            return;
        };
        self.session.forget(id);
        if let Some(handle) = state.entries.get_mut(&path) {
            handle.release();
            tracing::debug!(path = %path, id = %id, "Kernel dropped watch");
        }
    }
}

/// Normalizes `path` lexically.
///
/// Removes `.` components, resolves `..` against preceding components, and
/// collapses repeated and trailing separators. An empty result becomes `.`.
pub(crate) fn clean_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut parts: Vec<Utf8Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match parts.last() {
                Some(Utf8Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Utf8Component::RootDir | Utf8Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Utf8PathBuf::from(".");
    }
    let mut cleaned = Utf8PathBuf::new();
    for part in parts {
        cleaned.push(part);
    }
    cleaned
}

/// Returns the subdirectories of `dir`, sorted by name.
fn child_dirs(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, WatchError> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match Utf8PathBuf::from_path_buf(entry.path()) {
            Ok(path) => children.push(path),
            Err(path) => {
                tracing::warn!(path = %path.display(), "Skipping non-UTF-8 directory");
            }
        }
    }
    children.sort_unstable();
    Ok(children)
}
