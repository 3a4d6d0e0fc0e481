//! The watcher facade and its read loops.
//!
//! This module provides the [`Watcher`] type, which composes the kernel
//! session, the [`WatchRegistry`], the [`Dispatcher`], and two rendezvous
//! output channels.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                Reader Thread (spawn_watch*)                    │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐  │
//! │  │ Session::read│ -> │ decode       │ -> │ watch():         │  │
//! │  │ (blocking)   │    │ (registry)   │    │   event channel  │  │
//! │  └──────────────┘    └──────────────┘    │ watch_and_handle:│  │
//! │                                          │   Dispatcher     │  │
//! │                                          └────────┬─────────┘  │
//! └───────────────────────────────────────────────────│────────────┘
//!                                     rendezvous send │
//!                                                     ▼
//!                          consumer: events() / errors() receivers
//! ```
//!
//! Both channels are unbuffered: the reader blocks until a consumer takes
//! each event or error, so a slow consumer slows the reader down. There is
//! no way to interrupt a blocked read; retire the reader by stopping every
//! watch (for [`Watcher::watch`]) or by ending the process.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dw_core::{DEFAULT_WATCH_MASK, WatcherOptions};
//! use dw_watcher::Watcher;
//!
//! # fn example() -> Result<(), dw_watcher::WatchError> {
//! let options = WatcherOptions::default();
//! let watcher = Arc::new(Watcher::new("/srv/data", DEFAULT_WATCH_MASK, options)?);
//! watcher.start_all()?;
//!
//! let events = watcher.events();
//! let _reader = watcher.spawn_watch()?;
//!
//! for event in events {
//!     if event.is_root_deletion(watcher.root()) {
//!         break;
//!     }
//!     println!("{} {}", event.mask, event.path);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender, bounded};
use dw_core::{EventMask, WatchConfig, WatcherOptions};

use crate::decoder::{self, EVENT_BUFFER_SIZE};
use crate::dispatcher::{Dispatcher, EventHandler};
use crate::error::WatchError;
use crate::events::{DecodedBatch, DecodedEvent};
use crate::handle::WatchHandle;
use crate::registry::WatchRegistry;
use crate::session::{InotifySession, Session, WatchId};

/// Name given to reader threads started by [`Watcher::spawn_watch`] and
/// [`Watcher::spawn_watch_and_handle`].
const READER_THREAD_NAME: &str = "dirwatch-reader";

/// A recursive directory watcher.
///
/// # Lifecycle
///
/// 1. **Construction**: [`Watcher::new`] opens an inotify session and
///    registers the root (and, when recursive, every directory below it).
///    Nothing is started yet.
///
/// 2. **Start**: [`start_all`](Self::start_all) or
///    [`start_watch`](Self::start_watch) registers watches with the kernel.
///
/// 3. **Run**: [`watch`](Self::watch) forwards raw events while at least one
///    watch is running; [`watch_and_handle`](Self::watch_and_handle) feeds
///    the handlers and never stops on its own.
///
/// 4. **Stop**: [`stop_all`](Self::stop_all). The `watch` loop returns after
///    the next read completes.
///
/// Root deletion and moves are only reported, as classified events; reacting
/// to them is up to the consumer.
///
/// # Thread Safety
///
/// All methods take `&self`. Share the watcher through an [`Arc`]; handlers
/// receive a reference to it and may add, start, and remove watches.
pub struct Watcher {
    session: Arc<dyn Session>,
    registry: WatchRegistry,
    dispatcher: Dispatcher,
    event_tx: Sender<DecodedEvent>,
    event_rx: Receiver<DecodedEvent>,
    error_tx: Sender<WatchError>,
    error_rx: Receiver<WatchError>,
    event_count: AtomicU64,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("event_count", &self.event_count())
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a watcher for `root` backed by a new inotify session.
    ///
    /// # Errors
    ///
    /// - [`WatchError::SessionInit`] if inotify cannot be initialized
    /// - Any error from adding the root or walking the tree below it
    pub fn new(
        root: impl AsRef<Utf8Path>,
        default_mask: EventMask,
        options: WatcherOptions,
    ) -> Result<Self, WatchError> {
        let session = InotifySession::new().map_err(WatchError::SessionInit)?;
        Self::with_session(Arc::new(session), root, default_mask, options)
    }

    /// Creates a watcher from a loaded configuration.
    pub fn from_config(config: &WatchConfig) -> Result<Self, WatchError> {
        Self::new(&config.root, config.default_mask, config.options)
    }

    /// Creates a watcher on top of an existing session.
    pub fn with_session(
        session: Arc<dyn Session>,
        root: impl AsRef<Utf8Path>,
        default_mask: EventMask,
        options: WatcherOptions,
    ) -> Result<Self, WatchError> {
        let registry = WatchRegistry::new(root, default_mask, options, Arc::clone(&session));
        let root = registry.root().to_owned();

        registry.add(&root, default_mask)?;
        if options.recursive {
            registry.recursive_add(&root, default_mask)?;
        }

        let (event_tx, event_rx) = bounded(0);
        let (error_tx, error_rx) = bounded(0);

        tracing::info!(
            root = %root,
            watches = registry.len(),
            recursive = options.recursive,
            mode = ?options.dispatch_mode,
            "Created watcher"
        );

        Ok(Self {
            session,
            dispatcher: Dispatcher::new(options.dispatch_mode),
            registry,
            event_tx,
            event_rx,
            error_tx,
            error_rx,
            event_count: AtomicU64::new(0),
        })
    }

    /// Returns the normalized root path.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        self.registry.root()
    }

    /// Returns the default mask.
    #[inline]
    #[must_use]
    pub const fn default_mask(&self) -> EventMask {
        self.registry.default_mask()
    }

    /// Returns the watcher options.
    #[inline]
    #[must_use]
    pub const fn options(&self) -> &WatcherOptions {
        self.registry.options()
    }

    /// Returns the watch registry.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Returns the handler table.
    #[inline]
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns a receiver for decoded events sent by [`watch`](Self::watch).
    #[must_use]
    pub fn events(&self) -> Receiver<DecodedEvent> {
        self.event_rx.clone()
    }

    /// Returns a receiver for errors sent by either read loop.
    #[must_use]
    pub fn errors(&self) -> Receiver<WatchError> {
        self.error_rx.clone()
    }

    /// Returns the number of events decoded so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    // --- Registry delegates ---

    /// See [`WatchRegistry::add`].
    pub fn add_watch(
        &self,
        path: impl AsRef<Utf8Path>,
        mask: EventMask,
    ) -> Result<WatchHandle, WatchError> {
        self.registry.add(path, mask)
    }

    /// See [`WatchRegistry::remove`].
    pub fn remove_watch(&self, path: impl AsRef<Utf8Path>) -> Result<(), WatchError> {
        self.registry.remove(path)
    }

    /// See [`WatchRegistry::start`].
    pub fn start_watch(&self, path: impl AsRef<Utf8Path>) -> Result<WatchHandle, WatchError> {
        self.registry.start(path)
    }

    /// See [`WatchRegistry::stop`].
    pub fn stop_watch(&self, path: impl AsRef<Utf8Path>) -> Result<(), WatchError> {
        self.registry.stop(path)
    }

    /// See [`WatchRegistry::start_all`].
    pub fn start_all(&self) -> Result<(), WatchError> {
        self.registry.start_all()
    }

    /// See [`WatchRegistry::stop_all`].
    pub fn stop_all(&self) -> Result<(), WatchError> {
        self.registry.stop_all()
    }

    /// See [`WatchRegistry::recursive_add`].
    pub fn recursive_add(
        &self,
        root: impl AsRef<Utf8Path>,
        mask: EventMask,
    ) -> Result<(), WatchError> {
        self.registry.recursive_add(root, mask)
    }

    /// See [`WatchRegistry::by_path`].
    #[must_use]
    pub fn watch_by_path(&self, path: impl AsRef<Utf8Path>) -> Option<WatchHandle> {
        self.registry.by_path(path)
    }

    /// See [`WatchRegistry::by_id`].
    #[must_use]
    pub fn watch_by_id(&self, id: WatchId) -> Option<WatchHandle> {
        self.registry.by_id(id)
    }

    /// See [`WatchRegistry::contains`].
    #[must_use]
    pub fn is_watched(&self, path: impl AsRef<Utf8Path>) -> bool {
        self.registry.contains(path)
    }

    /// See [`WatchRegistry::list`].
    #[must_use]
    pub fn list_watches(&self) -> Vec<Utf8PathBuf> {
        self.registry.list()
    }

    /// See [`WatchRegistry::running_count`].
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.registry.running_count()
    }

    // --- Dispatcher delegates ---

    /// See [`Dispatcher::register`].
    pub fn register_handler(&self, handler: impl EventHandler) -> Result<(), WatchError> {
        self.dispatcher.register(handler)
    }

    /// See [`Dispatcher::unregister`].
    pub fn unregister_handler(&self, mask: EventMask) -> Result<(), WatchError> {
        self.dispatcher.unregister(mask)
    }

    // --- Reading ---

    /// Blocks for one kernel read and decodes it.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Read`] if the read fails
    /// - [`WatchError::IncompleteRead`] if fewer bytes than one header arrive
    pub fn read_events(&self) -> Result<DecodedBatch, WatchError> {
        let mut buffer = [0u8; EVENT_BUFFER_SIZE];
        let read = self.session.read(&mut buffer).map_err(WatchError::Read)?;
        let batch = decoder::decode(buffer.get(..read).unwrap_or_default(), &self.registry)?;
        self.event_count
            .fetch_add(batch.event_count() as u64, Ordering::Relaxed);
        Ok(batch)
    }

    /// Forwards every decoded event and error while any watch is running.
    ///
    /// Checks the running count before each read, so after the last watch
    /// stops the loop returns once the pending read completes.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelClosed`] if an output channel is
    /// disconnected.
    pub fn watch(&self) -> Result<(), WatchError> {
        tracing::info!(root = %self.root(), running = self.running_count(), "Watch loop started");

        while self.registry.running_count() > 0 {
            match self.read_events() {
                Ok(batch) => {
                    for record in batch {
                        match record {
                            Ok(event) => self.send_event(event)?,
                            Err(err) => self.send_error(err)?,
                        }
                    }
                }
                Err(err) => self.send_error(err)?,
            }
        }

        tracing::info!(root = %self.root(), events = self.event_count(), "Watch loop stopped");
        Ok(())
    }

    /// Dispatches every decoded event to the handlers and forwards errors.
    ///
    /// Keeps reading regardless of how many watches are running. Events no
    /// handler selects are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::ChannelClosed`] if the error channel is
    /// disconnected.
    pub fn watch_and_handle(&self) -> Result<(), WatchError> {
        tracing::info!(
            root = %self.root(),
            handlers = self.dispatcher.len(),
            "Handler loop started"
        );

        loop {
            let batch = match self.read_events() {
                Ok(batch) => batch,
                Err(err) => {
                    self.send_error(err)?;
                    continue;
                }
            };

            for record in batch {
                match record {
                    Ok(event) => {
                        for err in self.dispatcher.dispatch(self, &event) {
                            self.send_error(err)?;
                        }
                    }
                    Err(err) => self.send_error(err)?,
                }
            }
        }
    }

    /// Runs [`watch`](Self::watch) on a dedicated thread.
    pub fn spawn_watch(self: &Arc<Self>) -> Result<JoinHandle<Result<(), WatchError>>, WatchError> {
        let watcher = Arc::clone(self);
        Ok(thread::Builder::new()
            .name(READER_THREAD_NAME.to_owned())
            .spawn(move || watcher.watch())?)
    }

    /// Runs [`watch_and_handle`](Self::watch_and_handle) on a dedicated thread.
    pub fn spawn_watch_and_handle(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<(), WatchError>>, WatchError> {
        let watcher = Arc::clone(self);
        Ok(thread::Builder::new()
            .name(READER_THREAD_NAME.to_owned())
            .spawn(move || watcher.watch_and_handle())?)
    }

    fn send_event(&self, event: DecodedEvent) -> Result<(), WatchError> {
        self.event_tx.send(event).map_err(|_| WatchError::ChannelClosed)
    }

    fn send_error(&self, err: WatchError) -> Result<(), WatchError> {
        tracing::debug!(error = %err, "Forwarding watch error");
        self.error_tx.send(err).map_err(|_| WatchError::ChannelClosed)
    }
}
