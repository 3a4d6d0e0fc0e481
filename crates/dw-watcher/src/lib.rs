//! Recursive directory watching over Linux inotify.
//!
//! This crate keeps a registry of watched directories, decodes the raw
//! inotify record stream into typed events, classifies them, and delivers
//! them either on a channel or to registered handlers.
//!
//! # Overview
//!
//! - [`Session`] / [`InotifySession`]: the kernel seam (add, remove, read)
//! - [`WatchRegistry`]: every watched path and its kernel watch id
//! - [`decoder`]: raw bytes to [`DecodedEvent`]s
//! - [`classify`]: semantic predicates over raw masks
//! - [`Dispatcher`]: routes events to [`EventHandler`]s
//! - [`Watcher`]: the facade tying them together
//!
//! # Crate Dependencies
//!
//! ```text
//! dw-cli ──► dw-watcher ──► dw-core
//! ```
//!
//! # Usage
//!
//! ## Channel Consumer
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
//! while let Ok(event) = events.recv() {
//!     if event.is_dir_created() {
//!         watcher.add_watch(&event.path, DEFAULT_WATCH_MASK)?;
//!         watcher.start_watch(&event.path)?;
//!     } else if event.is_root_deletion(watcher.root()) {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Handlers
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dw_core::{WatcherOptions, semantic};
//! use dw_watcher::{FnHandler, Watcher};
//!
//! # fn example() -> Result<(), dw_watcher::WatchError> {
//! let options = WatcherOptions::default();
//! let watcher = Arc::new(Watcher::new("/srv/data", semantic::DIR_CREATED, options)?);
//! watcher.register_handler(
//!     FnHandler::new(semantic::DIR_CREATED, |watcher, event| {
//!         watcher.add_watch(&event.path, semantic::DIR_CREATED)?;
//!         watcher.start_watch(&event.path)?;
//!         Ok(())
//!     })
//!     .with_filter(|event| event.is_dir_created()),
//! )?;
//! watcher.start_all()?;
//!
//! let errors = watcher.errors();
//! let _reader = watcher.spawn_watch_and_handle()?;
//! for err in errors {
//!     eprintln!("watch error: {err}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! The crate uses [`WatchError`] for all error cases. Errors raised inside
//! the read loops arrive on [`Watcher::errors`] and never stop the loop:
//!
//! ```
//! use dw_watcher::WatchError;
//!
//! fn handle_watch_error(err: WatchError) {
//!     if err.is_recoverable() {
//!         eprintln!("Warning: {}", err);
//!     } else {
//!         eprintln!("Fatal watcher error: {}", err);
//!     }
//! }
//! ```
//!
//! # Platform
//!
//! Linux only. Paths are UTF-8 throughout; entries with non-UTF-8 names are
//! reported as [`WatchError::NonUtf8Path`] and skipped.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod classify;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handle;
pub mod registry;
pub mod session;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use events::{DecodedBatch, DecodedEvent, WatchRef};

// Re-export registry types
pub use handle::WatchHandle;
pub use registry::WatchRegistry;
pub use session::{InotifySession, Session, WatchId};

// Re-export dispatch types
pub use dispatcher::{Dispatcher, EventHandler, FnHandler, HandlerError};

// Re-export watcher types
pub use watcher::Watcher;
