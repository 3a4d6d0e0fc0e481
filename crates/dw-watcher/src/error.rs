//! Error types for the dw-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while building the watch registry, decoding kernel records, and
//! dispatching events to handlers.

use std::io;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use dw_core::EventMask;

use crate::dispatcher::HandlerError;
use crate::session::WatchId;

/// Errors that can occur during watching operations.
///
/// # Error Recovery Strategy
///
/// - **Session init** ([`WatchError::SessionInit`]): Fatal - no watcher exists
/// - **Registry errors** (`PathNotFound`, `AlreadyWatched`, `NotFound`,
///   `AlreadyRunning`, `NotRunning`, `StartFailed`, `StopFailed`): returned to
///   the caller of the operation; the registry is left as it was before the
///   failing step
/// - **Decode errors** (`IncompleteRead`, `Read`, `UnknownHandle`,
///   `TruncatedRecord`, `QueueOverflow`, `NonUtf8Path`): Recoverable - sent on
///   the error channel, the read loop continues
/// - **Handler errors** ([`WatchError::Handler`]): Recoverable - forwarded on
///   the error channel, never swallowed
///
/// # Examples
///
/// ```
/// use dw_watcher::WatchError;
/// use camino::Utf8PathBuf;
///
/// let err = WatchError::AlreadyWatched(Utf8PathBuf::from("/srv/data"));
/// assert!(err.is_fatal());
/// assert_eq!(err.path().map(|p| p.as_str()), Some("/srv/data"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The kernel notification session could not be created.
    #[error("failed to initialize notification session: {0}")]
    SessionInit(#[source] io::Error),

    /// The path does not exist on disk.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// A watch for this exact path is already registered.
    #[error("path is already watched: {0}")]
    AlreadyWatched(Utf8PathBuf),

    /// No watch is registered for this path.
    #[error("no watch registered for path: {0}")]
    NotFound(Utf8PathBuf),

    /// The watch was started twice.
    #[error("watch is already running: {0}")]
    AlreadyRunning(Utf8PathBuf),

    /// The watch was stopped while not running.
    #[error("watch is not running: {0}")]
    NotRunning(Utf8PathBuf),

    /// The kernel refused to add the watch.
    #[error("failed to start watch on {path}: {source}")]
    StartFailed {
        /// The path that could not be watched.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The kernel refused to remove the watch.
    #[error("failed to stop watch on {path}: {source}")]
    StopFailed {
        /// The path whose watch could not be removed.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A read returned fewer bytes than one record header.
    #[error("incomplete event read: got {0} bytes")]
    IncompleteRead(usize),

    /// Reading from the notification session failed.
    #[error("failed to read events: {0}")]
    Read(#[source] io::Error),

    /// A record named a watch id the registry does not know.
    #[error("no watch registered for watch id {0}")]
    UnknownHandle(WatchId),

    /// A record's name extends past the end of the read buffer.
    #[error("truncated event record at offset {offset}: needs {needed} bytes, read {available}")]
    TruncatedRecord {
        /// Offset of the record header in the buffer.
        offset: usize,
        /// Bytes needed to hold the record.
        needed: usize,
        /// Bytes actually read.
        available: usize,
    },

    /// The kernel queue overflowed and events were lost.
    #[error("kernel event queue overflowed, events were dropped")]
    QueueOverflow,

    /// A path is not valid UTF-8.
    ///
    /// This crate uses UTF-8 paths throughout. Records naming a non-UTF-8
    /// entry are reported and skipped.
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// A handler is already registered under this exact mask.
    #[error("a handler is already registered for mask {0}")]
    HandlerExists(EventMask),

    /// No handler is registered under this mask.
    #[error("no handler registered for mask {0}")]
    HandlerNotFound(EventMask),

    /// A handler returned an error.
    #[error("handler for mask {mask} failed: {source}")]
    Handler {
        /// Interest mask of the failing handler.
        mask: EventMask,
        /// The error the handler returned.
        #[source]
        source: HandlerError,
    },

    /// An I/O error occurred while walking a directory tree.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An output channel was disconnected.
    ///
    /// A [`Watcher`](crate::Watcher) keeps its own receivers alive, so its
    /// read loops do not produce this while the watcher exists.
    #[error("event channel closed unexpectedly")]
    ChannelClosed,
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Creates a new [`WatchError::NonUtf8Path`] error.
    #[inline]
    pub fn non_utf8_path(path: impl Into<PathBuf>) -> Self {
        Self::NonUtf8Path(path.into())
    }

    /// Wraps an error returned by the handler registered under `mask`.
    #[inline]
    pub fn handler(mask: EventMask, source: impl Into<HandlerError>) -> Self {
        Self::Handler {
            mask,
            source: source.into(),
        }
    }

    /// Returns `true` if the read loop keeps running after this error.
    ///
    /// Per-record decode failures, read failures, and handler failures are
    /// recoverable. Everything else belongs to a synchronous operation whose
    /// caller must decide what to do.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::IncompleteRead(_)
                | Self::Read(_)
                | Self::UnknownHandle(_)
                | Self::TruncatedRecord { .. }
                | Self::QueueOverflow
                | Self::NonUtf8Path(_)
                | Self::Handler { .. }
        )
    }

    /// Returns `true` if this error is fatal to the operation that raised it.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the watched path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path)
            | Self::AlreadyWatched(path)
            | Self::NotFound(path)
            | Self::AlreadyRunning(path)
            | Self::NotRunning(path)
            | Self::StartFailed { path, .. }
            | Self::StopFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_error_path_not_found() {
        let err = WatchError::path_not_found("/srv/missing");
        assert!(err.is_fatal());
        assert_eq!(err.path().map(|p| p.as_str()), Some("/srv/missing"));
        assert_eq!(err.to_string(), "path does not exist: /srv/missing");
    }

    #[test]
    fn test_watch_error_decode_errors_are_recoverable() {
        assert!(WatchError::IncompleteRead(3).is_recoverable());
        assert!(WatchError::UnknownHandle(WatchId::new(7)).is_recoverable());
        assert!(WatchError::QueueOverflow.is_recoverable());
        assert!(
            WatchError::TruncatedRecord {
                offset: 0,
                needed: 32,
                available: 20
            }
            .is_recoverable()
        );
        assert!(WatchError::non_utf8_path("bad").is_recoverable());
    }

    #[test]
    fn test_watch_error_registry_errors_are_fatal() {
        let path = Utf8PathBuf::from("/srv/data");
        assert!(WatchError::AlreadyWatched(path.clone()).is_fatal());
        assert!(WatchError::NotFound(path.clone()).is_fatal());
        assert!(WatchError::AlreadyRunning(path.clone()).is_fatal());
        assert!(WatchError::NotRunning(path).is_fatal());
        assert!(WatchError::HandlerExists(EventMask::CREATED).is_fatal());
    }

    #[test]
    fn test_watch_error_handler_wraps_source() {
        let err = WatchError::handler(EventMask::CREATED, "disk full");
        assert!(err.is_recoverable());
        assert!(err.path().is_none());
        assert_eq!(err.to_string(), "handler for mask CREATED failed: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_watch_error_start_failed_display() {
        let err = WatchError::StartFailed {
            path: Utf8PathBuf::from("/srv/data"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        };
        assert_eq!(err.path().map(|p| p.as_str()), Some("/srv/data"));
        assert!(err.to_string().contains("access denied"));
    }
}
