//! Routing decoded events to handlers.
//!
//! Handlers are keyed by their interest mask: at most one handler per exact
//! mask value. How an event picks its handlers is set by [`DispatchMode`]:
//!
//! - [`DispatchMode::ExactMask`]: the handler whose interest mask equals the
//!   mask of the watch that produced the event, if its
//!   [`matches`](EventHandler::matches) passes
//! - [`DispatchMode::AllMatching`]: every handler, in registration order,
//!   whose [`matches`](EventHandler::matches) passes
//!
//! Handlers are cloned out of the table before they run, so a handler may
//! add watches or register other handlers from inside [`EventHandler::handle`].

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use dw_core::{DispatchMode, EventMask, check_mask};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::error::WatchError;
use crate::events::DecodedEvent;
use crate::watcher::Watcher;

/// Opaque error returned by a handler.
pub type HandlerError = Box<dyn Error + Send + Sync + 'static>;

/// Consumer logic invoked for decoded events.
///
/// # Examples
///
/// ```
/// use dw_watcher::{DecodedEvent, EventHandler, HandlerError, Watcher};
/// use dw_core::{EventMask, semantic};
///
/// struct NewDirectories;
///
/// impl EventHandler for NewDirectories {
///     fn interest_mask(&self) -> EventMask {
///         semantic::DIR_CREATED
///     }
///
///     fn matches(&self, event: &DecodedEvent) -> bool {
///         event.is_dir_created()
///     }
///
///     fn handle(&self, watcher: &Watcher, event: &DecodedEvent) -> Result<(), HandlerError> {
///         watcher.add_watch(&event.path, semantic::DIR_CREATED)?;
///         watcher.start_watch(&event.path)?;
///         Ok(())
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync + 'static {
    /// The mask this handler is registered under.
    fn interest_mask(&self) -> EventMask;

    /// Returns `true` if this handler wants `event`.
    ///
    /// Defaults to an any-bit test of the interest mask against the event's
    /// raw mask.
    fn matches(&self, event: &DecodedEvent) -> bool {
        check_mask(self.interest_mask(), event.mask)
    }

    /// Handles one event.
    fn handle(&self, watcher: &Watcher, event: &DecodedEvent) -> Result<(), HandlerError>;
}

type Filter = Box<dyn Fn(&DecodedEvent) -> bool + Send + Sync>;

/// An [`EventHandler`] built from closures.
///
/// # Examples
///
/// ```
/// use dw_watcher::FnHandler;
/// use dw_core::semantic;
///
/// let handler = FnHandler::new(semantic::FILE_CHANGED, |_watcher, event| {
///     tracing::info!(path = %event.path, "changed");
///     Ok(())
/// })
/// .with_filter(|event| event.is_file_changed());
/// ```
pub struct FnHandler<F> {
    mask: EventMask,
    filter: Option<Filter>,
    handle: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Watcher, &DecodedEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    /// Creates a handler registered under `mask` that runs `handle`.
    pub fn new(mask: EventMask, handle: F) -> Self {
        Self {
            mask,
            filter: None,
            handle,
        }
    }

    /// Replaces the default any-bit test with `filter`.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl Fn(&DecodedEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("mask", &self.mask)
            .field("filtered", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Watcher, &DecodedEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn interest_mask(&self) -> EventMask {
        self.mask
    }

    fn matches(&self, event: &DecodedEvent) -> bool {
        self.filter
            .as_ref()
            .map_or_else(|| check_mask(self.mask, event.mask), |filter| filter(event))
    }

    fn handle(&self, watcher: &Watcher, event: &DecodedEvent) -> Result<(), HandlerError> {
        (self.handle)(watcher, event)
    }
}

/// The handler table.
pub struct Dispatcher {
    mode: DispatchMode,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode)
            .field("masks", &self.masks())
            .finish()
    }
}

impl Dispatcher {
    /// Creates an empty table using `mode` for selection.
    #[must_use]
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            mode,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Returns the selection policy.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Adds `handler` under its interest mask.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::HandlerExists`] if a handler already holds that
    /// exact mask.
    pub fn register(&self, handler: impl EventHandler) -> Result<(), WatchError> {
        self.register_shared(Arc::new(handler))
    }

    /// Adds a shared handler under its interest mask.
    pub fn register_shared(&self, handler: Arc<dyn EventHandler>) -> Result<(), WatchError> {
        let mask = handler.interest_mask();
        let mut handlers = self.handlers.write();
        if handlers.iter().any(|existing| existing.interest_mask() == mask) {
            return Err(WatchError::HandlerExists(mask));
        }
        handlers.push(handler);
        tracing::debug!(mask = %mask, "Registered handler");
        Ok(())
    }

    /// Removes the handler registered under `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::HandlerNotFound`] if no handler holds `mask`.
    pub fn unregister(&self, mask: EventMask) -> Result<(), WatchError> {
        let mut handlers = self.handlers.write();
        let index = handlers
            .iter()
            .position(|handler| handler.interest_mask() == mask)
            .ok_or(WatchError::HandlerNotFound(mask))?;
        handlers.remove(index);
        tracing::debug!(mask = %mask, "Unregistered handler");
        Ok(())
    }

    /// Returns `true` if a handler holds exactly `mask`.
    #[must_use]
    pub fn contains(&self, mask: EventMask) -> bool {
        self.handlers
            .read()
            .iter()
            .any(|handler| handler.interest_mask() == mask)
    }

    /// Returns the registered masks in registration order.
    #[must_use]
    pub fn masks(&self) -> Vec<EventMask> {
        self.handlers
            .read()
            .iter()
            .map(|handler| handler.interest_mask())
            .collect()
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Returns the handlers that should run for `event`, in registration order.
    #[must_use]
    pub fn select(&self, event: &DecodedEvent) -> SmallVec<[Arc<dyn EventHandler>; 2]> {
        let candidates: SmallVec<[Arc<dyn EventHandler>; 2]> = {
            let handlers = self.handlers.read();
            match self.mode {
                DispatchMode::ExactMask => handlers
                    .iter()
                    .find(|handler| handler.interest_mask() == event.watch.mask)
                    .map(Arc::clone)
                    .into_iter()
                    .collect(),
                DispatchMode::AllMatching => handlers.iter().map(Arc::clone).collect(),
            }
        };

        candidates
            .into_iter()
            .filter(|handler| handler.matches(event))
            .collect()
    }

    /// Runs every selected handler for `event` and returns their failures.
    ///
    /// An event no handler selects is dropped.
    pub fn dispatch(&self, watcher: &Watcher, event: &DecodedEvent) -> SmallVec<[WatchError; 1]> {
        let mut errors = SmallVec::new();
        let selected = self.select(event);
        if selected.is_empty() {
            tracing::trace!(path = %event.path, mask = %event.mask, "No handler for event");
        }

        for handler in selected {
            if let Err(source) = handler.handle(watcher, event) {
                let mask = handler.interest_mask();
                tracing::warn!(mask = %mask, path = %event.path, error = %source, "Handler failed");
                errors.push(WatchError::handler(mask, source));
            }
        }
        errors
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchMode::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use camino::Utf8PathBuf;
    use dw_core::{DEFAULT_WATCH_MASK, WatcherOptions, semantic};
    use tempfile::TempDir;

    use super::*;
    use crate::events::WatchRef;
    use crate::session::WatchId;
    use crate::testing::ScriptedSession;

    fn watcher(mode: DispatchMode) -> (TempDir, Watcher) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let options = WatcherOptions::default().with_dispatch_mode(mode);
        let watcher = Watcher::with_session(
            Arc::new(ScriptedSession::new()),
            &root,
            DEFAULT_WATCH_MASK,
            options,
        )
        .unwrap();
        (dir, watcher)
    }

    fn event(mask: EventMask, watch_mask: EventMask) -> DecodedEvent {
        DecodedEvent {
            name: Some("entry".to_owned()),
            path: Utf8PathBuf::from("/srv/data/entry"),
            mask,
            cookie: None,
            watch: WatchRef {
                id: WatchId::new(1),
                path: Utf8PathBuf::from("/srv/data"),
                mask: watch_mask,
            },
        }
    }

    fn counting(mask: EventMask, calls: &Arc<AtomicUsize>) -> impl EventHandler {
        let calls = Arc::clone(calls);
        FnHandler::new(mask, move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_register_duplicate_mask() {
        let dispatcher = Dispatcher::default();
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register(counting(semantic::DIR_CREATED, &calls)).unwrap();

        let err = dispatcher
            .register(counting(semantic::DIR_CREATED, &calls))
            .unwrap_err();
        assert!(matches!(err, WatchError::HandlerExists(mask) if mask == semantic::DIR_CREATED));
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn test_unregister_missing_mask() {
        let dispatcher = Dispatcher::default();
        let err = dispatcher.unregister(semantic::FILE_CHANGED).unwrap_err();
        assert!(matches!(err, WatchError::HandlerNotFound(_)));
    }

    #[test]
    fn test_unregister_then_register_again() {
        let dispatcher = Dispatcher::default();
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.register(counting(semantic::FILE_CHANGED, &calls)).unwrap();
        dispatcher.unregister(semantic::FILE_CHANGED).unwrap();
        assert!(dispatcher.is_empty());
        dispatcher.register(counting(semantic::FILE_CHANGED, &calls)).unwrap();
        assert!(dispatcher.contains(semantic::FILE_CHANGED));
    }

    #[test]
    fn test_exact_mask_selects_by_watch_mask() {
        let (_dir, watcher) = watcher(DispatchMode::ExactMask);
        let dir_calls = Arc::new(AtomicUsize::new(0));
        let file_calls = Arc::new(AtomicUsize::new(0));
        watcher
            .register_handler(counting(semantic::DIR_CREATED, &dir_calls))
            .unwrap();
        watcher
            .register_handler(counting(semantic::FILE_CREATED, &file_calls))
            .unwrap();

        let created = event(EventMask::CREATED, semantic::FILE_CREATED);
        assert!(watcher.dispatcher().dispatch(&watcher, &created).is_empty());
        assert_eq!(file_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dir_calls.load(Ordering::SeqCst), 0);

        let unowned = event(EventMask::CREATED, semantic::ALL_EVENTS);
        assert!(watcher.dispatcher().select(&unowned).is_empty());
    }

    #[test]
    fn test_exact_mask_respects_matches() {
        let dispatcher = Dispatcher::new(DispatchMode::ExactMask);
        let handler = FnHandler::new(semantic::DIR_CREATED, |_, _| Ok(()))
            .with_filter(DecodedEvent::is_dir_created);
        dispatcher.register(handler).unwrap();

        let file = event(EventMask::CREATED, semantic::DIR_CREATED);
        assert!(dispatcher.select(&file).is_empty());

        let dir = event(EventMask::CREATED | EventMask::IS_DIR, semantic::DIR_CREATED);
        assert_eq!(dispatcher.select(&dir).len(), 1);
    }

    #[test]
    fn test_all_matching_runs_every_match_in_order() {
        let dispatcher = Dispatcher::new(DispatchMode::AllMatching);
        for mask in [semantic::FILE_CREATED, semantic::FILE_CHANGED, semantic::ROOT_EVENT] {
            dispatcher
                .register(FnHandler::new(mask, |_, _| Ok(())))
                .unwrap();
        }

        let both = event(EventMask::CREATED | EventMask::MODIFIED, semantic::ALL_EVENTS);
        let selected: Vec<_> = dispatcher
            .select(&both)
            .iter()
            .map(|handler| handler.interest_mask())
            .collect();
        assert_eq!(selected, vec![semantic::FILE_CREATED, semantic::FILE_CHANGED]);
    }

    #[test]
    fn test_handler_errors_are_wrapped() {
        let (_dir, watcher) = watcher(DispatchMode::AllMatching);
        watcher
            .register_handler(FnHandler::new(semantic::FILE_CREATED, |_, _| {
                Err("disk full".into())
            }))
            .unwrap();

        let created = event(EventMask::CREATED, semantic::FILE_CREATED);
        let errors = watcher.dispatcher().dispatch(&watcher, &created);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            WatchError::Handler { mask, .. } if *mask == semantic::FILE_CREATED
        ));
        assert!(errors[0].is_recoverable());
    }

    #[test]
    fn test_handler_may_register_handlers() {
        let (_dir, watcher) = watcher(DispatchMode::AllMatching);
        watcher
            .register_handler(FnHandler::new(semantic::FILE_CREATED, |watcher, _| {
                watcher.register_handler(FnHandler::new(semantic::FILE_REMOVED, |_, _| Ok(())))?;
                Ok(())
            }))
            .unwrap();

        let created = event(EventMask::CREATED, semantic::FILE_CREATED);
        assert!(watcher.dispatcher().dispatch(&watcher, &created).is_empty());
        assert!(watcher.dispatcher().contains(semantic::FILE_REMOVED));
    }

    #[test]
    fn test_default_matches_is_any_bit() {
        struct Plain;

        impl EventHandler for Plain {
            fn interest_mask(&self) -> EventMask {
                semantic::FILE_REMOVED
            }

            fn handle(
                &self,
                _watcher: &Watcher,
                _event: &DecodedEvent,
            ) -> Result<(), HandlerError> {
                Ok(())
            }
        }

        assert!(Plain.matches(&event(EventMask::MOVED_FROM, semantic::FILE_REMOVED)));
        assert!(!Plain.matches(&event(EventMask::CREATED, semantic::FILE_REMOVED)));
    }
}
