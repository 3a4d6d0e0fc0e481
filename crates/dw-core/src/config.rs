//! Configuration structures for dirwatch.
//!
//! - [`WatcherOptions`] - Options a watcher consults at construction and
//!   whenever a watch is added
//! - [`DispatchMode`] - How the dispatcher picks handlers for an event
//! - [`WatchConfig`] - Root path, default mask, and options for one watcher
//! - [`Config`] - Root configuration, loadable from a JSON file
//!
//! All configuration types implement [`Default`] and deserialize with missing
//! fields filled from those defaults.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mask::{EventMask, semantic};

/// How the dispatcher selects handlers for a decoded event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Invoke the single handler whose interest mask equals the mask of the
    /// watch that produced the event, if its `matches` predicate passes.
    #[default]
    ExactMask,
    /// Invoke every handler, in registration order, whose `matches`
    /// predicate passes.
    AllMatching,
}

/// Options consumed by a watcher at construction and on every dynamic add.
///
/// # Examples
///
/// ```
/// use dw_core::{DispatchMode, WatcherOptions};
///
/// let options = WatcherOptions::default();
/// assert!(options.recursive);
/// assert!(!options.use_default_mask_for_new_watches);
/// assert_eq!(options.dispatch_mode, DispatchMode::ExactMask);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherOptions {
    /// Watch every directory below the root, not just the root.
    pub recursive: bool,

    /// Ignore the mask passed to `add` and use the watcher's default mask.
    pub use_default_mask_for_new_watches: bool,

    /// Handler selection policy for the dispatch loop.
    pub dispatch_mode: DispatchMode,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            use_default_mask_for_new_watches: false,
            dispatch_mode: DispatchMode::ExactMask,
        }
    }
}

impl WatcherOptions {
    /// Sets whether the watcher walks the tree below its root.
    #[must_use]
    pub const fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Sets whether dynamically added watches always use the default mask.
    #[must_use]
    pub const fn with_default_mask_for_new_watches(mut self, enabled: bool) -> Self {
        self.use_default_mask_for_new_watches = enabled;
        self
    }

    /// Sets the dispatch policy.
    #[must_use]
    pub const fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }
}

/// The mask a watcher applies when none is configured.
///
/// Directory and file creation/removal, file changes, and root events.
pub const DEFAULT_WATCH_MASK: EventMask = semantic::DIR_CREATED
    .union(semantic::DIR_REMOVED)
    .union(semantic::FILE_CHANGED)
    .union(semantic::ROOT_EVENT);

/// Configuration for a single watcher.
///
/// # Examples
///
/// ```
/// use dw_core::{WatchConfig, DEFAULT_WATCH_MASK};
///
/// let config = WatchConfig::default();
/// assert_eq!(config.default_mask, DEFAULT_WATCH_MASK);
/// assert!(config.options.recursive);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory to watch.
    pub root: Utf8PathBuf,

    /// Mask applied to the root and, when enabled, to every new watch.
    pub default_mask: EventMask,

    /// Watcher options.
    #[serde(flatten)]
    pub options: WatcherOptions,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::new(),
            default_mask: DEFAULT_WATCH_MASK,
            options: WatcherOptions::default(),
        }
    }
}

impl WatchConfig {
    /// Creates a configuration for `root` with default mask and options.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Checks that the root is set and names an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RootUnset`] if the root is empty,
    /// [`ConfigError::RootNotFound`] if it does not exist, and
    /// [`ConfigError::RootNotDirectory`] if it is not a directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_str().is_empty() {
            return Err(ConfigError::RootUnset);
        }
        if !self.root.exists() {
            return Err(ConfigError::RootNotFound(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(ConfigError::RootNotDirectory(self.root.clone()));
        }
        Ok(())
    }
}

/// Root configuration for dirwatch.
///
/// # Examples
///
/// ```
/// use dw_core::Config;
///
/// let json = r#"{"watch": {"root": "/srv/data", "recursive": false}}"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.watch.root, "/srv/data");
/// assert!(!config.watch.options.recursive);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watcher configuration.
    pub watch: WatchConfig,
}

impl Config {
    /// Parses a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path.as_std_path()).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?;
        Self::from_json(&contents)
    }
}
