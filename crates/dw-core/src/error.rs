//! Error types for the dw-core crate.
//!
//! [`ConfigError`] reports everything that can go wrong before a watcher is
//! built: reading and parsing the configuration file, resolving the watch
//! root, and turning mask names into event masks.

use camino::Utf8PathBuf;

/// Errors from loading a watch configuration or validating its root.
///
/// Root checks run once at startup. The kernel later reports a vanished root
/// as a watch event, not through this type.
///
/// # Examples
///
/// ```
/// use dw_core::ConfigError;
/// use camino::Utf8PathBuf;
///
/// let error = ConfigError::RootNotFound(Utf8PathBuf::from("/srv/data"));
/// assert_eq!(error.to_string(), "watch root does not exist: /srv/data");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No watch root was given in the file or on the command line.
    #[error("no watch root configured")]
    RootUnset,

    /// The watch root does not exist, so there is nothing to add a watch on.
    #[error("watch root does not exist: {0}")]
    RootNotFound(Utf8PathBuf),

    /// The watch root exists but is not a directory. Only directories are
    /// watched and walked.
    #[error("watch root is not a directory: {0}")]
    RootNotDirectory(Utf8PathBuf),

    /// A mask name matched none of the semantic mask labels.
    #[error("unknown event mask '{name}', expected one of: {expected}")]
    UnknownMask {
        /// The name as given.
        name: String,
        /// Comma-separated list of accepted labels.
        expected: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        /// The file that was opened.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON, or a field such as the
    /// default mask or dispatch mode has the wrong shape.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
