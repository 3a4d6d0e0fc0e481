//! Core types for the dirwatch workspace.
//!
//! This crate provides the foundational types shared by the watcher and the CLI:
//!
//! - [`EventMask`] and the [`semantic`] mask table
//! - Configuration structures ([`Config`], [`WatchConfig`], [`WatcherOptions`])
//! - [`ConfigError`] for configuration loading and validation

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod mask;

pub use config::{Config, DEFAULT_WATCH_MASK, DispatchMode, WatchConfig, WatcherOptions};
pub use error::ConfigError;
pub use mask::{EventMask, SemanticMask, check_mask, semantic};
