//! CLI entry point for dirwatch.
//!
//! This binary watches a directory tree and logs what happens in it, either by
//! consuming the raw event channel or by running registered handlers.
//!
//! # Usage
//!
//! ```bash
//! dirwatch [OPTIONS] <COMMAND>
//!
//! # Log every event below /srv/data, following new directories
//! dirwatch events /srv/data
//!
//! # Only directory and file creation
//! dirwatch events /srv/data --mask dir-created --mask file-created
//!
//! # Handler loop, settings from a file
//! dirwatch --config dirwatch.json handle
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{WrapErr, eyre};
use crossbeam_channel::{Receiver, Sender, select};
use dw_core::{Config, DispatchMode, EventMask, SemanticMask, WatchConfig, semantic};
use dw_watcher::{DecodedEvent, EventHandler, HandlerError, WatchError, Watcher};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Recursively watch a directory tree for filesystem changes.
#[derive(Parser)]
#[command(name = "dirwatch", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file.
    ///
    /// Command-line arguments override values from the file.
    #[arg(short, long, global = true, env = "DIRWATCH_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Options shared by both subcommands.
#[derive(clap::Args)]
struct WatchArgs {
    /// Directory to watch. Required unless set in the configuration file.
    #[arg(env = "DIRWATCH_ROOT")]
    dir: Option<Utf8PathBuf>,

    /// Named mask to watch for; repeat to combine. Replaces the configured mask.
    #[arg(short, long = "mask", value_name = "NAME")]
    masks: Vec<SemanticMask>,

    /// Watch only the directory itself, not the tree below it.
    #[arg(long)]
    no_recursive: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Log every event from the event channel.
    ///
    /// New directories are watched as they appear and removed directories
    /// are dropped. Exits when the watched directory is deleted or moved.
    Events {
        #[command(flatten)]
        watch: WatchArgs,
    },

    /// Run the handler loop.
    ///
    /// A directory handler watches every new directory. A logging handler
    /// registered for all events runs too when handlers are dispatched to
    /// every match.
    Handle {
        #[command(flatten)]
        watch: WatchArgs,

        /// Run every matching handler instead of the one registered under
        /// the producing watch's mask.
        #[arg(long)]
        all_matching: bool,
    },
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(level)
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Builds the watch configuration from the optional file and CLI arguments.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the resulting root is
/// missing or not a directory.
fn build_config(
    config_path: Option<&Utf8PathBuf>,
    args: &WatchArgs,
) -> color_eyre::Result<WatchConfig> {
    let mut config = match config_path {
        Some(path) => Config::load(path)
            .wrap_err_with(|| format!("Failed to load configuration from {path}"))?
            .watch,
        None => WatchConfig::default(),
    };

    if let Some(dir) = &args.dir {
        config.root.clone_from(dir);
    }
    if !args.masks.is_empty() {
        config.default_mask = SemanticMask::combine(args.masks.iter().copied());
    }
    if args.no_recursive {
        config.options.recursive = false;
    }

    if config.root.as_str().is_empty() {
        return Err(eyre!("No directory to watch: pass DIR or set watch.root in the configuration"));
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// What the event loop does after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Consumes the event channel until the root goes away or shutdown is signalled.
fn run_events(config: &WatchConfig, shutdown: &Receiver<()>) -> color_eyre::Result<()> {
    let watcher = Arc::new(Watcher::from_config(config)?);
    watcher.start_all()?;

    let events = watcher.events();
    let errors = watcher.errors();
    let _reader = watcher.spawn_watch()?;
    info!(root = %watcher.root(), watches = watcher.running_count(), "Waiting for events");

    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { break };
                if react(&watcher, &event) == Flow::Exit {
                    break;
                }
            }
            recv(errors) -> err => {
                if let Ok(err) = err {
                    warn!(error = %err, "Watch error");
                }
            }
            recv(shutdown) -> _ => break,
        }
    }

    info!(events = watcher.event_count(), "Event loop finished");
    Ok(())
}

/// Logs one event and keeps the watch set in step with the tree.
fn react(watcher: &Watcher, event: &DecodedEvent) -> Flow {
    debug!(
        name = event.name.as_deref().unwrap_or(""),
        path = %event.path,
        mask = %event.mask,
        watch = %event.watch.path,
        count = watcher.event_count(),
        running = watcher.running_count(),
        "Event"
    );

    if event.is_root_deletion(watcher.root()) {
        info!(path = %event.path, "Watched directory deleted");
        return Flow::Exit;
    }
    if event.is_root_moved(watcher.root()) {
        info!(path = %event.path, "Watched directory moved");
        return Flow::Exit;
    }

    if event.is_dir_created() {
        info!(path = %event.path, "Directory created");
        match watch_new_directory(watcher, &event.path, watcher.default_mask()) {
            Ok(()) => info!(path = %event.path, "Watch started for new directory"),
            Err(err) => warn!(path = %event.path, error = %err, "Failed to watch new directory"),
        }
    }
    if event.is_dir_removed() {
        info!(path = %event.path, "Directory removed");
        if let Err(err) = watcher.remove_watch(&event.path) {
            warn!(path = %event.path, error = %err, "Failed to remove watch");
        }
    }
    if event.is_file_created() {
        info!(path = %event.path, "File created");
    }
    if event.is_file_removed() {
        info!(path = %event.path, "File removed");
    }
    if event.is_file_changed() {
        info!(path = %event.path, "File changed");
    }

    Flow::Continue
}

/// Adds and starts a watch for a new directory, and for the tree under it
/// when the watcher is recursive.
///
/// Only watches this call adds are started. Stopped entries already in the
/// registry, such as directories the kernel dropped, are left alone.
fn watch_new_directory(
    watcher: &Watcher,
    dir: &Utf8Path,
    mask: EventMask,
) -> Result<(), WatchError> {
    watcher.add_watch(dir, mask)?;
    watcher.start_watch(dir)?;
    if !watcher.options().recursive {
        return Ok(());
    }

    let before = watcher.list_watches();
    watcher.recursive_add(dir, mask)?;

    let mut first_error = None;
    for path in watcher.list_watches() {
        if before.binary_search(&path).is_ok() {
            continue;
        }
        if let Err(err) = watcher.start_watch(&path) {
            warn!(path = %path, error = %err, "Failed to start watch");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Watches every directory created below the root.
struct DirectoryCreated {
    mask: EventMask,
}

impl EventHandler for DirectoryCreated {
    fn interest_mask(&self) -> EventMask {
        self.mask
    }

    fn matches(&self, event: &DecodedEvent) -> bool {
        event.is_dir_created()
    }

    fn handle(&self, watcher: &Watcher, event: &DecodedEvent) -> Result<(), HandlerError> {
        info!(path = %event.path, "Directory created");
        watch_new_directory(watcher, &event.path, self.mask)?;
        info!(path = %event.path, "Started watch");
        Ok(())
    }
}

/// Logs every event it sees.
struct LogEvents;

impl EventHandler for LogEvents {
    fn interest_mask(&self) -> EventMask {
        semantic::ALL_EVENTS
    }

    fn matches(&self, _event: &DecodedEvent) -> bool {
        true
    }

    fn handle(&self, _watcher: &Watcher, event: &DecodedEvent) -> Result<(), HandlerError> {
        info!(path = %event.path, mask = %event.mask, "Event");
        Ok(())
    }
}

/// Runs the handler loop and logs forwarded errors until shutdown.
fn run_handle(config: &WatchConfig, shutdown: &Receiver<()>) -> color_eyre::Result<()> {
    let watcher = Arc::new(Watcher::from_config(config)?);
    watcher.register_handler(DirectoryCreated {
        mask: config.default_mask,
    })?;
    if config.default_mask != semantic::ALL_EVENTS {
        watcher.register_handler(LogEvents)?;
    }
    watcher.start_all()?;

    let errors = watcher.errors();
    let _reader = watcher.spawn_watch_and_handle()?;
    info!(
        root = %watcher.root(),
        watches = watcher.running_count(),
        mode = ?config.options.dispatch_mode,
        "Handling events"
    );

    loop {
        select! {
            recv(errors) -> err => match err {
                Ok(err) => warn!(error = %err, "Watch error"),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }

    info!(events = watcher.event_count(), "Handler loop finished");
    Ok(())
}

/// Waits for the blocking consumer to finish or for SIGTERM / Ctrl-C.
///
/// On a signal the consumer is told to stop through `shutdown` and awaited.
async fn supervise(
    mut task: JoinHandle<color_eyre::Result<()>>,
    shutdown: Sender<()>,
) -> color_eyre::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        result = &mut task => return result?,
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl-C, shutting down");
        }
    }

    drop(shutdown);
    task.await?
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Route to the blocking consumer for the command
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
    let task = match &cli.command {
        Commands::Events { watch } => {
            let config = build_config(cli.config.as_ref(), watch)?;
            tokio::task::spawn_blocking(move || run_events(&config, &shutdown_rx))
        }
        Commands::Handle {
            watch,
            all_matching,
        } => {
            let mut config = build_config(cli.config.as_ref(), watch)?;
            if *all_matching {
                config.options.dispatch_mode = DispatchMode::AllMatching;
            }
            tokio::task::spawn_blocking(move || run_handle(&config, &shutdown_rx))
        }
    };

    supervise(task, shutdown_tx).await
}
