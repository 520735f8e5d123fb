//! Logging setup
//!
//! Console output is controlled by [`LogLevel`]; a detailed debug log can be
//! written to a file next to it. User-facing progress messages are emitted
//! on the [`USER_TARGET`] target so the `user` level can show only those.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use clap::ValueEnum;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Target of messages meant for the person at the terminal
pub const USER_TARGET: &str = "user";

/// Default log file name
pub const LOG_FILE: &str = "app_client.log";

/// Dependencies that are too chatty below `warn`
const QUIET_DEPENDENCIES: &str = "hyper=warn,reqwest=warn,h2=warn,rustls=warn";

/// Console verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    /// No console logging
    Quiet,
    /// Progress messages and warnings only
    #[default]
    User,
    /// Key operational steps
    Normal,
    /// Everything, including dependency logs
    Verbose,
}

impl LogLevel {
    /// Default console filter directives, `None` when the console is off
    pub fn console_directives(self) -> Option<String> {
        match self {
            LogLevel::Quiet => None,
            LogLevel::User => Some(format!("warn,{}=info", USER_TARGET)),
            LogLevel::Normal => Some(format!("info,{}", QUIET_DEPENDENCIES)),
            LogLevel::Verbose => Some("debug".to_string()),
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` replaces the console directives when set. Calling this twice
/// is harmless; the second call leaves the first subscriber in place.
pub fn init(level: LogLevel, log_file: Option<&Path>) {
    let console = level.console_directives().map(|directives| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));
        let layer = fmt::layer().with_writer(std::io::stdout);
        match level {
            LogLevel::User => layer
                .without_time()
                .with_level(false)
                .with_target(false)
                .with_filter(filter)
                .boxed(),
            LogLevel::Verbose => layer.with_filter(filter).boxed(),
            _ => layer.with_target(false).with_filter(filter).boxed(),
        }
    });

    let mut file_error = None;
    let file = log_file.and_then(|path| match File::create(path) {
        Ok(file) => Some(file),
        Err(e) => {
            file_error = Some((path.display().to_string(), e));
            None
        }
    });
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(EnvFilter::new(format!("debug,{}", QUIET_DEPENDENCIES)))
    });
    let file_enabled = file_layer.is_some();

    if tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        return;
    }

    if let Some((path, e)) = file_error {
        tracing::warn!("Could not create log file '{}': {}", path, e);
    }
    match log_file {
        Some(path) if file_enabled => tracing::info!(
            "Logging initialized. Console level: {:?}. File logging (debug) to: {}",
            level,
            path.display()
        ),
        _ => tracing::info!("Logging initialized. Console level: {:?}. File logging disabled.", level),
    }
}
