//! Logging and tracing setup.
//!
//! Library code only emits `tracing` events and `metrics` samples; the
//! binary installs a subscriber here. No metrics exporter is installed, so
//! samples are dropped unless an embedding application provides a recorder.

mod logging;

pub use logging::{LogFormat, LoggingConfig};

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes logging from config settings with env overrides.
///
/// # Errors
///
/// Returns an error if logging has already been initialized or the log file
/// cannot be opened.
pub fn init_from_settings(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    init(LoggingConfig::from_settings(Some(settings), verbose))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed or the log file
/// cannot be opened.
pub fn init(config: LoggingConfig) -> Result<()> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "observability already initialized".to_string(),
        });
    }

    let to_file = config.file.is_some();
    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(open_log_file(path)?),
        None => BoxMakeWriter::new(io::stderr),
    };
    let registry = tracing_subscriber::registry().with(config.filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_thread_names(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(writer)
                    .with_ansi(!to_file)
                    .with_target(to_file)
                    .with_thread_names(true),
            )
            .try_init(),
    };
    installed.map_err(init_error)?;

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "failed to mark observability initialized".to_string(),
        })
}

/// Opens the log file in append mode. `Arc<File>` is a `MakeWriter` because
/// `&File` is `Write`; each event is a single append.
fn open_log_file(path: &Path) -> Result<Arc<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: format!("{}: {e}", parent.display()),
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

    Ok(Arc::new(file))
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: e.to_string(),
    }
}
