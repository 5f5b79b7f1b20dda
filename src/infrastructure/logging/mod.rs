//! Logging setup
//!
//! `tracing` subscriber initialisation, the daily rotating file writer and
//! context-scoped log helpers.

pub mod file_writer;
pub mod scope;

pub use file_writer::DailyFileWriter;
pub use scope::{detach, span, trace_id, with_span, with_trace_id};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match (&config.directory, config.format) {
        (Some(directory), LogFormat::Json) => {
            let writer = DailyFileWriter::shared(directory, &config.prefix)?;
            builder.json().with_writer(writer).try_init()
        }
        (Some(directory), LogFormat::Pretty) => {
            let writer = DailyFileWriter::shared(directory, &config.prefix)?;
            builder.with_ansi(false).with_writer(writer).try_init()
        }
        (None, LogFormat::Json) => builder.json().try_init(),
        (None, LogFormat::Pretty) => builder.try_init(),
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}
