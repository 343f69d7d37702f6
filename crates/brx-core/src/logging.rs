//! File logging for brx
//!
//! Terminal output belongs to the run event renderer, so tracing only ever
//! writes to a daily log under the platform data dir. `BRX_LOG` takes an
//! `EnvFilter` directive, e.g. `BRX_LOG=brx_device=trace brx devices`.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

pub const LOG_ENV: &str = "BRX_LOG";

const LOG_FILE_PREFIX: &str = "brx.log";

const DEFAULT_DIRECTIVES: &str = "brx=info,brx_core=info,brx_device=info,brx_app=info,warn";

/// Install the global subscriber. Fails only if the log dir cannot be created.
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    tracing_subscriber::registry()
        .with(filter(std::env::var(LOG_ENV).ok().as_deref()))
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!(
        "brx {} started, logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );
    Ok(())
}

/// `BRX_LOG` directives, or the defaults when unset or unparsable
fn filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// `<data_local_dir>/brx/logs`
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("brx")
        .join("logs")
}
