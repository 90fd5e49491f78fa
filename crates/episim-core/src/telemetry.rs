//! Global tracing subscriber for EpiSim binaries.
//!
//! Logs always go to stderr: `episim` prints reports and histories on stdout,
//! and artifact entrypoints must be able to pipe that output unmodified.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Shape of emitted log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// Newline-delimited JSON, one event per line.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Filter used when `RUST_LOG` is unset: `level` for EpiSim crates, warnings
/// for everything else.
fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    EnvFilter::new(format!("warn,episim_core={level},episim={level}"))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. Returns `false` if a subscriber
/// was already installed, in which case nothing changes.
pub fn init_tracing(format: LogFormat, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
    };
    installed.is_ok()
}
