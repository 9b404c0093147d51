//! Logging setup for measuresync.
//!
//! Every agent outcome (buffered, synced, failed, skipped) is reported
//! through `tracing`; this module installs the subscriber that prints it.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the agent reports, selected with `-q`, `-v` and `-vv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Storage faults and aborted passes only.
    Quiet,
    /// Buffered and synced records, delivery and capture failures.
    #[default]
    Normal,
    /// Adds deferred records and per-pass detail.
    Verbose,
    /// Everything, including HTTP client internals.
    Trace,
}

impl Verbosity {
    /// Level applied to the `measuresync` target.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// Build the default filter directive for a verbosity level.
///
/// Our own crate logs at the requested level; dependencies stay at `warn`
/// unless the user asks for trace output.
#[must_use]
pub fn default_directive(verbosity: Verbosity) -> String {
    let level = verbosity.to_level_filter();
    match verbosity {
        Verbosity::Trace => format!("measuresync={level},reqwest={level},hyper=debug"),
        Verbosity::Quiet => format!("measuresync={level}"),
        _ => format!("warn,measuresync={level}"),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `verbosity`. Targets are shown from
/// `-vv` on, where dependency output is mixed in.
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let show_target = verbosity == Verbosity::Trace;

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(show_target)
            .with_file(false)
            .with_line_number(false),
    );

    // A subscriber may already be installed (tests, embedding)
    let _ = subscriber.try_init();
}

/// Route warnings into the test harness output.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
