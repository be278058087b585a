//! Tracing subscriber setup for the `din` binary.

use tracing_subscriber::EnvFilter;

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    /// Filter directive for this verbosity.
    ///
    /// Dependencies stay at `warn` except in debug mode; container output
    /// forwarded by setup is logged under `din::container`.
    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn,docker_inside=info,din=info",
            Verbosity::Verbose => "warn,docker_inside=debug,din=debug",
            Verbosity::Debug => "debug,docker_inside=trace,din=trace",
        }
    }
}

/// Install the global subscriber, writing to stderr. `RUST_LOG` overrides `verbosity`.
pub fn init(verbosity: Verbosity) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity == Verbosity::Debug)
        .init();
}
