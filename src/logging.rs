use tracing_subscriber::{fmt, EnvFilter};

/// How chatty the process is about its own work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    /// Resolved configuration and run summaries.
    Verbose,
    /// Every line read and every record parsed.
    Debug,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, debug: bool) -> Verbosity {
        if debug {
            Verbosity::Debug
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        }
    }

    fn directive(&self) -> &'static str {
        match *self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// command-line flags. Diagnostics go to stderr so `info` output stays
/// clean on stdout.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_wins_over_verbose() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, false).directive(), "warn");
    }
}
