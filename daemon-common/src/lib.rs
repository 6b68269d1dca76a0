use clap::ValueEnum;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Verbosity accepted by every `--log-level` flag in the workspace.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Build the filter used by [`init_tracing`].
///
/// `RUST_LOG` takes precedence when it is set and parses; otherwise the
/// requested level applies to every target.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from(level).into()))
}

/// Install the global `tracing` subscriber for a binary.
///
/// Calling this twice is harmless; the second subscriber is ignored.
pub fn init_tracing(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init();
}

/// Spawn the process as a background daemon when `enable` is true.
///
/// This uses the [`daemonize`](https://docs.rs/daemonize) crate under the
/// hood. In tests or foreground runs pass `false` to skip daemonization.
pub fn maybe_daemonize(enable: bool) -> anyhow::Result<()> {
    if enable {
        daemonize::Daemonize::new()
            .start()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_is_info() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LevelFilter::from(LogLevel::default()), LevelFilter::INFO);
    }

    #[test]
    fn parses_from_cli_value() {
        let level = LogLevel::from_str("debug", true).unwrap();
        assert_eq!(level, LogLevel::Debug);
    }
}
