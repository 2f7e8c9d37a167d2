//! Initialization of logging.

use std::env;
use std::io::IsTerminal;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{LogFormat, Logging};

/// Installs the global tracing subscriber, writing to stderr.
pub fn init_tracing(logging: &Logging) {
    let (level, env_filter) = parse_rust_log(logging.level);

    let format = match logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let fmt_layer = match format {
        LogFormat::Json => fmt_layer.json().flatten_event(true).boxed(),
        LogFormat::Simplified => fmt_layer.with_ansi(false).boxed(),
        LogFormat::Pretty | LogFormat::Auto => fmt_layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(level))
        .with(env_filter)
        .init();
}

/// Determines the maximum level and the filter directives from `RUST_LOG`.
///
/// A plain level in `RUST_LOG` replaces the configured level. Any other value is used literally as
/// filter, with all levels enabled.
pub fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => LevelFilter::from(level),
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        csm_loadtest=TRACE,\
        csm_client=TRACE,\
        csm_types=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_level_overrides_configured() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let (level, _) = parse_rust_log(LevelFilter::WARN);
            assert_eq!(level, LevelFilter::WARN);

            jail.set_env("RUST_LOG", "debug");
            let (level, _) = parse_rust_log(LevelFilter::WARN);
            assert_eq!(level, LevelFilter::DEBUG);

            jail.set_env("RUST_LOG", "csm_client=trace,reqwest=debug");
            let (level, filter) = parse_rust_log(LevelFilter::WARN);
            assert_eq!(level, LevelFilter::TRACE);
            assert!(filter.to_string().contains("csm_client=trace"));

            Ok(())
        });
    }
}
