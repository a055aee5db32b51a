use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(config));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true) // Keep target in JSON for structured queries
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().json().with_target(true).with_ansi(false);
        registry.with(file_layer).with(stdout_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => rolling::daily(&config.log_dir, &config.log_file),
        _ => rolling::never(&config.log_dir, &config.log_file),
    }
}

/// Without `enable_tracing`, per-query sqlx logging is muted
fn filter_directive(config: &AppConfig) -> String {
    if config.enable_tracing {
        config.log_level.clone()
    } else {
        format!("{},sqlx=warn", config.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enable_tracing: bool) -> AppConfig {
        let mut config = AppConfig::from_yaml(
            "log_level: debug\nlog_dir: ./logs\nlog_file: dp.log\nuse_json: false\n\
             rotation: never\nenable_tracing: false\ngateway: {host: 127.0.0.1, port: 0}\n",
        )
        .unwrap();
        config.enable_tracing = enable_tracing;
        config
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(&config(true)), "debug");
        assert_eq!(
            filter_directive(&config(false)),
            "debug,sqlx=warn"
        );
        assert!(EnvFilter::try_new(filter_directive(&config(false))).is_ok());
    }
}
