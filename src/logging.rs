use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn rotation(name: &str) -> Rotation {
    match name {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Default directives when `RUST_LOG` is unset. sqlx logs every statement
/// at info and reqwest/hyper are chatty at debug.
fn default_directives(level: &str) -> String {
    format!("{},sqlx=warn,hyper=warn,reqwest=info", level)
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);

    // JSON goes to the file only; the console stays human-readable
    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .with(fmt::layer().with_target(false).compact())
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .with(fmt::layer().with_target(false))
            .init();
    }

    guard
}
