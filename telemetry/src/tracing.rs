use std::path::PathBuf;
use std::sync::Once;

use config::Environment;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_log::log::SetLoggerError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Directory that, when set, receives daily rolling log files in addition to stdout.
const LOG_DIR_ENV_NAME: &str = "APP_LOG_DIR";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] std::io::Error),

    #[error("failed to redirect `log` records to tracing: {0}")]
    LogTracer(#[from] SetLoggerError),

    #[error("a global tracing subscriber is already installed: {0}")]
    GlobalDefault(#[from] SetGlobalDefaultError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the process exits, otherwise the tail of the log is lost.
#[must_use = "dropping the flusher stops the background log writer"]
pub struct LogFlusher {
    _guards: Vec<WorkerGuard>,
}

/// Installs the global tracing subscriber for `app_name`.
///
/// The filter comes from `RUST_LOG` and defaults to `info` for the binary and the engine. In
/// [`Environment::Dev`] lines are pretty printed to stdout. In [`Environment::Prod`] lines are
/// JSON formatted and written through a non blocking writer; if `APP_LOG_DIR` is set they are
/// also appended to a daily rolling file in that directory.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load().map_err(TracingError::Environment)?;

    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(app_name)));

    let mut guards = Vec::new();

    if environment.is_prod() {
        let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        guards.push(stdout_guard);

        let file_layer = log_dir().map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            fmt::layer().json().with_writer(writer)
        });

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(stdout))
            .with(file_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty());
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(LogFlusher { _guards: guards })
}

/// Installs a subscriber writing to the test harness output, once per test binary.
///
/// The filter comes from `RUST_LOG` and defaults to `websync=debug`. Later calls do nothing.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("websync=debug"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn default_directives(app_name: &str) -> String {
    format!("{}=info,websync=info", app_name.replace('-', "_"))
}

fn log_dir() -> Option<PathBuf> {
    std::env::var_os(LOG_DIR_ENV_NAME)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_use_crate_style_target() {
        assert_eq!(default_directives("syncer"), "syncer=info,websync=info");
        assert_eq!(
            default_directives("websync-job"),
            "websync_job=info,websync=info"
        );
    }
}
