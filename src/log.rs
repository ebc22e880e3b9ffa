use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogSettings;

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter.
///
/// With a log directory configured, output goes to a daily rolling file and
/// the returned guard must be held until exit so buffered lines are flushed.
pub fn init_logging(settings: &LogSettings) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));

    match &settings.directory {
        Some(directory) => {
            let file_appender = rolling::daily(directory, &settings.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let installed = fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false) // no color codes in file
                .try_init()
                .is_ok();
            if !installed {
                debug!(%directory, "subscriber already installed, file logging skipped");
            }
            installed.then_some(guard)
        }
        None => {
            let installed = fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .is_ok();
            if !installed {
                debug!("subscriber already installed");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_reported_not_fatal() {
        let settings = LogSettings::default();
        assert!(init_logging(&settings).is_none());
        assert!(init_logging(&settings).is_none());
    }

    #[test]
    fn file_logging_is_skipped_once_a_subscriber_exists() {
        let dir = tempfile::tempdir().unwrap();
        let _ = init_logging(&LogSettings::default());
        let settings = LogSettings {
            directory: Some(dir.path().to_string_lossy().into_owned()),
            ..LogSettings::default()
        };
        assert!(init_logging(&settings).is_none());
    }
}
