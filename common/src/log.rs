use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

pub struct LogGuard {
    _file_appender_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Route the workspace crates' `tracing` output to a daily rolling file under `log_path`.
///
/// The returned guard flushes the non-blocking writer when dropped, keep it alive for the
/// lifetime of the process.
pub fn init_tan_logger(service: &str, id: u64, log_path: &str) -> anyhow::Result<LogGuard> {
    let (file_appender, file_appender_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(log_path, format!("tan-{}-{}.log", service, id)),
    );

    let fmt_layer = {
        // Trace our own crates, ignore third-party ones.
        let filter = Targets::new()
            .with_target("tan_common", tracing::Level::TRACE)
            .with_target("tan_storage", tracing::Level::TRACE)
            .with_target("tan_tests", tracing::Level::TRACE);

        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(filter)
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt_layer)
        .try_init()?;

    Ok(LogGuard {
        _file_appender_guard: file_appender_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_writes_to_log_dir() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().to_str().unwrap().to_string();
        let guard = init_tan_logger("storage", 1, &path).unwrap();
        tracing::info!(target: "tan_common", "logger initialized");
        drop(guard);

        let names = std::fs::read_dir(tempdir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert!(names.iter().any(|name| name.starts_with("tan-storage-1.log")));

        // A second global subscriber is refused instead of panicking.
        assert!(init_tan_logger("storage", 2, &path).is_err());
    }
}
