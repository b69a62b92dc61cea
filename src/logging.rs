use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Held at `warn` unless the filter names them explicitly.
const QUIET_TARGETS: &[&str] = &["tokio_cron_scheduler=warn", "hyper=warn"];

const DEFAULT_LOG_FILE: &str = "scheduler.log";

/// Keeps the background file writer alive; dropping it flushes pending lines.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Builds the filter for `log_level`. A bare level such as `debug` applies to
/// this crate and keeps the noisy dependency targets quiet; a full directive
/// list is taken as written.
pub fn build_filter(log_level: &str) -> EnvFilter {
    let level = log_level.trim();
    let directives = if level.is_empty() {
        format!("info,microquiz_backend=info,{}", QUIET_TARGETS.join(","))
    } else if level.contains('=') {
        level.to_string()
    } else {
        format!("{level},microquiz_backend={level},{}", QUIET_TARGETS.join(","))
    };

    EnvFilter::try_new(&directives).unwrap_or_else(|err| {
        eprintln!("invalid log filter {log_level:?}: {err}, falling back to info");
        EnvFilter::new(format!("info,{}", QUIET_TARGETS.join(",")))
    })
}

pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = build_filter(log_level);
    let stdout_layer = fmt::layer().with_target(true);

    if file_logging_enabled() {
        let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        let file_name = std::env::var("LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, file_name);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                let file_layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(true);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer)
                    .init();

                return Some(FileLogGuard { _guard: guard });
            }
            Err(err) => eprintln!("failed to create log directory {log_dir}: {err}"),
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();

    None
}
