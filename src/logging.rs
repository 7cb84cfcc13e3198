use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "git_hook_dispatch";

/// Where log output goes besides the console
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_directory: Option<PathBuf>,
    pub rotation: Rotation,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_directory: None,
            rotation: Rotation::DAILY,
        }
    }
}

impl LogConfig {
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_directory = Some(dir.into());
        self
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive for as long as file output should be flushed.
pub fn setup_logging(config: &LogConfig) -> std::io::Result<Option<WorkerGuard>> {
    let console = tracing_subscriber::fmt::layer().with_filter(env_filter());

    let Some(dir) = &config.log_directory else {
        tracing_subscriber::registry().with(console).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let file_appender = RollingFileAppender::new(config.rotation.clone(), dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
        .init();

    Ok(Some(guard))
}
