use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

/// The name of log files, a date suffix is added per rotation.
pub const LOG_FILE_NAME: &str = "serial-bridge.log";

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy()
}

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) -> bool {
    let mut message = String::from("Logging with: stdout");

    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(env_filter(stdout_level));

    let maybe_file_layer = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, LOG_FILE_NAME);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_filter(env_filter(level));
        Some(file_layer)
    } else {
        None
    };

    // Someone else (a test harness, say) may already have installed a subscriber.
    let installed = tracing_subscriber::registry()
        .with(stdout_layer)
        .with(maybe_file_layer)
        .try_init()
        .is_ok();

    debug!(message);

    installed
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub async fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // To avoid race condition between the `.read()` and the
        // `.write()`.
        if *initialized {
            return;
        }

        if do_init(stdout_level, file_logging) {
            info!("Logging initialized");
        }

        *initialized = true;
    }
}
