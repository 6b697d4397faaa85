//! Tracing initialization for the atlas binary and embedders.

use crate::config::AtlasConfig;
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Initialize the global tracing subscriber from configuration. `RUST_LOG`
/// wins over the configured level; a configured log file adds a non-ANSI
/// file layer next to the console output.
///
/// Returns the appender guard when file logging is active; hold it for the
/// process lifetime or buffered lines are lost.
pub fn init_tracing(config: &AtlasConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if config.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(true).compact();

    match &config.log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "atlas.log".to_string());
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

            Registry::default()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Ok(Some(guard))
        }
        None => {
            Registry::default()
                .with(env_filter)
                .with(console_layer)
                .init();
            Ok(None)
        }
    }
}
