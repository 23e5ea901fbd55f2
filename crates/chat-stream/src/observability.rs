use std::path::Path;

use once_cell::sync::OnceCell;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::ObservabilityConfig;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "chat-stream.logs.jsonl";

/// Installs the process-wide subscriber described by `config`.
///
/// Only the first call has an effect. A JSON log path whose directory cannot
/// be created falls back to console output with a warning.
pub fn init_observability(config: &ObservabilityConfig) {
    INIT.get_or_init(|| {
        if config.disabled {
            return;
        }
        let filter = env_filter(config.level.as_deref());
        let fallback = match config.json_log_path.as_deref() {
            Some(path) => match prepare_log_file(path) {
                Ok((dir, file_name)) => {
                    let writer = tracing_appender::rolling::never(dir, file_name);
                    let json_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_target(false)
                        .with_writer(writer);
                    let _ = tracing_subscriber::registry()
                        .with(filter)
                        .with(json_layer)
                        .try_init();
                    return;
                }
                Err(err) => Some((path.to_path_buf(), err)),
            },
            None => None,
        };

        let console_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stdout);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init();
        if let Some((path, err)) = fallback {
            warn!(path = %path.display(), error = %err, "cannot create log directory, logging to stdout");
        }
    });
}

fn env_filter(level: Option<&str>) -> EnvFilter {
    if let Some(level) = level
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Splits `path` into directory and file name, creating the directory.
fn prepare_log_file(path: &Path) -> std::io::Result<(&Path, &str)> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    Ok((dir, file_name))
}
