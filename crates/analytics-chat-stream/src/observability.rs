use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const ENV_ENABLED: &str = "ANALYTICS_CHAT_OBSERVABILITY_ENABLED";
const ENV_LOG_LEVEL: &str = "ANALYTICS_CHAT_LOG_LEVEL";
const ENV_JSON_LOG_PATH: &str = "ANALYTICS_CHAT_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "analytics-chat.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled() -> bool {
    std::env::var(ENV_ENABLED)
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true)
}

fn resolve_env_filter() -> EnvFilter {
    if let Ok(level) = std::env::var(ENV_LOG_LEVEL)
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Splits a log path into the directory and file name the appender wants.
fn log_file_parts(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `ANALYTICS_CHAT_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `ANALYTICS_CHAT_LOG_LEVEL`: optional level/filter override (`info`, `debug`, etc.).
/// - `ANALYTICS_CHAT_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact console format so stdout stays
///   free for the streamed answer.
/// - `RUST_LOG`: optional filter override.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var(ENV_JSON_LOG_PATH) {
            let (dir, file_name) = log_file_parts(Path::new(&path_raw));
            let _ = std::fs::create_dir_all(&dir);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flags_accept_common_spellings() {
        assert_eq!(parse_bool_env(" Yes "), Some(true));
        assert_eq!(parse_bool_env("off"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn bare_file_name_logs_to_the_working_directory() {
        let (dir, file) = log_file_parts(Path::new("chat.jsonl"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, "chat.jsonl");

        let (dir, file) = log_file_parts(Path::new("logs/run/chat.jsonl"));
        assert_eq!(dir, PathBuf::from("logs/run"));
        assert_eq!(file, "chat.jsonl");
    }
}
