//! Logging infrastructure for tether
//!
//! Provides unified logging setup using the tracing ecosystem. The bridge
//! speaks its protocol on stdout, so it never logs there.

use std::path::{Path, PathBuf};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{paths, Result, TetherError};

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stderr
    Stderr,
    /// Log to file
    File,
    /// Log to both stderr and file
    Both,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output destination
    pub output: LogOutput,
    /// Log level filter (e.g., "info", "debug", "tether_server=debug,tokio=warn")
    pub filter: String,
    /// Include span events (enter/exit)
    pub span_events: bool,
    /// Include file/line in logs
    pub file_line: bool,
    /// Optional custom log file name (defaults to "tether.log")
    pub file_name: Option<String>,
    /// Optional log directory (defaults to the XDG state log dir)
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: "info".into(),
            span_events: false,
            file_line: false,
            file_name: None,
            dir: None,
        }
    }
}

impl LogConfig {
    /// Create config for the bridge process (file logging, stdout is the protocol)
    pub fn bridge() -> Self {
        Self {
            output: LogOutput::File,
            filter: std::env::var("TETHER_LOG").unwrap_or_else(|_| "info".into()),
            span_events: false,
            file_line: true,
            file_name: None,
            dir: None,
        }
    }

    /// Full path of the log file this config writes to
    pub fn log_path(&self) -> PathBuf {
        let dir = self.dir.clone().unwrap_or_else(paths::log_dir);
        dir.join(self.file_name.as_deref().unwrap_or("tether.log"))
    }
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| TetherError::config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let fmt_layer = if config.span_events {
        fmt_layer.with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    } else {
        fmt_layer
    };

    let fmt_layer = if config.file_line {
        fmt_layer.with_file(true).with_line_number(true)
    } else {
        fmt_layer.with_file(false).with_line_number(false)
    };

    match config.output {
        LogOutput::Stderr => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| TetherError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::File => {
            let file = open_log_file(&config.log_path())?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(file).with_ansi(false))
                .try_init()
                .map_err(|e| TetherError::internal(format!("Failed to init logging: {}", e)))?;
        }
        LogOutput::Both => {
            let file = open_log_file(&config.log_path())?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer.with_writer(std::io::stderr))
                .with(file_layer)
                .try_init()
                .map_err(|e| TetherError::internal(format!("Failed to init logging: {}", e)))?;
        }
    }

    tracing::debug!(filter = %config.filter, output = ?config.output, "Logging initialized");
    Ok(())
}

/// Open (creating parents) the log file in append mode
fn open_log_file(log_path: &Path) -> Result<std::fs::File> {
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| TetherError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| TetherError::FileWrite {
            path: log_path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_log_output_equality() {
        assert_eq!(LogOutput::Stderr, LogOutput::Stderr);
        assert_ne!(LogOutput::Stderr, LogOutput::File);
        assert_ne!(LogOutput::File, LogOutput::Both);
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.filter, "info");
        assert!(!config.span_events);
        assert!(!config.file_line);
    }

    #[test]
    fn test_log_config_bridge_logs_to_file() {
        let config = LogConfig::bridge();
        assert_eq!(config.output, LogOutput::File);
        assert!(config.file_line);
    }

    #[test]
    fn test_log_config_bridge_with_env() {
        let original = env::var("TETHER_LOG").ok();
        env::set_var("TETHER_LOG", "trace");

        let config = LogConfig::bridge();
        assert_eq!(config.filter, "trace");

        match original {
            Some(val) => env::set_var("TETHER_LOG", val),
            None => env::remove_var("TETHER_LOG"),
        }
    }

    #[test]
    fn test_log_path_default_file_name() {
        let config = LogConfig {
            dir: Some(PathBuf::from("/var/log/tether")),
            ..LogConfig::default()
        };
        assert_eq!(config.log_path(), PathBuf::from("/var/log/tether/tether.log"));
    }

    #[test]
    fn test_log_path_custom_file_name() {
        let config = LogConfig {
            dir: Some(PathBuf::from("/var/log/tether")),
            file_name: Some("bridge.log".into()),
            ..LogConfig::default()
        };
        assert_eq!(config.log_path(), PathBuf::from("/var/log/tether/bridge.log"));
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("tether.log");

        let file = open_log_file(&path);
        assert!(file.is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LogConfig {
            filter: "tether=notalevel".into(),
            ..LogConfig::default()
        };
        let result = init_logging_with_config(config);
        assert!(matches!(result, Err(TetherError::Config(_))));
    }
}
