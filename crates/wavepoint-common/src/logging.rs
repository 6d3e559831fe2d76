//! Logging setup shared by the debugger extension and the diagnostic CLI.
//!
//! Diagnostic output goes through `tracing`. User-facing debugger notices
//! do not; those are routed through the host debugger.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging section of the session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log to stderr
    #[serde(default = "default_true")]
    pub console_enabled: bool,

    /// Also log to `file_path`
    #[serde(default)]
    pub file_enabled: bool,

    #[serde(default = "default_log_path")]
    pub file_path: String,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include source file and line of the log call
    #[serde(default)]
    pub file_info: bool,

    #[serde(default = "default_true")]
    pub show_target: bool,

    #[serde(default)]
    pub ansi_colors: bool,

    /// Level name, overridden by `RUST_LOG` when set
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "wavepoint.log".to_string()
}

fn default_level() -> String {
    "warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: default_log_path(),
            timestamps: true,
            file_info: false,
            show_target: true,
            ansi_colors: false,
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// Verbose configuration used while developing against a live agent
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            file_info: true,
            ..Default::default()
        }
    }

    /// Quiet configuration for running inside the host debugger, where stderr
    /// is shared with the debugger's own output.
    pub fn host() -> Self {
        Self {
            console_enabled: false,
            file_enabled: true,
            timestamps: true,
            show_target: true,
            ..Default::default()
        }
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.file_enabled = true;
        self.file_path = path.to_string();
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    /// Parse the level string, falling back to WARN
    pub fn get_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    }
}

/// Install a global subscriber for `config`.
///
/// Only the first call in a process takes effect; later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.get_level().as_str()));

    let file = if config.file_enabled && !config.file_path.is_empty() {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_path)
            .ok()
    } else {
        None
    };

    let console_layer = config.console_enabled.then(|| {
        let layer = fmt::layer()
            .with_ansi(config.ansi_colors)
            .with_target(config.show_target)
            .with_file(config.file_info)
            .with_line_number(config.file_info)
            .with_writer(std::io::stderr);
        if config.timestamps {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    });

    let file_layer = file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(config.show_target)
            .with_file(config.file_info)
            .with_line_number(config.file_info)
            .with_writer(Mutex::new(file))
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Logging for the extension loaded into the host debugger
pub fn init_host_logging() {
    init_logging(&LogConfig::host());
}

pub fn init_debug_logging() {
    init_logging(&LogConfig::debug());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console_enabled);
        assert!(!config.file_enabled);
        assert_eq!(config.level, "warn");
        assert_eq!(config.get_level(), Level::WARN);
    }

    #[test]
    fn test_log_config_host_is_file_only() {
        let config = LogConfig::host();
        assert!(!config.console_enabled);
        assert!(config.file_enabled);
        assert_eq!(config.file_path, "wavepoint.log");
    }

    #[test]
    fn test_builders() {
        let config = LogConfig::default()
            .with_file("/tmp/wp.log")
            .with_level("TRACE");
        assert!(config.file_enabled);
        assert_eq!(config.file_path, "/tmp/wp.log");
        assert_eq!(config.get_level(), Level::TRACE);
    }

    #[test]
    fn test_unknown_level_falls_back() {
        let config = LogConfig::default().with_level("chatty");
        assert_eq!(config.get_level(), Level::WARN);
    }

    #[test]
    fn test_deserialize_partial_section() {
        let config: LogConfig = toml::from_str("level = \"debug\"\nfile_enabled = true").unwrap();
        assert_eq!(config.get_level(), Level::DEBUG);
        assert!(config.file_enabled);
        assert!(config.console_enabled);
    }
}
