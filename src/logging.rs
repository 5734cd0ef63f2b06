//! Tracing setup
//!
//! `RUST_LOG` wins over the configured level. Output goes to stderr, or to
//! the configured file without ANSI colours.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for development
    Pretty,
    /// One JSON object per line, for production
    Json,
}

impl LogFormat {
    /// Unknown names fall back to `Pretty`
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Filter directive used when `RUST_LOG` is unset
pub fn default_directive(level: &str) -> String {
    format!("mqttdeck={}", level.trim().to_lowercase())
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let format = LogFormat::from_name(&config.format);
    let output: Box<dyn Layer<Registry> + Send + Sync> = match &config.file {
        Some(path) => {
            let writer = Mutex::new(open_log_file(Path::new(path))?);
            match format {
                LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
                LogFormat::Pretty => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
            }
        }
        None => match format {
            LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
            LogFormat::Pretty => fmt::layer().with_writer(std::io::stderr).boxed(),
        },
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()?;

    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_name() {
        assert_eq!(LogFormat::from_name("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_name(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("weird"), LogFormat::Pretty);
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive("DEBUG"), "mqttdeck=debug");
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("mqttdeck.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
