//! Logging setup for applications embedding the media pipelines
//!
//! The pipelines themselves only emit `tracing` events. This module installs a
//! `tracing-subscriber` formatter for binaries and tests that want one, with a
//! separate level for the callwire crates so per-packet pipeline logs can be
//! turned up without drowning in the host application's output.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::MediaConfig;
use crate::error::{Error, Result};

/// Log targets of the callwire crates
const PIPELINE_TARGETS: &[&str] = &["callwire_media_core", "callwire_codec_core"];

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level for every target without its own directive
    pub level: Level,
    /// Level for the callwire crates, if it differs from `level`
    pub pipeline_level: Option<Level>,
    /// Emit JSON lines instead of the human readable format
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            pipeline_level: None,
            json: false,
            file_info: false,
        }
    }
}

impl LoggingConfig {
    /// Build from the `[log]` section of a media configuration
    pub fn from_media_config(config: &MediaConfig) -> Result<Self> {
        let log = &config.log;
        Ok(LoggingConfig {
            level: parse_log_level(&log.level)?,
            pipeline_level: log.pipeline_level.as_deref().map(parse_log_level).transpose()?,
            json: log.json,
            file_info: log.file_info,
        })
    }

    /// Log the callwire crates at `level`
    pub fn with_pipeline_level(mut self, level: Level) -> Self {
        self.pipeline_level = Some(level);
        self
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Filter for this configuration. `RUST_LOG` directives come first and
    /// the configured levels are added on top.
    pub fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        if let Some(level) = self.pipeline_level {
            let level = level.as_str().to_ascii_lowercase();
            for target in PIPELINE_TARGETS {
                match format!("{}={}", target, level).parse() {
                    Ok(directive) => filter = filter.add_directive(directive),
                    Err(err) => tracing::warn!("Skipping log directive for {}: {}", target, err),
                }
            }
        }
        filter
    }
}

/// Install a global subscriber built from `config`
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| Error::configuration(format!("logging already initialized: {}", err)))?;

    tracing::info!("callwire-media-core v{} logging ready", crate::VERSION);
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::configuration(format!("Invalid log level: {}", level)))
}
