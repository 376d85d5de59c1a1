use std::{path::Path, sync::Once};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::SuspendPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value.message().to_string())
    }
}

/// Top-level configuration file.
///
/// ```toml
/// [breakpoints]
/// mailbox_capacity = 64
/// suspend_policy = "event_thread"
///
/// [logging]
/// level = "nova.breakpoints=debug"
/// json = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointsConfig {
    #[serde(default)]
    pub breakpoints: SupportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BreakpointsConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Settings applied to every breakpoint actor of a debug session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportConfig {
    /// Capacity of each actor's mailbox. Senders wait while it is full.
    #[serde(default = "SupportConfig::default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Suspend policy stamped on every breakpoint request.
    #[serde(default)]
    pub suspend_policy: SuspendPolicy,
}

impl SupportConfig {
    fn default_mailbox_capacity() -> usize {
        64
    }

    /// `tokio::sync::mpsc::channel` panics on a zero capacity.
    pub fn effective_mailbox_capacity(&self) -> usize {
        self.mailbox_capacity.max(1)
    }
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: Self::default_mailbox_capacity(),
            suspend_policy: SuspendPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A level name or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    /// Bare level names (any case, `warning` included) become `EnvFilter`
    /// syntax; anything else is passed through as directives.
    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }
        if trimmed.eq_ignore_ascii_case("warning") {
            return "warn".to_owned();
        }
        match trimmed.parse::<LevelFilter>() {
            Ok(level) => level.to_string().to_ascii_lowercase(),
            Err(_) => trimmed.to_owned(),
        }
    }

    /// Effective filter: the configured level followed by `RUST_LOG`, so the
    /// environment wins for every target it names.
    pub fn env_filter(&self) -> EnvFilter {
        let rust_log = std::env::var("RUST_LOG").ok();
        self.filter_with_env(rust_log.as_deref())
    }

    fn filter_with_env(&self, rust_log: Option<&str>) -> EnvFilter {
        let configured = Self::normalize_level_directives(&self.level);
        let merged = match rust_log.map(str::trim).filter(|env| !env.is_empty()) {
            Some(env) => format!("{configured},{env}"),
            None => configured.clone(),
        };
        EnvFilter::try_new(merged)
            .or_else(|_| EnvFilter::try_new(&configured))
            .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs a global `tracing` subscriber writing to stderr.
///
/// Only the first call has an effect. If another subscriber is already
/// installed the call is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(config.env_filter())
            .with_writer(std::io::stderr)
            .with_ansi(false);
        let _ = if config.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
    });
}
