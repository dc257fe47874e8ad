//! Configuration for the chat controller.
//!
//! Loaded from a TOML file; every field has a default, so an empty file is
//! a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for a [`ChatController`](crate::ChatController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Message store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// UI event channel configuration.
    #[serde(default)]
    pub events: EventsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Message store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum sends awaiting acknowledgement (default: 64).
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

/// UI event channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the oldest are dropped (default: 128).
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive (default: "info").
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_max_pending() -> usize {
    classroom_chat_core::DEFAULT_MAX_PENDING
}

fn default_event_capacity() -> usize {
    128
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the pending capacity.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.store.max_pending = max_pending;
        self
    }

    /// Set the event buffer capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.events.capacity = capacity;
        self
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
