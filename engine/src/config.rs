//! Engine settings loaded from TOML.
//!
//! Every field has a default, so an empty file or a missing section yields
//! [`EngineConfig::default`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const fn default_max_rounds() -> u32 {
    50
}

const fn default_max_consecutive_nudges() -> u32 {
    1
}

const fn default_stream_idle_timeout_secs() -> u64 {
    120
}

const fn default_event_channel_capacity() -> usize {
    256
}

const fn default_tool_timeout_secs() -> u64 {
    300
}

const fn default_max_output_bytes() -> usize {
    100_000
}

/// Engine settings, typically read from a `helm.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TurnConfig {
    /// Model calls allowed per user turn.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// Back-to-back empty responses answered with a nudge before giving up.
    #[serde(default = "default_max_consecutive_nudges")]
    pub max_consecutive_nudges: u32,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    /// Buffer size of the channel built by [`Conversation::subscribe`].
    ///
    /// [`Conversation::subscribe`]: crate::Conversation::subscribe
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_consecutive_nudges: default_max_consecutive_nudges(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl TurnConfig {
    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Applies to tools that do not declare their own timeout.
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl ToolsConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        Self::parse(content)
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
