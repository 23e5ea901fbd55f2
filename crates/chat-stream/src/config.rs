use std::path::PathBuf;

use crate::errors::ConfigError;

/// Payload that marks the end of a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Body text returned when an account has been shut off for policy reasons.
pub const POLICY_VIOLATION_MARKER: &str =
    "Your access was terminated due to violation of our policies";

/// Configuration for a `StreamAccumulator`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulatorConfig {
    /// Frame data that terminates the stream.
    pub done_sentinel: String,
    /// Substring of a failure body that triggers the policy-violation notice.
    pub policy_violation_marker: String,
    /// Whether the completed transcript text is included in the info log.
    ///
    /// When disabled only its length is logged.
    pub log_transcript: bool,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            done_sentinel: DONE_SENTINEL.to_string(),
            policy_violation_marker: POLICY_VIOLATION_MARKER.to_string(),
            log_transcript: true,
        }
    }
}

impl AccumulatorConfig {
    /// Builds a config from defaults overridden by the environment.
    ///
    /// - `CHAT_STREAM_LOG_TRANSCRIPT`: `true`/`false` (and `1`/`0`, `yes`/`no`, `on`/`off`).
    /// - `CHAT_STREAM_DONE_SENTINEL`: alternative terminator payload.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("CHAT_STREAM_LOG_TRANSCRIPT") {
            config.log_transcript =
                parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
                    key: "CHAT_STREAM_LOG_TRANSCRIPT",
                    value: value.clone(),
                })?;
        }
        if let Ok(value) = std::env::var("CHAT_STREAM_DONE_SENTINEL") {
            config.done_sentinel = value;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the stream terminator.
    pub fn done_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.done_sentinel = sentinel.into();
        self
    }

    /// Overrides the policy-violation marker.
    pub fn policy_violation_marker(mut self, marker: impl Into<String>) -> Self {
        self.policy_violation_marker = marker.into();
        self
    }

    /// Enables or disables logging of transcript content.
    pub fn log_transcript(mut self, enabled: bool) -> Self {
        self.log_transcript = enabled;
        self
    }

    /// Rejects configurations that could never terminate or match.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.done_sentinel.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "done_sentinel",
            });
        }
        if self.policy_violation_marker.is_empty() {
            return Err(ConfigError::Empty {
                field: "policy_violation_marker",
            });
        }
        Ok(())
    }
}

/// Logging setup consumed by `observability::init_observability`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Skip installing a subscriber altogether.
    pub disabled: bool,
    /// `EnvFilter` directive (`info`, `chat_stream=debug`); `RUST_LOG` and
    /// then `info` apply when unset.
    pub level: Option<String>,
    /// Write JSON lines to this file instead of compact console output.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilityConfig {
    /// Reads `CHAT_STREAM_OBSERVABILITY`, `CHAT_STREAM_LOG_LEVEL` and
    /// `CHAT_STREAM_JSON_LOG_PATH`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("CHAT_STREAM_OBSERVABILITY") {
            let enabled = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
                key: "CHAT_STREAM_OBSERVABILITY",
                value: value.clone(),
            })?;
            config.disabled = !enabled;
        }
        config.level = std::env::var("CHAT_STREAM_LOG_LEVEL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        config.json_log_path = std::env::var_os("CHAT_STREAM_JSON_LOG_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Ok(config)
    }

    /// Sets the filter directive.
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Sends logs to a JSONL file.
    pub fn json_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.json_log_path = Some(path.into());
        self
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}
