use std::error::Error;
use std::fmt;

use serde::Deserialize;

use crate::Limits;

/// Prefix of the environment variables read by [`EngineConfig::with_env_overrides`].
pub const ENV_PREFIX: &str = "SPECIMEN_";

/// Engine options. Every key is optional; absent keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub max_depth: usize,
    pub max_items: usize,
    pub max_string: usize,
    pub max_key_string: usize,
    pub preview_max_depth: usize,
    pub preview_max_items: usize,
    pub preview_max_string: usize,
    pub preview_max_chars: usize,
    pub per_trace_byte_cap: u64,
    pub ttl_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: Limits::FULL.max_depth,
            max_items: Limits::FULL.max_items,
            max_string: Limits::FULL.max_string,
            max_key_string: Limits::FULL.max_key_string,
            preview_max_depth: Limits::PREVIEW.max_depth,
            preview_max_items: Limits::PREVIEW.max_items,
            preview_max_string: Limits::PREVIEW.max_string,
            preview_max_chars: 80,
            per_trace_byte_cap: 1024 * 1024,
            ttl_seconds: 60,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Env { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(source) => write!(f, "invalid engine options: {source}"),
            Self::Env { key, value } => {
                write!(f, "{key} must be a non-negative integer, got {value:?}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(source) => Some(source),
            Self::Env { .. } => None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(ConfigError::Parse)
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(ConfigError::Parse)
    }

    /// Applies `SPECIMEN_<KEY>` overrides, e.g. `SPECIMEN_TTL_SECONDS=120`.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            slot: &mut T,
        ) -> Result<(), ConfigError> {
            let key = format!("{ENV_PREFIX}{}", name.to_ascii_uppercase());
            let Some(value) = lookup(&key) else {
                return Ok(());
            };
            *slot = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { key, value })?;
            Ok(())
        }

        read(&lookup, "max_depth", &mut self.max_depth)?;
        read(&lookup, "max_items", &mut self.max_items)?;
        read(&lookup, "max_string", &mut self.max_string)?;
        read(&lookup, "max_key_string", &mut self.max_key_string)?;
        read(&lookup, "preview_max_depth", &mut self.preview_max_depth)?;
        read(&lookup, "preview_max_items", &mut self.preview_max_items)?;
        read(&lookup, "preview_max_string", &mut self.preview_max_string)?;
        read(&lookup, "preview_max_chars", &mut self.preview_max_chars)?;
        read(&lookup, "per_trace_byte_cap", &mut self.per_trace_byte_cap)?;
        read(&lookup, "ttl_seconds", &mut self.ttl_seconds)?;
        Ok(self)
    }

    pub fn full_limits(&self) -> Limits {
        Limits {
            max_depth: self.max_depth,
            max_items: self.max_items,
            max_string: self.max_string,
            max_key_string: self.max_key_string,
        }
    }

    /// The preview string cap never drops below `preview_max_chars`, so any
    /// string short enough to preview whole is also cloned whole.
    pub fn preview_limits(&self) -> Limits {
        let max_string = self.preview_max_string.max(self.preview_max_chars);
        Limits {
            max_depth: self.preview_max_depth,
            max_items: self.preview_max_items,
            max_string,
            max_key_string: max_string,
        }
    }
}
