//! Engine configuration.
//!
//! Every field has a default so a missing or partial `config.toml` still
//! yields a usable configuration.

use crate::error::ParleyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage key holding the persisted session table (workspace scope).
pub const PERSISTED_SESSIONS_KEY: &str = "chat.sessions";
/// Storage key holding cross-workspace transfer entries (application scope).
pub const TRANSFERRED_SESSIONS_KEY: &str = "chat.transferred_sessions";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Identity of the workspace this engine instance serves.
    pub workspace_id: String,
    /// Maximum number of sessions kept in the persisted table.
    pub max_persisted_sessions: usize,
    /// Lifetime of a cross-workspace transfer entry.
    pub transfer_ttl_secs: u64,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub typing: TypingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            max_persisted_sessions: 25,
            transfer_ttl_secs: 60,
            log_level: "info".to_string(),
            typing: TypingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn transfer_ttl(&self) -> Duration {
        Duration::from_secs(self.transfer_ttl_secs)
    }

    /// Parses a TOML document, falling back to defaults for absent fields.
    /// Typing bounds are checked before the config is handed out.
    pub fn from_toml_str(content: &str) -> crate::error::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.typing.validate()?;
        Ok(config)
    }
}

/// Bounds for the progressive reveal rate.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TypingConfig {
    pub min_words_per_second: f64,
    pub max_words_per_second: f64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            min_words_per_second: 10.0,
            max_words_per_second: 300.0,
        }
    }
}

impl TypingConfig {
    /// Both bounds finite, `min` not negative, `max` positive, `min <= max`.
    pub fn validate(&self) -> crate::error::Result<()> {
        let (min, max) = (self.min_words_per_second, self.max_words_per_second);
        if !min.is_finite() || !max.is_finite() {
            return Err(ParleyError::config("typing rates must be finite"));
        }
        if min < 0.0 || max <= 0.0 {
            return Err(ParleyError::config(format!(
                "typing rates must be positive (min {}, max {})",
                min, max
            )));
        }
        if min > max {
            return Err(ParleyError::config(format!(
                "min_words_per_second {} exceeds max_words_per_second {}",
                min, max
            )));
        }
        Ok(())
    }

    /// Clamps a rate into the configured bounds. Inverted bounds are read in
    /// order and a NaN rate yields the upper bound.
    pub fn clamp(&self, words_per_second: f64) -> f64 {
        let (low, high) = self.bounds();
        if words_per_second.is_nan() || low.is_nan() || high.is_nan() {
            return high;
        }
        words_per_second.clamp(low, high)
    }

    fn bounds(&self) -> (f64, f64) {
        let (min, max) = (self.min_words_per_second, self.max_words_per_second);
        if min <= max {
            (min, max)
        } else {
            (max, min)
        }
    }
}
