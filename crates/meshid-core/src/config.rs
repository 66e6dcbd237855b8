//! Merge configuration defaults and loaders.
//!
//! Defaults live in constant modules; `env_vars` reads overrides from the
//! environment and falls back to the defaults. A `MergeConfig` may also be
//! loaded from a TOML file, with environment overrides applied on top.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Merge engine defaults
pub mod merge {
    /// Minimum confidence for a single source to vouch for a token
    pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 70;
    /// Distinct sources that corroborate a token regardless of confidence
    pub const DEFAULT_CORROBORATION_SOURCES: usize = 3;
    /// Manufacturer tokens kept per identity
    pub const DEFAULT_MAX_MANUFACTURER_TOKENS: usize = 50;
    /// Product tokens kept per identity
    pub const DEFAULT_MAX_PRODUCT_TOKENS: usize = 30;
}

/// Source reliability defaults
pub mod reliability {
    /// Base reliability of a source nobody configured
    pub const DEFAULT_BASE: u8 = 40;
    /// Confidence gained per repeat occurrence
    pub const REPEAT_BONUS: u8 = 10;
}

/// Environment variable names and readers
pub mod env_vars {
    use super::merge;

    pub const CONFIDENCE_THRESHOLD: &str = "MESHID_CONFIDENCE_THRESHOLD";
    pub const CORROBORATION_SOURCES: &str = "MESHID_CORROBORATION_SOURCES";
    pub const MAX_MANUFACTURER_TOKENS: &str = "MESHID_MAX_MANUFACTURER_TOKENS";
    pub const MAX_PRODUCT_TOKENS: &str = "MESHID_MAX_PRODUCT_TOKENS";
    pub const LOG_JSON: &str = "MESHID_LOG_JSON";

    /// Parsed value of a variable, `None` when unset or malformed
    pub fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
    }

    pub fn confidence_threshold() -> u8 {
        parsed(CONFIDENCE_THRESHOLD).unwrap_or(merge::DEFAULT_CONFIDENCE_THRESHOLD)
    }

    pub fn corroboration_sources() -> usize {
        parsed(CORROBORATION_SOURCES).unwrap_or(merge::DEFAULT_CORROBORATION_SOURCES)
    }

    pub fn max_manufacturer_tokens() -> usize {
        parsed(MAX_MANUFACTURER_TOKENS).unwrap_or(merge::DEFAULT_MAX_MANUFACTURER_TOKENS)
    }

    pub fn max_product_tokens() -> usize {
        parsed(MAX_PRODUCT_TOKENS).unwrap_or(merge::DEFAULT_MAX_PRODUCT_TOKENS)
    }

    /// Whether logs should be emitted as JSON
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }
}

fn default_confidence_threshold() -> u8 {
    merge::DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_corroboration_sources() -> usize {
    merge::DEFAULT_CORROBORATION_SOURCES
}

fn default_max_manufacturer_tokens() -> usize {
    merge::DEFAULT_MAX_MANUFACTURER_TOKENS
}

fn default_max_product_tokens() -> usize {
    merge::DEFAULT_MAX_PRODUCT_TOKENS
}

/// Tunables of the multi-source merge engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,
    #[serde(default = "default_corroboration_sources")]
    pub corroboration_sources: usize,
    #[serde(default = "default_max_manufacturer_tokens")]
    pub max_manufacturer_tokens: usize,
    #[serde(default = "default_max_product_tokens")]
    pub max_product_tokens: usize,
    #[serde(default)]
    pub reliability: SourceReliability,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: merge::DEFAULT_CONFIDENCE_THRESHOLD,
            corroboration_sources: merge::DEFAULT_CORROBORATION_SOURCES,
            max_manufacturer_tokens: merge::DEFAULT_MAX_MANUFACTURER_TOKENS,
            max_product_tokens: merge::DEFAULT_MAX_PRODUCT_TOKENS,
            reliability: SourceReliability::default(),
        }
    }
}

impl MergeConfig {
    /// Defaults with environment overrides applied, validated.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            confidence_threshold: env_vars::confidence_threshold(),
            corroboration_sources: env_vars::corroboration_sources(),
            max_manufacturer_tokens: env_vars::max_manufacturer_tokens(),
            max_product_tokens: env_vars::max_product_tokens(),
            reliability: SourceReliability::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?.with_env_overrides();
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "Loaded merge config");
        Ok(config)
    }

    /// Replace fields whose environment variable holds a valid value.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_vars::parsed(env_vars::CONFIDENCE_THRESHOLD) {
            self.confidence_threshold = v;
        }
        if let Some(v) = env_vars::parsed(env_vars::CORROBORATION_SOURCES) {
            self.corroboration_sources = v;
        }
        if let Some(v) = env_vars::parsed(env_vars::MAX_MANUFACTURER_TOKENS) {
            self.max_manufacturer_tokens = v;
        }
        if let Some(v) = env_vars::parsed(env_vars::MAX_PRODUCT_TOKENS) {
            self.max_product_tokens = v;
        }
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.confidence_threshold = threshold.min(100);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.confidence_threshold > 100 {
            return Err(Error::Config(format!(
                "confidence_threshold must be <= 100, got {}",
                self.confidence_threshold
            )));
        }
        if self.corroboration_sources == 0 {
            return Err(Error::Config(
                "corroboration_sources must be at least 1".to_string(),
            ));
        }
        if self.max_manufacturer_tokens == 0 || self.max_product_tokens == 0 {
            return Err(Error::Config("token caps must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Per-source base reliability used to derive candidate confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReliability {
    #[serde(default = "default_base")]
    pub default_base: u8,
    #[serde(default)]
    pub sources: BTreeMap<String, u8>,
}

fn default_base() -> u8 {
    reliability::DEFAULT_BASE
}

impl Default for SourceReliability {
    fn default() -> Self {
        Self {
            default_base: reliability::DEFAULT_BASE,
            sources: BTreeMap::new(),
        }
    }
}

impl SourceReliability {
    pub fn with_source(mut self, source_id: impl Into<String>, base: u8) -> Self {
        self.sources.insert(source_id.into(), base.min(100));
        self
    }

    pub fn base(&self, source_id: &str) -> u8 {
        self.sources
            .get(source_id)
            .copied()
            .unwrap_or(self.default_base)
    }

    /// Confidence of a claim seen `occurrences` times in one source.
    pub fn confidence(&self, source_id: &str, occurrences: usize) -> u8 {
        let repeats = occurrences.saturating_sub(1).min(100) as u32;
        let score = u32::from(self.base(source_id)) + u32::from(reliability::REPEAT_BONUS) * repeats;
        score.min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MergeConfig::default();
        assert_eq!(config.confidence_threshold, 70);
        assert_eq!(config.corroboration_sources, 3);
        assert_eq!(config.max_manufacturer_tokens, 50);
        assert_eq!(config.max_product_tokens, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = MergeConfig::from_toml_str(
            r#"
            confidence_threshold = 85

            [reliability.sources]
            z2m = 80
            "#,
        )
        .unwrap();
        assert_eq!(config.confidence_threshold, 85);
        assert_eq!(config.corroboration_sources, 3);
        assert_eq!(config.reliability.base("z2m"), 80);
        assert_eq!(config.reliability.base("forum"), reliability::DEFAULT_BASE);
    }

    #[test]
    fn test_invalid_toml_values() {
        assert!(matches!(
            MergeConfig::from_toml_str("corroboration_sources = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MergeConfig::from_toml_str("confidence_threshold = 101"),
            Err(Error::Config(_))
        ));
        assert!(MergeConfig::from_toml_str("confidence_threshold = \"high\"").is_err());
    }

    #[test]
    fn test_confidence_from_repeats() {
        let reliability = SourceReliability::default().with_source("z2m", 75);
        assert_eq!(reliability.confidence("z2m", 1), 75);
        assert_eq!(reliability.confidence("z2m", 3), 95);
        assert_eq!(reliability.confidence("z2m", 40), 100);
        assert_eq!(reliability.confidence("forum", 2), 50);
        assert_eq!(reliability.confidence("forum", 0), 40);
    }
}
