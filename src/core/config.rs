//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default source script: CJK punctuation, hiragana, katakana,
/// half/full-width forms and the common CJK ideograph blocks.
pub const DEFAULT_SCRIPT_RANGES: &[(char, char)] = &[
    ('\u{3000}', '\u{303f}'),
    ('\u{3040}', '\u{309f}'),
    ('\u{30a0}', '\u{30ff}'),
    ('\u{ff00}', '\u{ff9f}'),
    ('\u{4e00}', '\u{9faf}'),
    ('\u{3400}', '\u{4dbf}'),
];

/// Elements whose text is never translated
pub const DEFAULT_EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "textarea", "input", "code", "pre", "meta", "iframe",
];

/// Prefix for environment overrides, e.g. `LIVE_TRANSLATOR_TARGET_LANG`
pub const ENV_PREFIX: &str = "LIVE_TRANSLATOR";

/// Inclusive range of Unicode code points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRange {
    pub start: u32,
    pub end: u32,
}

impl ScriptRange {
    /// Both ends as chars, `None` when either is not a scalar value
    pub fn as_chars(&self) -> Option<(char, char)> {
        Some((char::from_u32(self.start)?, char::from_u32(self.end)?))
    }
}

/// Configuration for translator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub api_endpoint: String,
    pub source_lang: String,
    pub target_lang: String,
    pub timeout_ms: u64,
    /// Pause after each translated fragment
    pub fragment_delay_ms: u64,
    /// Quiet period after a navigation before restarting
    pub settle_delay_ms: u64,
    pub url_poll_interval_ms: u64,
    pub marker_attribute: String,
    pub excluded_tags: Vec<String>,
    pub script_ranges: Vec<ScriptRange>,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://translate.googleapis.com/translate_a/single".to_string(),
            source_lang: "ja".to_string(),
            target_lang: "vi".to_string(),
            timeout_ms: 30000,
            fragment_delay_ms: 50,
            settle_delay_ms: 500,
            url_poll_interval_ms: 1000,
            marker_attribute: "data-translated".to_string(),
            excluded_tags: DEFAULT_EXCLUDED_TAGS.iter().map(|t| t.to_string()).collect(),
            script_ranges: DEFAULT_SCRIPT_RANGES
                .iter()
                .map(|(start, end)| ScriptRange {
                    start: *start as u32,
                    end: *end as u32,
                })
                .collect(),
        }
    }
}

impl TranslatorConfig {
    /// Load configuration: defaults, then an optional file, then environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = Self::build(path)?;
        config.validate()?;
        info!(
            "Loaded configuration: {} -> {} via {}",
            config.source_lang, config.target_lang, config.api_endpoint
        );
        Ok(config)
    }

    fn build(path: Option<&Path>) -> anyhow::Result<Self> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_endpoint.is_empty() {
            return Err(anyhow::anyhow!("API endpoint is required"));
        }

        if self.source_lang.is_empty() || self.target_lang.is_empty() {
            return Err(anyhow::anyhow!("source_lang and target_lang are required"));
        }

        if self.url_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("url_poll_interval_ms must be greater than 0"));
        }

        if self.marker_attribute.is_empty() {
            return Err(anyhow::anyhow!("marker_attribute is required"));
        }

        if self.script_ranges.is_empty() {
            return Err(anyhow::anyhow!("At least one script range is required"));
        }

        for range in &self.script_ranges {
            match range.as_chars() {
                Some((start, end)) if start <= end => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "Invalid script range U+{:04X}..=U+{:04X}",
                        range.start,
                        range.end
                    ))
                }
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fragment_delay(&self) -> Duration {
        Duration::from_millis(self.fragment_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn url_poll_interval(&self) -> Duration {
        Duration::from_millis(self.url_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = TranslatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fragment_delay(), Duration::from_millis(50));
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.script_ranges.len(), 6);
    }

    #[test]
    fn test_config_validation_missing_endpoint() {
        let config = TranslatorConfig {
            api_endpoint: "".to_string(),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_inverted_range() {
        let config = TranslatorConfig {
            script_ranges: vec![ScriptRange {
                start: 0x7a,
                end: 0x61,
            }],
            ..Default::default()
        };

        assert!(config.validate().is_err());

        let surrogate = TranslatorConfig {
            script_ranges: vec![ScriptRange {
                start: 0xd800,
                end: 0xdfff,
            }],
            ..Default::default()
        };
        assert!(surrogate.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_poll_interval() {
        let config = TranslatorConfig {
            url_poll_interval_ms: 0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_layers_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"target_lang": "en", "settle_delay_ms": 200}}"#).unwrap();

        let config = TranslatorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.target_lang, "en");
        assert_eq!(config.settle_delay_ms, 200);
        assert_eq!(config.source_lang, "ja");
    }
}
