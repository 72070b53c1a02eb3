//! Engine configuration.

use crate::{
    NormalizationRule, PathResolver, PrefetchError, PreloadPolicy, ResourceHint, Result,
    SuffixMatch,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hover/focus delay before a link dispatches (ms)
    #[serde(default = "default_preload_delay_ms")]
    pub preload_delay_ms: u64,

    /// Idle strategy delay when the host has no idle callback (ms)
    #[serde(default = "default_idle_fallback_ms")]
    pub idle_fallback_ms: u64,

    /// Visible fraction at which an anchor counts as on screen
    #[serde(default = "default_visible_threshold")]
    pub visible_threshold: f32,

    /// Locale segments stripped from the front of a path
    #[serde(default)]
    pub language_prefixes: Vec<String>,

    /// Path rewrites applied after locale stripping
    #[serde(default)]
    pub path_normalizations: Vec<NormalizationRule>,

    /// Tie-break among suffix matches
    #[serde(default)]
    pub suffix_match: SuffixMatch,

    /// Strategy policies (conditions are attached in code)
    #[serde(default)]
    pub policies: Vec<PreloadPolicy>,

    /// Hints inserted into the document at initialization
    #[serde(default)]
    pub resource_hints: Vec<ResourceHint>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preload_delay_ms: default_preload_delay_ms(),
            idle_fallback_ms: default_idle_fallback_ms(),
            visible_threshold: default_visible_threshold(),
            language_prefixes: Vec::new(),
            path_normalizations: Vec::new(),
            suffix_match: SuffixMatch::default(),
            policies: Vec::new(),
            resource_hints: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject out-of-range values and invalid patterns
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.visible_threshold) {
            return Err(PrefetchError::Config(format!(
                "visible_threshold must be within 0.0..=1.0, got {}",
                self.visible_threshold
            )));
        }
        if self.language_prefixes.iter().any(|p| p.is_empty() || p.contains('/')) {
            return Err(PrefetchError::Config(
                "language_prefixes must be non-empty single path segments".into(),
            ));
        }
        self.resolver().map(|_| ())
    }

    /// Build the shared path resolver
    pub fn resolver(&self) -> Result<PathResolver> {
        Ok(
            PathResolver::new(self.language_prefixes.as_slice(), &self.path_normalizations)?
                .with_suffix_match(self.suffix_match),
        )
    }

    /// Hover/focus delay
    pub fn preload_delay(&self) -> Duration {
        Duration::from_millis(self.preload_delay_ms)
    }

    /// Idle fallback delay
    pub fn idle_fallback(&self) -> Duration {
        Duration::from_millis(self.idle_fallback_ms)
    }
}

fn default_preload_delay_ms() -> u64 {
    50
}

fn default_idle_fallback_ms() -> u64 {
    2000
}

fn default_visible_threshold() -> f32 {
    0.5
}
