// ⚙️ Match Configuration - thresholds and blocking knobs, all overridable
// Loaded once from JSON (or defaults) and treated as immutable afterwards.

use crate::overrides::NameOverrides;
use crate::rules::RuleSet;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Fuzzy acceptance threshold, inclusive (0-100)
    pub fuzzy_threshold: u8,

    /// Day-buffer half width in days (3 → 7 day-of-month values)
    pub day_buffer_half_width: u32,

    /// Maximum number of blocking predicates applied
    pub max_blocking_steps: usize,

    /// Narrowing stops once fewer candidates than this remain
    pub min_candidates: usize,

    /// Fuzzy length prefilter: max difference in whitespace-stripped key length.
    /// None disables the prefilter.
    pub length_tolerance: Option<usize>,

    /// Raw firm names containing any of these terms are never matched
    pub excluded_firm_terms: Vec<String>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            fuzzy_threshold: 95,
            day_buffer_half_width: 3,
            max_blocking_steps: 4,
            min_candidates: 2,
            length_tolerance: Some(2),
            excluded_firm_terms: vec!["GOVERNMENT".to_string()],
        }
    }
}

impl MatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: MatchConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.fuzzy_threshold > 100 {
            anyhow::bail!("fuzzy_threshold must be within 0-100, got {}", self.fuzzy_threshold);
        }
        if self.day_buffer_half_width > 13 {
            anyhow::bail!(
                "day_buffer_half_width {} would wrap a whole month",
                self.day_buffer_half_width
            );
        }
        Ok(())
    }

    /// True if the raw firm name carries an excluded term (case-insensitive)
    pub fn is_excluded(&self, raw_firm_name: &str) -> bool {
        let upper = raw_firm_name.to_uppercase();
        self.excluded_firm_terms
            .iter()
            .any(|term| !term.is_empty() && upper.contains(&term.to_uppercase()))
    }
}

/// SHA-256 over the full matching configuration.
///
/// Stored with every committed batch so a resumed run can tell whether it is
/// matching under the same rules as the run it continues.
pub fn config_fingerprint(config: &MatchConfig, rules: &RuleSet, overrides: &NameOverrides) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(config).context("Failed to serialize match config")?);
    hasher.update(serde_json::to_vec(rules).context("Failed to serialize rule set")?);
    hasher.update(serde_json::to_vec(overrides).context("Failed to serialize overrides")?);
    Ok(format!("{:x}", hasher.finalize()))
}
