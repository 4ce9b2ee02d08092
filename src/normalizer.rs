// 🧹 Normalizer - raw firm name / event title → canonical comparison key
//
// Pipeline (fixed order, one pass):
//   1. upper-case
//   2. legal-form standardization (ordered rules)
//   3. override dictionary (exact lookup on standardized keys, wholesale replace)
//   4. strip everything but ASCII alphanumerics, '-', '_' and spaces
//   5. strip leading articles and trailing legal-suffix tokens
//   6. title noise (EventTitle mode only)
//   7. trim / collapse whitespace
//
// The pass is repeated until the key stops changing, so normalize() is idempotent.

use crate::overrides::NameOverrides;
use crate::record::EventRecord;
use crate::rules::{apply_in_order, CompiledRules, RuleSet};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Upper bound on pipeline passes; default tables settle in two or three
const MAX_PASSES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMode {
    FirmName,
    EventTitle,
}

/// Immutable after construction; cheap to clone and share across worker threads
#[derive(Debug, Clone)]
pub struct Normalizer {
    rules: Arc<CompiledRules>,
    overrides: Arc<NameOverrides>,
}

impl Normalizer {
    /// Override keys are standardized the same way pipeline input is before
    /// step 3, so "ACME, INC" in the table matches what the lookup sees.
    pub fn new(rules: &RuleSet, overrides: NameOverrides) -> Result<Self> {
        let rules = rules.compile()?;
        let overrides = overrides.rekeyed(|name| {
            collapse_whitespace(&apply_in_order(&rules.suffix_standardization, name))
        });
        Ok(Normalizer {
            rules: Arc::new(rules),
            overrides: Arc::new(overrides),
        })
    }

    /// Built-in rule tables, no overrides
    pub fn with_defaults() -> Result<Self> {
        Self::new(&RuleSet::default(), NameOverrides::default())
    }

    pub fn overrides(&self) -> &NameOverrides {
        &self.overrides
    }

    pub fn normalize(&self, raw: &str, mode: NormalizeMode) -> String {
        let mut current = self.pass(raw, mode);
        for _ in 1..MAX_PASSES {
            let next = self.pass(&current, mode);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Fill the derived key fields of a record
    pub fn annotate(&self, record: &mut EventRecord) {
        record.normalized_firm_key = self.normalize(&record.raw_firm_name, NormalizeMode::FirmName);
        record.normalized_title_key = self.normalize(&record.raw_title, NormalizeMode::EventTitle);
    }

    fn pass(&self, raw: &str, mode: NormalizeMode) -> String {
        let upper = raw.to_uppercase();
        let standardized = apply_in_order(&self.rules.suffix_standardization, &upper);
        let overridden = self.overrides.apply(&collapse_whitespace(&standardized));

        let text = match mode {
            NormalizeMode::EventTitle => apply_in_order(&self.rules.title_asides, &overridden),
            NormalizeMode::FirmName => overridden,
        };

        let stripped = strip_punctuation(&text);
        let trimmed = self.strip_affix_tokens(&stripped);

        let cleaned = match mode {
            NormalizeMode::EventTitle => apply_in_order(&self.rules.title_noise, &trimmed),
            NormalizeMode::FirmName => trimmed,
        };

        collapse_whitespace(&cleaned)
    }

    /// Strip leading articles and trailing suffix tokens (whole words only, never the last word)
    fn strip_affix_tokens(&self, text: &str) -> String {
        let mut key = collapse_whitespace(text);

        while let Some(token) = self
            .rules
            .suffix_tokens
            .iter()
            .find(|token| ends_with_word(&key, token))
        {
            key.truncate(key.len() - token.len());
            key.truncate(key.trim_end().len());
        }

        while let Some(token) = self
            .rules
            .leading_tokens
            .iter()
            .find(|token| starts_with_word(&key, token))
        {
            key = key[token.len()..].trim_start().to_string();
        }

        key
    }
}

/// Keep ASCII alphanumerics, hyphen, underscore; any whitespace becomes a space
fn strip_punctuation(text: &str) -> String {
    text.chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ends_with_word(key: &str, token: &str) -> bool {
    key.len() > token.len()
        && key.ends_with(token)
        && key[..key.len() - token.len()].ends_with(' ')
}

fn starts_with_word(key: &str, token: &str) -> bool {
    key.len() > token.len() && key.starts_with(token) && key[token.len()..].starts_with(' ')
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn firm(n: &Normalizer, raw: &str) -> String {
        n.normalize(raw, NormalizeMode::FirmName)
    }

    fn title(n: &Normalizer, raw: &str) -> String {
        n.normalize(raw, NormalizeMode::EventTitle)
    }

    #[test]
    fn test_firm_suffix_variants_converge() {
        let n = Normalizer::with_defaults().unwrap();

        assert_eq!(firm(&n, "Acme Corporation"), "ACME");
        assert_eq!(firm(&n, "ACME CORP"), "ACME");
        assert_eq!(firm(&n, "Acme Corp."), "ACME");
        assert_eq!(firm(&n, "Acme, Inc."), "ACME");
        assert_eq!(firm(&n, "ACME,INC"), "ACME");
    }

    #[test]
    fn test_multilingual_legal_forms() {
        let n = Normalizer::with_defaults().unwrap();

        assert_eq!(firm(&n, "Volvo Aktiebolaget (publ)"), "VOLVO");
        assert_eq!(firm(&n, "Siemens Aktiengesellschaft"), "SIEMENS");
        assert_eq!(firm(&n, "Telefonica Sociedad Anonima"), "TELEFONICA");
        assert_eq!(firm(&n, "Siam Cement Public Company Limited"), "SIAM CEMENT");
        assert_eq!(firm(&n, "Nokia Oyj"), "NOKIA");
        assert_eq!(firm(&n, "Heineken N.V."), "HEINEKEN");
    }

    #[test]
    fn test_suffix_strip_needs_word_boundary() {
        let n = Normalizer::with_defaults().unwrap();

        assert_eq!(firm(&n, "Inco Ltd"), "INCO");
        assert_eq!(firm(&n, "Unico"), "UNICO");
        // A lone suffix token is never stripped to nothing
        assert_eq!(firm(&n, "AG"), "AG");
    }

    #[test]
    fn test_leading_article_and_ampersand() {
        let n = Normalizer::with_defaults().unwrap();

        assert_eq!(firm(&n, "The Coca-Cola Company"), "COCA-COLA");
        assert_eq!(firm(&n, "Procter & Gamble Co"), "PROCTER AND GAMBLE");
        assert_eq!(firm(&n, "Theravance Inc"), "THERAVANCE");
    }

    #[test]
    fn test_override_replaces_wholesale() {
        let overrides = NameOverrides::from_pairs(vec![("INTL BUSINESS MACHINES CORP", "IBM")]);
        let n = Normalizer::new(&RuleSet::default(), overrides).unwrap();

        assert_eq!(firm(&n, "International Business Machines Corporation"), "IBM");
        assert_eq!(firm(&n, "Apple Inc"), "APPLE");
    }

    #[test]
    fn test_override_keys_with_commas_still_hit() {
        let overrides = NameOverrides::from_pairs(vec![
            ("BERKSHIRE HATHAWAY INC, DEL", "BERKSHIRE HATHAWAY"),
            ("AT&T INC", "ATT"),
        ]);
        let n = Normalizer::new(&RuleSet::default(), overrides).unwrap();

        assert_eq!(firm(&n, "Berkshire Hathaway Inc, Del"), "BERKSHIRE HATHAWAY");
        assert_eq!(firm(&n, "Berkshire Hathaway Inc,Del"), "BERKSHIRE HATHAWAY");
        assert_eq!(firm(&n, "AT & T Inc"), "ATT");
    }

    #[test]
    fn test_title_noise_stripped() {
        let n = Normalizer::with_defaults().unwrap();

        assert_eq!(title(&n, "Acme Corp Q1 2024 Earnings Call"), "ACME");
        assert_eq!(title(&n, "ACME CORP Q1 2024 EARNINGS"), "ACME");
        assert_eq!(title(&n, "Q3 2023 Globex Inc Earnings Call"), "GLOBEX");
        assert_eq!(title(&n, "Initech Inc at Goldman Sachs Technology Conference"), "INITECH");
        assert_eq!(title(&n, "Umbrella Corp (UMB) - Final Transcript"), "UMBRELLA");
        assert_eq!(title(&n, "Event Transcript of Hooli Inc"), "HOOLI");
        assert_eq!(title(&n, "Stark Industries Investor Day"), "STARK INDUSTRIES");
        assert_eq!(title(&n, "Wayne Enterprises FY 2023 Results"), "WAYNE ENTERPRISES");
    }

    #[test]
    fn test_title_and_firm_modes_diverge() {
        let n = Normalizer::with_defaults().unwrap();

        let raw = "Soylent Corp Annual Shareholders Meeting";
        assert_eq!(title(&n, raw), "SOYLENT");
        assert_eq!(firm(&n, raw), "SOYLENT CORP ANNUAL SHAREHOLDERS MEETING");
    }

    #[test]
    fn test_empty_and_punctuation_only() {
        let n = Normalizer::with_defaults().unwrap();

        assert_eq!(firm(&n, ""), "");
        assert_eq!(firm(&n, "  ...  "), "");
        assert_eq!(title(&n, "(TBD)"), "");
    }

    #[test]
    fn test_annotate_fills_keys() {
        let n = Normalizer::with_defaults().unwrap();
        let mut record = EventRecord::new(
            "factset",
            "1",
            "Acme Corporation",
            "Acme Corp Q1 2024 Earnings Call",
            None,
        );

        n.annotate(&mut record);
        assert_eq!(record.normalized_firm_key, "ACME");
        assert_eq!(record.normalized_title_key, "ACME");
    }

    proptest! {
        #[test]
        fn prop_firm_normalize_is_idempotent(raw in "[A-Za-z0-9&,.()' -]{0,48}") {
            let n = Normalizer::with_defaults().unwrap();
            let once = n.normalize(&raw, NormalizeMode::FirmName);
            prop_assert_eq!(n.normalize(&once, NormalizeMode::FirmName), once);
        }

        #[test]
        fn prop_title_normalize_is_idempotent(raw in "[A-Za-z0-9&,.()*' -]{0,64}") {
            let n = Normalizer::with_defaults().unwrap();
            let once = n.normalize(&raw, NormalizeMode::EventTitle);
            prop_assert_eq!(n.normalize(&once, NormalizeMode::EventTitle), once);
        }

        #[test]
        fn prop_suffix_words_idempotent(
            name in "[A-Z]{2,8}( [A-Z]{2,8}){0,2}",
            suffix in prop::sample::select(vec!["INC", "CORP", "CO", "LTD", "SA", "AG", "PLC", "GROUP", "HOLDINGS"]),
        ) {
            let n = Normalizer::with_defaults().unwrap();
            let raw = format!("{} {}", name, suffix);
            let once = n.normalize(&raw, NormalizeMode::FirmName);
            prop_assert_eq!(n.normalize(&once, NormalizeMode::FirmName), once);
        }
    }
}
