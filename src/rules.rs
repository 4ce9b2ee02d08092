// 🏷️ Rewrite Rules - Rules as Data
// Ordered pattern → replacement tables for firm-name and title cleaning.
// Vendor- or locale-specific tables can be swapped in from JSON without touching the matcher.

use anyhow::{Context as AnyhowContext, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteRule {
    /// Rule ID for tracking
    pub id: String,

    /// Regular expression, matched against the upper-cased text
    pub pattern: String,

    /// Replacement text (regex replacement syntax, `$1` etc.)
    #[serde(default)]
    pub replacement: String,
}

impl RewriteRule {
    pub fn new(id: &str, pattern: &str, replacement: &str) -> Self {
        RewriteRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }
    }

    fn compile(&self) -> Result<CompiledRule> {
        let regex = Regex::new(&self.pattern)
            .with_context(|| format!("Invalid pattern in rule '{}': {}", self.id, self.pattern))?;
        Ok(CompiledRule {
            id: self.id.clone(),
            regex,
            replacement: self.replacement.clone(),
        })
    }
}

// ============================================================================
// RULE SET (declarative form, serializable)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Legal-form standardizations, applied in order (multi-word forms first)
    #[serde(default = "default_suffix_standardization")]
    pub suffix_standardization: Vec<RewriteRule>,

    /// Trailing legal-suffix tokens stripped from the end of a key
    #[serde(default = "default_suffix_tokens")]
    pub suffix_tokens: Vec<String>,

    /// Leading tokens stripped from the start of a key
    #[serde(default = "default_leading_tokens")]
    pub leading_tokens: Vec<String>,

    /// Title-only asides removed before punctuation is stripped
    #[serde(default = "default_title_asides")]
    pub title_asides: Vec<RewriteRule>,

    /// Title-only noise (period markers, event-type clauses), applied in order
    #[serde(default = "default_title_noise")]
    pub title_noise: Vec<RewriteRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet {
            suffix_standardization: default_suffix_standardization(),
            suffix_tokens: default_suffix_tokens(),
            leading_tokens: default_leading_tokens(),
            title_asides: default_title_asides(),
            title_noise: default_title_noise(),
        }
    }
}

impl RuleSet {
    /// Load rule tables from a JSON file; sections left out fall back to the built-in tables
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let rules: RuleSet =
            serde_json::from_str(&content).context("Failed to parse rules JSON")?;

        Ok(rules)
    }

    /// Compile every pattern once; the result is immutable for the process lifetime
    pub fn compile(&self) -> Result<CompiledRules> {
        let compile_all = |rules: &[RewriteRule]| -> Result<Vec<CompiledRule>> {
            rules.iter().map(RewriteRule::compile).collect()
        };

        let mut suffix_tokens: Vec<String> = self
            .suffix_tokens
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        // Longest first, so "SAB" is tried before "AB"
        suffix_tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        suffix_tokens.dedup();

        let leading_tokens = self
            .leading_tokens
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(CompiledRules {
            suffix_standardization: compile_all(&self.suffix_standardization)?,
            suffix_tokens,
            leading_tokens,
            title_asides: compile_all(&self.title_asides)?,
            title_noise: compile_all(&self.title_noise)?,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.suffix_standardization.len() + self.title_asides.len() + self.title_noise.len()
    }
}

// ============================================================================
// COMPILED RULES
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    regex: Regex,
    replacement: String,
}

impl CompiledRule {
    pub fn apply(&self, text: &str) -> String {
        self.regex
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub suffix_standardization: Vec<CompiledRule>,
    /// Sorted longest-first
    pub suffix_tokens: Vec<String>,
    pub leading_tokens: Vec<String>,
    pub title_asides: Vec<CompiledRule>,
    pub title_noise: Vec<CompiledRule>,
}

/// Apply an ordered list of rules, each seeing the previous one's output
pub fn apply_in_order(rules: &[CompiledRule], text: &str) -> String {
    rules
        .iter()
        .fold(text.to_string(), |acc, rule| rule.apply(&acc))
}

// ============================================================================
// BUILT-IN TABLES
// ============================================================================

fn default_suffix_standardization() -> Vec<RewriteRule> {
    vec![
        // Separators first, so "ACME,INC" and "AT&T" survive punctuation stripping
        RewriteRule::new("comma", r",", " "),
        RewriteRule::new("ampersand", r"\s*&\s*", " AND "),
        RewriteRule::new("publ", r"\s*\(PUBL?\.?\)", ""),
        // Multi-word and foreign legal forms
        RewriteRule::new("pl-sa", r"\bSP[ÓO]LKA\s+AKCYJNA\b", "SA"),
        RewriteRule::new("fr-sa", r"\bSOCI[ÉE]T[ÉE]\s+ANONYME\b", "SA"),
        RewriteRule::new("es-sa", r"\bSOCIEDAD\s+AN[ÓO]NIMA\b", "SA"),
        RewriteRule::new("tr-as", r"\bANON[İI]M\s+[ŞS][İI]RKET[İI]\b", "AS"),
        RewriteRule::new("my-bhd", r"\bBERHAD\b", "BHD"),
        RewriteRule::new("de-ag", r"\bAKTIENGESELLSCHAFT\b", "AG"),
        RewriteRule::new("se-ab-def", r"\bAKTIEBOLAGET\b", "AB"),
        RewriteRule::new("se-ab", r"\bAKTIEBOLAG\b", "AB"),
        RewriteRule::new("nl-nv", r"\bNAAMLOZE\s+VENNOOTSCHAP\b", "NV"),
        RewriteRule::new("plc-long", r"\bPUBLIC\s+LIMITED\s+COMPANY\b", "PLC"),
        RewriteRule::new("fi-oyj", r"\bOYJ\b", "PLC"),
        RewriteRule::new("pcl-long", r"\bPUBLIC\s+COMPANY\s+LIMITED\b", "PCL"),
        RewriteRule::new("pcl-short", r"\bPUBLIC\s+CO\.?\s+LTD\b", "PCL"),
        RewriteRule::new("jsc-long", r"\bJOINT\s+STOCK\s+COMPANY\b", "JSC"),
        RewriteRule::new("jsc-short", r"\bJOINT\s+STOCK\s+CO\b", "JSC"),
        RewriteRule::new("reit", r"\bREAL\s+ESTATE\s+INVESTMENT\s+TRUST\b", "REIT"),
        // Spelled-out initials ("S A", "S.A.", "L.P.")
        RewriteRule::new("spaced-asa", r"\bA\.?\s+S\.?\s+A\b\.?", "ASA"),
        RewriteRule::new("spaced-sab", r"\bS\.?\s+A\.?\s+B\b\.?", "SAB"),
        RewriteRule::new("spaced-plc", r"\bP\.?\s+L\.?\s+C\b\.?", "PLC"),
        RewriteRule::new("spaced-pcl", r"\bP\.?\s+C\.?\s+L\b\.?", "PCL"),
        RewriteRule::new("spaced-bhd", r"\bB\.?\s+H\.?\s+D\b\.?", "BHD"),
        RewriteRule::new("spaced-oyj", r"\bO\.?\s+Y\.?\s+J\b\.?", "OYJ"),
        RewriteRule::new("spaced-sa", r"\bS\.\s*A\b\.?|\bS\s+A\b", "SA"),
        RewriteRule::new("spaced-ab", r"\bA\.\s*B\b\.?|\bA\s+B\b", "AB"),
        RewriteRule::new("spaced-ag", r"\bA\.\s*G\b\.?|\bA\s+G\b", "AG"),
        RewriteRule::new("spaced-as", r"\bA\.\s*S\b\.?|\bA\s+S\b", "AS"),
        RewriteRule::new("spaced-lp", r"\bL\.\s*P\b\.?|\bL\s+P\b", "LP"),
        RewriteRule::new("spaced-nv", r"\bN\.\s*V\b\.?|\bN\s+V\b", "NV"),
        RewriteRule::new("spaced-cv", r"\bC\.\s*V\b\.?|\bC\s+V\b", "CV"),
        // English long forms
        RewriteRule::new("inc", r"\bINCORPORATED\b", "INC"),
        RewriteRule::new("co", r"\bCOMPANY\b", "CO"),
        RewriteRule::new("corp", r"\bCORPORATION\b", "CORP"),
        RewriteRule::new("ltd", r"\bLIMITED\b", "LTD"),
        RewriteRule::new("intl", r"\bINTERNATIONAL\b", "INTL"),
        RewriteRule::new("gp", r"\bGRO(?:UP|EP)\b", "GP"),
        RewriteRule::new("cap", r"\bCAPITAL\b", "CAP"),
        RewriteRule::new("rlty", r"\bREALTY\b", "RLTY"),
    ]
}

fn default_suffix_tokens() -> Vec<String> {
    [
        "LLC", "SPA", "INC", "CO", "SA", "AS", "AB", "PLC", "PCL", "CORP", "LTD", "OYJ", "BHD",
        "AG", "ASA", "SAB", "LP", "NV", "JSC", "REIT", "CV", "INTL", "GROUP", "GP", "CAPITAL",
        "CAP", "REALTY", "RLTY", "AND",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_leading_tokens() -> Vec<String> {
    vec!["THE".to_string()]
}

fn default_title_asides() -> Vec<RewriteRule> {
    vec![
        RewriteRule::new("parenthetical", r"\s*\([^)]*\)?", " "),
        RewriteRule::new("bracketed", r"\s*\[[^\]]*\]?", " "),
        RewriteRule::new("asterisk", r"\*", " "),
        RewriteRule::new("dot-com", r"\.COM\b", ""),
    ]
}

fn default_title_noise() -> Vec<RewriteRule> {
    vec![
        // Transcript-PDF prefixes
        RewriteRule::new("event-transcript-of", r"^.*\bEVENT\s+TRANSCRIPT\s+OF\s+", ""),
        RewriteRule::new("event-brief-of", r"^.*\bEVENT\s+BRIEF\s+OF\s+", ""),
        // Period markers leading the title
        RewriteRule::new("leading-period", r"^(?:Q[1-4]|H[12]|[1-4]Q|FY)\s+", ""),
        RewriteRule::new("leading-year", r"^(?:FY\s*)?(?:19|20)\d{2}\s+", ""),
        // Dash clause (" - PRELIM...", " - FINAL...")
        RewriteRule::new("dash-clause", r"\s+-\s+.*$", ""),
        // Quarter / half / fiscal markers and everything after them
        RewriteRule::new("quarter", r"\s+(?:Q[1-4]|[1-4]Q(?:\d{2})?)\b.*$", ""),
        RewriteRule::new("half", r"\s+H[12]\b.*$", ""),
        RewriteRule::new("fiscal", r"\s+FY\s*(?:\d{2}|\d{4})?\b.*$", ""),
        RewriteRule::new("full-half-year", r"\s+(?:FULL|HALF)\s+YEAR\b.*$", ""),
        RewriteRule::new("year", r"\s+(?:19|20)\d{2}\b.*$", ""),
        RewriteRule::new("final-prelim", r"\s+(?:FINAL|PRELIM\w*|INTERIM)\b.*$", ""),
        // Event-type words
        RewriteRule::new("earnings", r"\s+EARN\w*\b.*$", ""),
        RewriteRule::new("investor", r"\s+INVESTOR\w*\b.*$", ""),
        RewriteRule::new("pre-recorded", r"\s+PRE\s*-?\s*REC\w*\b.*$", ""),
        RewriteRule::new("presents", r"\s+PRESENTS\b.*$", ""),
        RewriteRule::new("conference", r"\s+CONF\w*\b.*$", ""),
        RewriteRule::new("analyst", r"\s+ANALYST\w*\b.*$", ""),
        RewriteRule::new("shareholder", r"\s+SHAREHOLDER\w*\b.*$", ""),
        RewriteRule::new("m-and-a", r"\s+M\s+AND\s+A\b.*$", ""),
        RewriteRule::new("special-call", r"\s+SPECIAL\s+(?:CALL|MEETING)\b.*$", ""),
        RewriteRule::new("merger", r"\s+MERGER\b.*$", ""),
        RewriteRule::new("video", r"\s+VIDEO\b.*$", ""),
        RewriteRule::new("management", r"\s+MANAG\w*\b.*$", ""),
        RewriteRule::new("annual", r"\s+ANNUAL\b.*$", ""),
        RewriteRule::new("fireside", r"\s+FIRESIDE\b.*$", ""),
        RewriteRule::new("midterm", r"\s+MIDTERM\b.*$", ""),
        RewriteRule::new("announce", r"\s+ANNOUNCE\w*\b.*$", ""),
        RewriteRule::new("discuss", r"\s+DISCUSS\w*\b.*$", ""),
        RewriteRule::new("key-performance", r"\s+KEY\s+PERFORMANCE\b.*$", ""),
        RewriteRule::new("corporate-s", r"\s+CORPORATE\s+S\w*\b.*$", ""),
        RewriteRule::new("hosts", r"\s+HOSTS\b.*$", ""),
        RewriteRule::new("rescheduled", r"\s+RESCHED\w*\b.*$", ""),
        RewriteRule::new("results", r"\s+RESULTS?\b.*$", ""),
        RewriteRule::new("call", r"\s+CALL\b.*$", ""),
        // Trailing clauses after connective markers
        RewriteRule::new("at-clause", r"\s+AT\s+.*$", ""),
        RewriteRule::new("to-clause", r"\s+TO\s+.*$", ""),
        RewriteRule::new("and-period", r"\s+AND\s+(?:YEAR\s*-?\s*END|FULL\s+YEAR|(?:19|20)\d{2})\b.*$", ""),
    ]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_rules_compile() {
        let rules = RuleSet::default();
        let compiled = rules.compile().unwrap();

        assert_eq!(compiled.suffix_standardization.len(), rules.suffix_standardization.len());
        assert_eq!(compiled.title_noise.len(), rules.title_noise.len());
        assert!(rules.rule_count() > 50);
    }

    #[test]
    fn test_suffix_tokens_sorted_longest_first() {
        let compiled = RuleSet::default().compile().unwrap();
        let tokens = &compiled.suffix_tokens;

        for pair in tokens.windows(2) {
            assert!(pair[0].len() >= pair[1].len(), "{:?} before {:?}", pair[0], pair[1]);
        }
        let sab = tokens.iter().position(|t| t == "SAB").unwrap();
        let ab = tokens.iter().position(|t| t == "AB").unwrap();
        assert!(sab < ab);
    }

    #[test]
    fn test_standardization_order_matters() {
        let compiled = RuleSet::default().compile().unwrap();

        // Long form must collapse before COMPANY → CO fires
        let out = apply_in_order(&compiled.suffix_standardization, "SIAM CEMENT PUBLIC COMPANY LIMITED");
        assert_eq!(out, "SIAM CEMENT PCL");

        let out = apply_in_order(&compiled.suffix_standardization, "VOLVO AKTIEBOLAGET");
        assert_eq!(out, "VOLVO AB");

        let out = apply_in_order(&compiled.suffix_standardization, "TELEFONICA SOCIEDAD ANÓNIMA");
        assert_eq!(out, "TELEFONICA SA");
    }

    #[test]
    fn test_spaced_initials_do_not_swallow_next_word() {
        let compiled = RuleSet::default().compile().unwrap();
        let out = apply_in_order(&compiled.suffix_standardization, "FOO S A BAR");
        assert_eq!(out, "FOO SA BAR");
    }

    #[test]
    fn test_from_file_partial_sections_fall_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "suffix_tokens": ["GMBH", "KG"], "title_noise": [{{"id": "webcast", "pattern": "\\s+WEBCAST\\b.*$"}}] }}"#
        )
        .unwrap();

        let rules = RuleSet::from_file(file.path()).unwrap();
        assert_eq!(rules.suffix_tokens, vec!["GMBH".to_string(), "KG".to_string()]);
        assert_eq!(rules.title_noise.len(), 1);
        assert_eq!(rules.title_noise[0].replacement, "");
        assert_eq!(rules.suffix_standardization, default_suffix_standardization());
    }

    #[test]
    fn test_invalid_pattern_names_rule() {
        let rules = RuleSet {
            title_noise: vec![RewriteRule::new("broken", r"(\s+", "")],
            ..RuleSet::default()
        };

        let err = rules.compile().unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }
}
