// 📒 Name Overrides - known name-cleaning failures, corrected by hand
// Exact-string lookup: hit → replace wholesale, miss → pass through.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameOverrides {
    /// Upper-cased, trimmed name → corrected canonical name
    entries: BTreeMap<String, String>,
}

impl NameOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut overrides = NameOverrides::new();
        for (name, corrected) in pairs {
            overrides.insert(name.as_ref(), corrected.as_ref());
        }
        overrides
    }

    /// Load a two-column CSV (name, corrected name) with a header row
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path.as_ref())
            .with_context(|| format!("Failed to open overrides CSV: {:?}", path.as_ref()))?;

        let mut overrides = NameOverrides::new();
        for (line, result) in rdr.records().enumerate() {
            let row = result.with_context(|| format!("Failed to read overrides row {}", line + 2))?;
            let (Some(name), Some(corrected)) = (row.get(0), row.get(1)) else {
                anyhow::bail!("Overrides row {} needs two columns", line + 2);
            };
            overrides.insert(name, corrected);
        }

        Ok(overrides)
    }

    pub fn insert(&mut self, name: &str, corrected: &str) {
        let key = name.trim().to_uppercase();
        if key.is_empty() {
            return;
        }
        self.entries
            .insert(key, corrected.trim().to_uppercase());
    }

    /// Same table with every key passed through `rekey` (empty results dropped).
    ///
    /// Lookups happen after legal-form standardization, so keys must be put in
    /// that form before they can ever hit.
    pub fn rekeyed<F>(&self, rekey: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        let entries = self
            .entries
            .iter()
            .map(|(name, corrected)| (rekey(name), corrected.clone()))
            .filter(|(name, _)| !name.is_empty())
            .collect();
        NameOverrides { entries }
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Replace on hit, pass through on miss
    pub fn apply(&self, name: &str) -> String {
        match self.lookup(name) {
            Some(corrected) => corrected.to_string(),
            None => name.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
