// 🔤 Similarity - approximate string matching on a 0-100 scale
//
// WeightedRatio blends plain, partial (best-window) and token-based ratios,
// scaling the partial variants down as the two strings' lengths diverge.
// Edit distance comes from strsim.

use std::collections::BTreeSet;

/// Scores two comparison keys, 0 (unrelated) to 100 (identical)
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, query: &str, choice: &str) -> u8;

    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Highest-scoring choice; ties keep the earliest choice in iteration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestMatch<'a> {
    pub choice: &'a str,
    pub score: u8,
}

pub fn best_match<'a, I>(scorer: &dyn SimilarityScorer, query: &str, choices: I) -> Option<BestMatch<'a>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<BestMatch<'a>> = None;
    for choice in choices {
        let score = scorer.score(query, choice);
        if best.map_or(true, |b| score > b.score) {
            best = Some(BestMatch { choice, score });
            if score == 100 {
                break;
            }
        }
    }
    best
}

// ============================================================================
// WEIGHTED RATIO
// ============================================================================

const UNBASE_SCALE: f64 = 0.95;
const PARTIAL_SCALE: f64 = 0.9;
const LONG_PARTIAL_SCALE: f64 = 0.6;

#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedRatio;

impl SimilarityScorer for WeightedRatio {
    fn score(&self, query: &str, choice: &str) -> u8 {
        weighted_ratio(query, choice).round().clamp(0.0, 100.0) as u8
    }

    fn name(&self) -> &'static str {
        "weighted_ratio"
    }
}

pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let a = preprocess(a);
    let b = preprocess(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let len_a = a.chars().count() as f64;
    let len_b = b.chars().count() as f64;
    let len_ratio = len_a.max(len_b) / len_a.min(len_b);

    let base = ratio(&a, &b);

    if len_ratio < 1.5 {
        let token = token_sort_ratio(&a, &b).max(token_set_ratio(&a, &b));
        return base.max(token * UNBASE_SCALE);
    }

    let scale = if len_ratio < 8.0 {
        PARTIAL_SCALE
    } else {
        LONG_PARTIAL_SCALE
    };
    let partial = partial_ratio(&a, &b) * scale;
    let partial_token = partial_token_sort_ratio(&a, &b)
        .max(partial_token_set_ratio(&a, &b))
        * UNBASE_SCALE
        * scale;

    base.max(partial).max(partial_token)
}

/// Upper-case, punctuation to spaces, single-spaced
fn preprocess(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Best ratio of the shorter string against every equal-length window of the longer
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };

    if short.is_empty() {
        return 0.0;
    }
    if short.len() == long.len() {
        return ratio(a, b);
    }

    let needle: String = short.iter().collect();
    let mut best = 0.0_f64;
    for window in long.windows(short.len()) {
        let candidate: String = window.iter().collect();
        best = best.max(ratio(&needle, &candidate));
        if best >= 100.0 {
            break;
        }
    }
    best
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn partial_token_sort_ratio(a: &str, b: &str) -> f64 {
    partial_ratio(&sorted_tokens(a), &sorted_tokens(b))
}

struct TokenSets {
    intersection: String,
    only_a: String,
    only_b: String,
}

fn token_sets(a: &str, b: &str) -> TokenSets {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();

    let join = |tokens: Vec<&str>| tokens.join(" ");
    TokenSets {
        intersection: join(set_a.intersection(&set_b).copied().collect()),
        only_a: join(set_a.difference(&set_b).copied().collect()),
        only_b: join(set_b.difference(&set_a).copied().collect()),
    }
}

pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let sets = token_sets(a, b);
    if !sets.intersection.is_empty() && (sets.only_a.is_empty() || sets.only_b.is_empty()) {
        return 100.0;
    }

    let combine = |rest: &str| {
        if sets.intersection.is_empty() {
            rest.to_string()
        } else {
            format!("{} {}", sets.intersection, rest)
        }
    };
    let combined_a = combine(&sets.only_a);
    let combined_b = combine(&sets.only_b);

    let mut best = ratio(&combined_a, &combined_b);
    if !sets.intersection.is_empty() {
        best = best
            .max(ratio(&sets.intersection, &combined_a))
            .max(ratio(&sets.intersection, &combined_b));
    }
    best
}

fn partial_token_set_ratio(a: &str, b: &str) -> f64 {
    let sets = token_sets(a, b);
    if !sets.intersection.is_empty() {
        return 100.0;
    }
    partial_ratio(&sets.only_a, &sets.only_b)
}

// ============================================================================
// TEST DOUBLES
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================
