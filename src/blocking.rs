// 📅 Blocking Index - coarse temporal keys that narrow the ledger before matching
//
// Recurring corporate events (quarterly calls) tend to land near the same day of
// the month, so the finest key buckets by day-of-month rather than absolute date.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::trace;

/// Days 1..=6 count as the start of a month
const EARLY_MONTH_LAST_DAY: u32 = 6;
/// Days 25.. count as the end of a month
const LATE_MONTH_FIRST_DAY: u32 = 25;

// ============================================================================
// TEMPORAL KEYS
// ============================================================================

/// A scalar key, or the key plus its neighbour when the date sits near a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemporalKey<T> {
    Single(T),
    Pair(T, T),
}

impl<T: Copy + PartialEq> TemporalKey<T> {
    /// List-valued keys match as an OR across their elements
    pub fn contains(&self, value: T) -> bool {
        match *self {
            TemporalKey::Single(v) => v == value,
            TemporalKey::Pair(a, b) => a == value || b == value,
        }
    }

}

fn is_month_edge(day: u32) -> bool {
    day <= EARLY_MONTH_LAST_DAY || day >= LATE_MONTH_FIRST_DAY
}

/// Year key: early January also admits the previous year and December edge
/// days admit the next one, since vendors disagree on which side of New Year
/// an event was dated. Late January stays in its own year.
pub fn year_key(date: NaiveDate) -> TemporalKey<i32> {
    let year = date.year();
    match date.month() {
        1 if date.day() <= EARLY_MONTH_LAST_DAY => TemporalKey::Pair(year, year - 1),
        12 if is_month_edge(date.day()) => TemporalKey::Pair(year, year + 1),
        _ => TemporalKey::Single(year),
    }
}

/// Month key: edge days also admit the previous (early) or next (late) month
pub fn month_key(date: NaiveDate) -> TemporalKey<u32> {
    let month = date.month();
    let day = date.day();
    if day <= EARLY_MONTH_LAST_DAY {
        let previous = if month == 1 { 12 } else { month - 1 };
        TemporalKey::Pair(month, previous)
    } else if day >= LATE_MONTH_FIRST_DAY {
        let next = if month == 12 { 1 } else { month + 1 };
        TemporalKey::Pair(month, next)
    } else {
        TemporalKey::Single(month)
    }
}

/// Day-of-month values of every date within `half_width` days of `date`.
///
/// Wrapping uses the real length of the neighbouring month, so day 1 of March
/// pulls in Feb 27-29 in a leap year and Feb 26-28 otherwise.
pub fn day_buffer(date: NaiveDate, half_width: u32) -> BTreeSet<u32> {
    let half = i64::from(half_width);
    (-half..=half)
        .filter_map(|offset| date.checked_add_signed(Duration::days(offset)))
        .map(|d| d.day())
        .collect()
}

// ============================================================================
// BLOCKING KEYS / STEPS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockingKeys {
    pub year: TemporalKey<i32>,
    pub month: TemporalKey<u32>,
    pub day_buffer: BTreeSet<u32>,
}

impl BlockingKeys {
    pub fn from_date(date: NaiveDate, half_width: u32) -> Self {
        BlockingKeys {
            year: year_key(date),
            month: month_key(date),
            day_buffer: day_buffer(date, half_width),
        }
    }

    /// Predicates in the order they narrow: coarse to fine
    pub fn steps(&self) -> Vec<BlockingStep> {
        vec![
            BlockingStep::Year(self.year),
            BlockingStep::Month(self.month),
            BlockingStep::DayBuffer(self.day_buffer.clone()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", content = "key", rename_all = "snake_case")]
pub enum BlockingStep {
    Year(TemporalKey<i32>),
    Month(TemporalKey<u32>),
    DayBuffer(BTreeSet<u32>),
}

impl BlockingStep {
    pub fn admits(&self, date: NaiveDate) -> bool {
        match self {
            BlockingStep::Year(key) => key.contains(date.year()),
            BlockingStep::Month(key) => key.contains(date.month()),
            BlockingStep::DayBuffer(days) => days.contains(&date.day()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlockingStep::Year(_) => "year",
            BlockingStep::Month(_) => "month",
            BlockingStep::DayBuffer(_) => "day_buffer",
        }
    }
}

/// Outcome of narrowing: survivors plus how many predicates were applied
#[derive(Debug)]
pub struct Narrowed<'a, T> {
    pub items: Vec<&'a T>,
    pub steps_applied: usize,
}

/// Reduce `items` by the ordered predicates.
///
/// The first predicate always applies. Before each further one, narrowing stops
/// once `max_steps` predicates ran or fewer than `min_candidates` items remain.
/// Items without a date never survive a predicate.
pub fn narrow<'a, T, F>(
    items: Vec<&'a T>,
    steps: &[BlockingStep],
    max_steps: usize,
    min_candidates: usize,
    date_of: F,
) -> Narrowed<'a, T>
where
    F: Fn(&T) -> Option<NaiveDate>,
{
    let mut remaining = items;
    let mut steps_applied = 0;

    for step in steps {
        let exhausted = steps_applied >= max_steps;
        let too_few = steps_applied > 0 && remaining.len() < min_candidates;
        if exhausted || too_few {
            break;
        }
        remaining.retain(|item| date_of(*item).map_or(false, |d| step.admits(d)));
        steps_applied += 1;
        trace!(step = step.name(), remaining = remaining.len(), "blocking step applied");
    }

    Narrowed {
        items: remaining,
        steps_applied,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn set(days: &[u32]) -> BTreeSet<u32> {
        days.iter().copied().collect()
    }

    #[test]
    fn test_year_key_rollover() {
        assert_eq!(year_key(date(2024, 1, 5)), TemporalKey::Pair(2024, 2023));
        assert_eq!(year_key(date(2024, 12, 5)), TemporalKey::Pair(2024, 2025));
        assert_eq!(year_key(date(2024, 12, 28)), TemporalKey::Pair(2024, 2025));
        assert_eq!(year_key(date(2024, 6, 2)), TemporalKey::Single(2024));
        assert_eq!(year_key(date(2024, 12, 3)), TemporalKey::Pair(2024, 2025));
    }

    #[test]
    fn test_late_january_stays_in_its_year() {
        assert_eq!(year_key(date(2024, 1, 28)), TemporalKey::Single(2024));
        assert_eq!(year_key(date(2024, 1, 6)), TemporalKey::Pair(2024, 2023));
        assert_eq!(year_key(date(2024, 1, 7)), TemporalKey::Single(2024));
        for month in 1..=12 {
            assert_eq!(year_key(date(2024, month, 15)), TemporalKey::Single(2024));
        }
    }

    #[test]
    fn test_month_key_rollover() {
        assert_eq!(month_key(date(2024, 1, 3)), TemporalKey::Pair(1, 12));
        assert_eq!(month_key(date(2024, 5, 6)), TemporalKey::Pair(5, 4));
        assert_eq!(month_key(date(2024, 5, 7)), TemporalKey::Single(5));
        assert_eq!(month_key(date(2024, 5, 24)), TemporalKey::Single(5));
        assert_eq!(month_key(date(2024, 5, 25)), TemporalKey::Pair(5, 6));
        assert_eq!(month_key(date(2024, 12, 30)), TemporalKey::Pair(12, 1));
    }

    #[test]
    fn test_day_buffer_mid_month() {
        assert_eq!(day_buffer(date(2024, 4, 15), 3), set(&[12, 13, 14, 15, 16, 17, 18]));
    }

    #[test]
    fn test_day_buffer_wraps_into_previous_month() {
        // Feb 2024 has 29 days
        assert_eq!(day_buffer(date(2024, 3, 1), 3), set(&[27, 28, 29, 1, 2, 3, 4]));
        assert_eq!(day_buffer(date(2023, 3, 1), 3), set(&[26, 27, 28, 1, 2, 3, 4]));
        assert_eq!(day_buffer(date(2024, 1, 2), 3), set(&[30, 31, 1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_day_buffer_wraps_into_next_month() {
        // April has 30 days
        assert_eq!(day_buffer(date(2024, 4, 30), 3), set(&[27, 28, 29, 30, 1, 2, 3]));
        assert_eq!(day_buffer(date(2024, 12, 31), 3), set(&[28, 29, 30, 31, 1, 2, 3]));
    }

    #[test]
    fn test_temporal_key_contains_is_or() {
        let key = TemporalKey::Pair(2024, 2023);
        assert!(key.contains(2024));
        assert!(key.contains(2023));
        assert!(!key.contains(2025));
        assert!(TemporalKey::Single(3).contains(3));
    }

    #[test]
    fn test_narrow_applies_all_steps_on_dense_ledger() {
        let dates = vec![
            date(2024, 4, 14),
            date(2024, 4, 16),
            date(2024, 4, 28),
            date(2024, 7, 15),
            date(2023, 4, 15),
        ];
        let keys = BlockingKeys::from_date(date(2024, 4, 15), 3);

        let narrowed = narrow(dates.iter().collect(), &keys.steps(), 4, 2, |d| Some(*d));
        assert_eq!(narrowed.steps_applied, 3);
        assert_eq!(narrowed.items, vec![&dates[0], &dates[1]]);
    }

    #[test]
    fn test_narrow_stops_when_below_minimum() {
        let dates = vec![date(2024, 9, 1), date(2023, 4, 15)];
        let keys = BlockingKeys::from_date(date(2024, 4, 15), 3);

        // Year leaves one record; month and day predicates never run
        let narrowed = narrow(dates.iter().collect(), &keys.steps(), 4, 2, |d| Some(*d));
        assert_eq!(narrowed.steps_applied, 1);
        assert_eq!(narrowed.items, vec![&dates[0]]);
    }

    #[test]
    fn test_narrow_respects_max_steps() {
        let dates = vec![date(2024, 4, 15), date(2024, 9, 1), date(2024, 4, 2)];
        let keys = BlockingKeys::from_date(date(2024, 4, 15), 3);

        let narrowed = narrow(dates.iter().collect(), &keys.steps(), 1, 2, |d| Some(*d));
        assert_eq!(narrowed.steps_applied, 1);
        assert_eq!(narrowed.items.len(), 3);

        let none = narrow(dates.iter().collect(), &keys.steps(), 0, 2, |d| Some(*d));
        assert_eq!(none.steps_applied, 0);
        assert_eq!(none.items.len(), 3);
    }

    #[test]
    fn test_narrow_drops_undated_items() {
        let dates: Vec<Option<NaiveDate>> = vec![None, Some(date(2024, 4, 15)), None];
        let keys = BlockingKeys::from_date(date(2024, 4, 15), 3);

        let narrowed = narrow(dates.iter().collect(), &keys.steps(), 4, 2, |d| *d);
        assert_eq!(narrowed.items.len(), 1);
    }

    #[test]
    fn test_narrow_empty_input() {
        let dates: Vec<NaiveDate> = Vec::new();
        let keys = BlockingKeys::from_date(date(2024, 4, 15), 3);

        let narrowed = narrow(dates.iter().collect(), &keys.steps(), 4, 2, |d| Some(*d));
        assert!(narrowed.items.is_empty());
        assert_eq!(narrowed.steps_applied, 1);
    }

    proptest! {
        #[test]
        fn prop_day_buffer_has_seven_days(offset in 0i64..80_000) {
            let d = date(1900, 1, 1) + Duration::days(offset);
            let buffer = day_buffer(d, 3);
            prop_assert_eq!(buffer.len(), 7);
            prop_assert!(buffer.contains(&d.day()));
        }

        #[test]
        fn prop_mid_month_keys_are_scalar(y in 1950i32..2100, m in 1u32..=12, d in 7u32..=24) {
            let day = date(y, m, d);
            prop_assert_eq!(year_key(day), TemporalKey::Single(y));
            prop_assert_eq!(month_key(day), TemporalKey::Single(m));
        }
    }
}
